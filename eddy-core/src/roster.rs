//! Nick list maintained from hub traffic.

use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::{Message, MyInfo};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserEntry {
    pub info: Option<MyInfo>,
    pub address: Option<String>,
    pub operator: bool,
}

/// Users currently present on the hub.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    users: BTreeMap<String, UserEntry>,
    bots: BTreeSet<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a hub message. Returns whether the roster changed.
    pub fn apply(&mut self, message: &Message) -> bool {
        match message {
            Message::Hello { nick } => self.users.insert(nick.clone(), UserEntry::default()).is_none(),
            Message::NickList { nicks } => {
                for nick in nicks {
                    self.users.entry(nick.clone()).or_default();
                }
                !nicks.is_empty()
            }
            Message::OpList { nicks } => {
                for nick in nicks {
                    self.users.entry(nick.clone()).or_default().operator = true;
                }
                !nicks.is_empty()
            }
            Message::BotList { nicks } => {
                self.bots.extend(nicks.iter().cloned());
                !nicks.is_empty()
            }
            Message::MyInfo(info) => {
                self.users.entry(info.nick.clone()).or_default().info = Some(info.clone());
                true
            }
            Message::UserIp { users } => {
                for (nick, address) in users {
                    self.users.entry(nick.clone()).or_default().address = Some(address.clone());
                }
                !users.is_empty()
            }
            Message::Quit { nick } => {
                self.bots.remove(nick);
                self.users.remove(nick).is_some()
            }
            _ => false,
        }
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.users.contains_key(nick)
    }

    pub fn user(&self, nick: &str) -> Option<&UserEntry> {
        self.users.get(nick)
    }

    pub fn nicks(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    pub fn is_bot(&self, nick: &str) -> bool {
        self.bots.contains(nick)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
        self.bots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_tracks_joins_info_and_quits() {
        let mut roster = Roster::new();
        assert!(roster.apply(&Message::NickList {
            nicks: vec!["alice".to_string(), "bob".to_string()],
        }));
        assert!(roster.apply(&Message::Hello {
            nick: "carol".to_string(),
        }));
        assert!(roster.apply(&Message::OpList {
            nicks: vec!["alice".to_string()],
        }));
        assert!(roster.apply(&Message::MyInfo(MyInfo {
            nick: "bob".to_string(),
            share_size: 10,
            ..MyInfo::default()
        })));
        assert_eq!(roster.nicks(), vec!["alice", "bob", "carol"]);
        assert!(roster.user("alice").unwrap().operator);
        assert_eq!(
            roster.user("bob").unwrap().info.as_ref().map(|i| i.share_size),
            Some(10)
        );

        assert!(roster.apply(&Message::Quit {
            nick: "bob".to_string(),
        }));
        assert!(!roster.contains("bob"));
        assert!(!roster.apply(&Message::Send));
    }

    #[test]
    fn test_roster_records_addresses_and_bots() {
        let mut roster = Roster::new();
        roster.apply(&Message::UserIp {
            users: vec![("dave".to_string(), "10.0.0.2".to_string())],
        });
        roster.apply(&Message::BotList {
            nicks: vec!["Hub-Security".to_string()],
        });
        assert_eq!(
            roster.user("dave").unwrap().address.as_deref(),
            Some("10.0.0.2")
        );
        assert!(roster.is_bot("Hub-Security"));

        roster.clear();
        assert!(roster.is_empty());
    }
}
