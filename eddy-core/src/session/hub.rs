//! Hub login and relay state machine.
//!
//! [`HubSession::handle`] is pure: it maps one hub message to the actions the
//! connection driver must perform, which keeps the login sequence testable
//! without sockets.

use crate::config::IdentityConfig;
use crate::protocol::{Message, MyInfo, SearchOrigin, SearchRequest, SearchResult, generate_key};
use crate::share::Listing;

/// Protocol version sent after validation.
pub const PROTOCOL_VERSION: &str = "1,0091";

/// Results returned for a search relayed through the hub.
pub const PASSIVE_RESULT_LIMIT: usize = 5;
/// Results returned for a search answered over UDP.
pub const ACTIVE_RESULT_LIMIT: usize = 10;

const STATUS_NORMAL: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Connecting,
    AwaitingLock,
    AwaitingHubName,
    AwaitingValidation,
    Validated,
}

/// Local figures advertised in `$MyINFO` and search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelfStatus {
    pub open_slots: usize,
    pub total_slots: usize,
    pub share_size: u64,
}

/// Work the hub driver carries out for one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubAction {
    Send(Message),
    /// Terminate the hub connection
    Close { reason: String },
    /// Open an outbound peer connection and send our lock first.
    /// `nick` is the one the request was addressed to.
    ConnectPeer {
        nick: String,
        address: String,
        port: u16,
    },
    /// Query the local index and reply to the searcher
    AnswerSearch(SearchRequest),
    /// The hub accepted our nick
    Validated,
    /// Hand to observers unchanged
    Forward(Message),
}

/// Single hub connection state.
#[derive(Debug, Clone)]
pub struct HubSession {
    identity: IdentityConfig,
    hub_address: String,
    state: HubState,
    hub_name: Option<String>,
    validated: bool,
}

impl HubSession {
    pub fn new(identity: IdentityConfig, hub_address: impl Into<String>) -> Self {
        Self {
            identity,
            hub_address: hub_address.into(),
            state: HubState::Connecting,
            hub_name: None,
            validated: false,
        }
    }

    pub fn state(&self) -> HubState {
        self.state
    }

    pub fn hub_name(&self) -> Option<&str> {
        self.hub_name.as_deref()
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn nick(&self) -> &str {
        &self.identity.nick
    }

    /// The socket is up; the hub speaks first.
    pub fn on_connected(&mut self) {
        self.state = HubState::AwaitingLock;
    }

    pub fn handle(&mut self, message: Message, status: &SelfStatus) -> Vec<HubAction> {
        match message {
            Message::Lock { lock, .. } => {
                self.validated = false;
                self.state = HubState::AwaitingHubName;
                vec![HubAction::Send(Message::Key {
                    key: generate_key(&lock),
                })]
            }
            Message::HubName { name } => {
                tracing::debug!("Hub name is {}", name);
                self.hub_name = Some(name);
                if self.validated {
                    return Vec::new();
                }
                self.state = HubState::AwaitingValidation;
                vec![HubAction::Send(Message::ValidateNick {
                    nick: self.identity.nick.clone(),
                })]
            }
            Message::GetPass => match &self.identity.password {
                Some(password) => vec![HubAction::Send(Message::MyPass {
                    password: password.clone(),
                })],
                None => vec![HubAction::Close {
                    reason: "Hub requires a password".to_string(),
                }],
            },
            Message::BadPass => vec![HubAction::Close {
                reason: "Password rejected".to_string(),
            }],
            Message::HubIsFull => vec![HubAction::Close {
                reason: "Hub is full".to_string(),
            }],
            Message::ValidateDenied { nick } => vec![HubAction::Close {
                reason: format!("Nick {nick} rejected"),
            }],
            Message::Hello { nick } if nick == self.identity.nick && !self.validated => {
                self.validated = true;
                self.state = HubState::Validated;
                vec![
                    HubAction::Validated,
                    HubAction::Send(Message::Version {
                        version: PROTOCOL_VERSION.to_string(),
                    }),
                    HubAction::Send(Message::GetNickList),
                    HubAction::Send(self.my_info(status)),
                    HubAction::Forward(Message::Hello { nick }),
                ]
            }
            Message::ConnectToMe {
                nick,
                address,
                port,
            } => {
                vec![HubAction::ConnectPeer {
                    nick,
                    address,
                    port,
                }]
            }
            Message::RevConnectToMe { from, to } if to == self.identity.nick => {
                if self.identity.passive {
                    vec![HubAction::Send(Message::RevConnectToMe {
                        from: self.identity.nick.clone(),
                        to: from,
                    })]
                } else {
                    vec![HubAction::Send(Message::ConnectToMe {
                        nick: from,
                        address: self.identity.address.clone(),
                        port: self.identity.active_port,
                    })]
                }
            }
            Message::Search(request) => {
                if self.is_own_search(&request.origin) {
                    Vec::new()
                } else {
                    vec![HubAction::AnswerSearch(request)]
                }
            }
            other => vec![HubAction::Forward(other)],
        }
    }

    /// `$MyINFO` describing this client.
    pub fn my_info(&self, status: &SelfStatus) -> Message {
        let mode = if self.identity.passive { 'P' } else { 'A' };
        Message::MyInfo(MyInfo {
            nick: self.identity.nick.clone(),
            description: format!(
                "<++ V:{},M:{},H:1/0/0,S:{},Dt:1.2.0/W>",
                self.identity.version, mode, status.open_slots
            ),
            speed: self.identity.speed.clone(),
            status: Some(STATUS_NORMAL),
            email: self.identity.email.clone(),
            share_size: status.share_size,
        })
    }

    pub fn connect_request(&self, nick: &str) -> Message {
        connect_request(&self.identity, nick)
    }

    pub fn search_origin(&self) -> SearchOrigin {
        search_origin(&self.identity)
    }

    /// Number of results to return for `request`.
    pub fn result_limit(request: &SearchRequest) -> usize {
        match request.origin {
            SearchOrigin::Passive { .. } => PASSIVE_RESULT_LIMIT,
            SearchOrigin::Active { .. } => ACTIVE_RESULT_LIMIT,
        }
    }

    /// `$SR` for one local match.
    ///
    /// Passive searchers get the result relayed by the hub, so their nick is
    /// appended as the target.
    pub fn search_result(
        &self,
        listing: &Listing,
        request: &SearchRequest,
        status: &SelfStatus,
    ) -> SearchResult {
        let hub_name = match &listing.tth {
            Some(tth) => format!("TTH:{tth}"),
            None => self.hub_name.clone().unwrap_or_default(),
        };
        let target = match &request.origin {
            SearchOrigin::Passive { nick } => Some(nick.clone()),
            SearchOrigin::Active { .. } => None,
        };
        SearchResult {
            nick: self.identity.nick.clone(),
            path: listing.name.clone(),
            size: Some(listing.size),
            open_slots: u32::try_from(status.open_slots).unwrap_or(u32::MAX),
            total_slots: u32::try_from(status.total_slots).unwrap_or(u32::MAX),
            hub_name,
            hub_address: self.hub_address.clone(),
            target,
        }
    }

    fn is_own_search(&self, origin: &SearchOrigin) -> bool {
        match origin {
            SearchOrigin::Passive { nick } => *nick == self.identity.nick,
            SearchOrigin::Active { address, port } => {
                !self.identity.passive
                    && *address == self.identity.address
                    && *port == self.identity.search_port
            }
        }
    }
}

/// Asks the hub to set up a connection with `nick`.
///
/// Passive clients cannot be dialled, so they ask the peer to dial the hub
/// relay instead.
pub fn connect_request(identity: &IdentityConfig, nick: &str) -> Message {
    if identity.passive {
        Message::RevConnectToMe {
            from: identity.nick.clone(),
            to: nick.to_string(),
        }
    } else {
        Message::ConnectToMe {
            nick: nick.to_string(),
            address: identity.address.clone(),
            port: identity.active_port,
        }
    }
}

/// Where results for our own searches should be delivered.
pub fn search_origin(identity: &IdentityConfig) -> SearchOrigin {
    if identity.passive {
        SearchOrigin::Passive {
            nick: identity.nick.clone(),
        }
    } else {
        SearchOrigin::Active {
            address: identity.address.clone(),
            port: identity.search_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::protocol::MessageCodec;

    fn identity(passive: bool) -> IdentityConfig {
        IdentityConfig {
            nick: "me".to_string(),
            password: Some("secret".to_string()),
            passive,
            address: "10.0.0.1".to_string(),
            active_port: 4000,
            search_port: 4001,
            version: "0.1.0".to_string(),
            ..IdentityConfig::default()
        }
    }

    fn status() -> SelfStatus {
        SelfStatus {
            open_slots: 2,
            total_slots: 3,
            share_size: 1234,
        }
    }

    fn session(passive: bool) -> HubSession {
        let mut hub = HubSession::new(identity(passive), "192.168.1.1:411");
        hub.on_connected();
        hub
    }

    #[test]
    fn test_login_sequence() {
        let mut hub = session(true);
        assert_eq!(hub.state(), HubState::AwaitingLock);

        let actions = hub.handle(
            Message::Lock {
                lock: b"FOO".to_vec(),
                pk: b"BAR".to_vec(),
            },
            &status(),
        );
        assert_eq!(
            actions,
            vec![HubAction::Send(Message::Key {
                key: b"4\x90/%DCN000%/".to_vec(),
            })]
        );
        assert_eq!(hub.state(), HubState::AwaitingHubName);

        let actions = hub.handle(
            Message::HubName {
                name: "Test Hub".to_string(),
            },
            &status(),
        );
        assert_eq!(
            actions,
            vec![HubAction::Send(Message::ValidateNick {
                nick: "me".to_string(),
            })]
        );

        let actions = hub.handle(Message::GetPass, &status());
        assert_eq!(
            actions,
            vec![HubAction::Send(Message::MyPass {
                password: "secret".to_string(),
            })]
        );

        let actions = hub.handle(
            Message::Hello {
                nick: "me".to_string(),
            },
            &status(),
        );
        assert_eq!(actions[0], HubAction::Validated);
        assert_eq!(
            actions[1],
            HubAction::Send(Message::Version {
                version: "1,0091".to_string(),
            })
        );
        assert_eq!(actions[2], HubAction::Send(Message::GetNickList));
        assert!(matches!(actions[3], HubAction::Send(Message::MyInfo(_))));
        assert!(hub.is_validated());
        assert_eq!(hub.state(), HubState::Validated);

        // A renamed hub after validation needs no second ValidateNick.
        let actions = hub.handle(
            Message::HubName {
                name: "Renamed".to_string(),
            },
            &status(),
        );
        assert!(actions.is_empty());
        assert_eq!(hub.hub_name(), Some("Renamed"));
    }

    #[test]
    fn test_my_info_wire_form() {
        let hub = session(true);
        let wire = MessageCodec::serialize(&hub.my_info(&status()));
        assert_eq!(
            wire,
            b"$MyINFO $ALL me <++ V:0.1.0,M:P,H:1/0/0,S:2,Dt:1.2.0/W>$ $DSL\x01$$1234$|".to_vec()
        );
    }

    #[test]
    fn test_rejections_close_the_session() {
        for message in [
            Message::BadPass,
            Message::HubIsFull,
            Message::ValidateDenied {
                nick: "me".to_string(),
            },
        ] {
            let actions = session(true).handle(message, &status());
            assert!(matches!(actions.as_slice(), [HubAction::Close { .. }]));
        }

        let mut anonymous = HubSession::new(
            IdentityConfig {
                password: None,
                ..identity(true)
            },
            "hub:411",
        );
        assert!(matches!(
            anonymous.handle(Message::GetPass, &status()).as_slice(),
            [HubAction::Close { .. }]
        ));
    }

    #[test]
    fn test_rev_connect_depends_on_mode() {
        let request = Message::RevConnectToMe {
            from: "peer".to_string(),
            to: "me".to_string(),
        };

        assert_eq!(
            session(true).handle(request.clone(), &status()),
            vec![HubAction::Send(Message::RevConnectToMe {
                from: "me".to_string(),
                to: "peer".to_string(),
            })]
        );
        assert_eq!(
            session(false).handle(request, &status()),
            vec![HubAction::Send(Message::ConnectToMe {
                nick: "peer".to_string(),
                address: "10.0.0.1".to_string(),
                port: 4000,
            })]
        );
    }

    #[test]
    fn test_connect_to_me_opens_peer_connection() {
        let actions = session(true).handle(
            Message::ConnectToMe {
                nick: "me".to_string(),
                address: "10.0.0.9".to_string(),
                port: 412,
            },
            &status(),
        );
        assert_eq!(
            actions,
            vec![HubAction::ConnectPeer {
                nick: "me".to_string(),
                address: "10.0.0.9".to_string(),
                port: 412,
            }]
        );
    }

    #[test]
    fn test_own_searches_are_ignored() {
        let mut hub = session(true);
        let own = SearchRequest::for_query(
            SearchOrigin::Passive {
                nick: "me".to_string(),
            },
            "song",
        );
        assert!(hub.handle(Message::Search(own), &status()).is_empty());

        let other = SearchRequest::for_query(
            SearchOrigin::Passive {
                nick: "you".to_string(),
            },
            "song",
        );
        assert_eq!(
            hub.handle(Message::Search(other.clone()), &status()),
            vec![HubAction::AnswerSearch(other)]
        );
    }

    #[test]
    fn test_search_result_for_passive_searcher() {
        let mut hub = session(true);
        hub.handle(
            Message::HubName {
                name: "Test Hub".to_string(),
            },
            &status(),
        );
        let request = SearchRequest::for_query(
            SearchOrigin::Passive {
                nick: "you".to_string(),
            },
            "song",
        );
        let listing = Listing {
            name: "music\\song.mp3".to_string(),
            path: PathBuf::from("/share/music/song.mp3"),
            size: 100,
            tth: None,
        };

        let result = hub.search_result(&listing, &request, &status());
        assert_eq!(
            result.to_args(),
            "me music\\song.mp3\x05100 2/3\x05Test Hub (192.168.1.1:411)\x05you"
        );
        assert_eq!(HubSession::result_limit(&request), PASSIVE_RESULT_LIMIT);

        let hashed = Listing {
            tth: Some("ABC".to_string()),
            ..listing
        };
        assert_eq!(
            hub.search_result(&hashed, &request, &status()).tth(),
            Some("ABC")
        );
    }

    #[test]
    fn test_outbound_requests_follow_mode() {
        assert_eq!(
            session(true).connect_request("peer"),
            Message::RevConnectToMe {
                from: "me".to_string(),
                to: "peer".to_string(),
            }
        );
        assert_eq!(
            session(false).search_origin(),
            SearchOrigin::Active {
                address: "10.0.0.1".to_string(),
                port: 4001,
            }
        );
    }

    #[test]
    fn test_unhandled_messages_are_forwarded() {
        let chat = Message::Chat {
            from: "you".to_string(),
            text: "hi".to_string(),
        };
        assert_eq!(
            session(true).handle(chat.clone(), &status()),
            vec![HubAction::Forward(chat)]
        );
    }
}
