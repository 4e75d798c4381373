//! Peer handshake and direction negotiation.
//!
//! The handshake is strictly linear. Each state accepts exactly one message
//! type; anything else is a protocol violation and ends the connection.
//! Both orderings are handled: the initiator sends `$MyNick`/`$Lock` up
//! front, the receiver sends its own pair once the initiator's lock arrives.

use crate::protocol::{
    Direction, Extensions, LockChallenge, Message, generate_key, random_direction_number,
};

use super::{Role, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    NickReceived,
    LockReceived,
    SupportsReceived,
    DirectionReceived,
    /// Key verified and direction settled
    Ready,
}

impl HandshakeState {
    /// Message the state is waiting for.
    pub fn expects(self) -> &'static str {
        match self {
            HandshakeState::Init => "MyNick",
            HandshakeState::NickReceived => "Lock",
            HandshakeState::LockReceived => "Supports",
            HandshakeState::SupportsReceived => "Direction",
            HandshakeState::DirectionReceived => "Key",
            HandshakeState::Ready => "nothing",
        }
    }
}

/// Output of one handshake step.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerAction {
    Send(Message),
    /// The remote nick is known; the driver should settle our direction with
    /// [`PeerHandshake::set_local_direction`] before feeding the next message.
    Identified { nick: String },
    Ready { role: Role },
}

/// Per-connection handshake state.
#[derive(Debug, Clone)]
pub struct PeerHandshake {
    own_nick: String,
    state: HandshakeState,
    challenge: LockChallenge,
    intro_sent: bool,
    local_direction: Direction,
    local_number: u32,
    remote_nick: Option<String>,
    remote_extensions: Extensions,
    remote_direction: Option<(Direction, u32)>,
}

impl PeerHandshake {
    pub fn new(own_nick: impl Into<String>) -> Self {
        Self {
            own_nick: own_nick.into(),
            state: HandshakeState::Init,
            challenge: LockChallenge::generate(),
            intro_sent: false,
            local_direction: Direction::Upload,
            local_number: random_direction_number(),
            remote_nick: None,
            remote_extensions: Extensions::default(),
            remote_direction: None,
        }
    }

    /// Fixes the tie-break number instead of drawing one at random.
    pub fn with_direction_number(mut self, number: u32) -> Self {
        self.local_number = number;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    pub fn remote_nick(&self) -> Option<&str> {
        self.remote_nick.as_deref()
    }

    pub fn remote_extensions(&self) -> &Extensions {
        &self.remote_extensions
    }

    pub fn local_direction(&self) -> Direction {
        self.local_direction
    }

    pub fn set_local_direction(&mut self, direction: Direction) {
        self.local_direction = direction;
    }

    /// Opening messages for the side that initiated the TCP connection.
    pub fn start(&mut self) -> Vec<Message> {
        self.intro_sent = true;
        self.intro()
    }

    /// Advances the handshake by one message.
    ///
    /// # Errors
    ///
    /// - `SessionError::OutOfOrder` - The message is not the one the current state expects
    /// - `SessionError::KeyMismatch` - The peer answered our lock with a wrong key
    /// - `SessionError::DirectionTie` - Both sides want to download with equal numbers
    pub fn handle(&mut self, message: Message) -> Result<Vec<PeerAction>, SessionError> {
        match (self.state, message) {
            (HandshakeState::Init, Message::MyNick { nick }) => {
                tracing::debug!("Peer identified as {}", nick);
                self.remote_nick = Some(nick.clone());
                self.state = HandshakeState::NickReceived;
                Ok(vec![PeerAction::Identified { nick }])
            }
            (HandshakeState::NickReceived, Message::Lock { lock, .. }) => {
                let mut actions = Vec::with_capacity(5);
                if !self.intro_sent {
                    self.intro_sent = true;
                    actions.extend(self.intro().into_iter().map(PeerAction::Send));
                }
                actions.push(PeerAction::Send(Message::Supports {
                    extensions: Extensions::ours(),
                }));
                actions.push(PeerAction::Send(Message::Direction {
                    direction: self.local_direction,
                    number: self.local_number,
                }));
                actions.push(PeerAction::Send(Message::Key {
                    key: generate_key(&lock),
                }));
                self.state = HandshakeState::LockReceived;
                Ok(actions)
            }
            (HandshakeState::LockReceived, Message::Supports { extensions }) => {
                self.remote_extensions = extensions;
                self.state = HandshakeState::SupportsReceived;
                Ok(Vec::new())
            }
            (HandshakeState::SupportsReceived, Message::Direction { direction, number }) => {
                self.remote_direction = Some((direction, number));
                self.state = HandshakeState::DirectionReceived;
                Ok(Vec::new())
            }
            (HandshakeState::DirectionReceived, Message::Key { key }) => {
                if key != self.challenge.expected_key() {
                    return Err(SessionError::KeyMismatch);
                }
                let remote = self.remote_direction.ok_or(SessionError::OutOfOrder {
                    expected: "Direction",
                    received: "Key",
                })?;
                let role = resolve_direction((self.local_direction, self.local_number), remote)?;
                self.state = HandshakeState::Ready;
                Ok(vec![PeerAction::Ready { role }])
            }
            (state, Message::KeepAlive) if state != HandshakeState::Ready => Ok(Vec::new()),
            (state, other) => Err(SessionError::OutOfOrder {
                expected: state.expects(),
                received: other.name(),
            }),
        }
    }

    fn intro(&self) -> Vec<Message> {
        vec![
            Message::MyNick {
                nick: self.own_nick.clone(),
            },
            Message::Lock {
                lock: self.challenge.lock.clone(),
                pk: self.challenge.pk.clone(),
            },
        ]
    }
}

/// Decides which side downloads.
///
/// A lone `Download` wins. When both sides want to download the smaller
/// number downloads; equal numbers leave no winner and abort the connection.
///
/// # Errors
///
/// - `SessionError::DirectionTie` - Both sides declared `Download` with the same number
pub fn resolve_direction(local: (Direction, u32), remote: (Direction, u32)) -> Result<Role, SessionError> {
    match (local.0, remote.0) {
        (Direction::Download, Direction::Upload) => Ok(Role::Downloader),
        (Direction::Upload, _) => Ok(Role::Uploader),
        (Direction::Download, Direction::Download) => match local.1.cmp(&remote.1) {
            std::cmp::Ordering::Less => Ok(Role::Downloader),
            std::cmp::Ordering::Greater => Ok(Role::Uploader),
            std::cmp::Ordering::Equal => Err(SessionError::DirectionTie { number: local.1 }),
        },
    }
}
