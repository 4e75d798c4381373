//! Direct Connect wire protocol: message types, codec, and lock/key handshake.

pub mod handshake;
pub mod messages;
pub mod search;
pub mod types;

pub use handshake::{LockChallenge, generate_key, random_direction_number};
pub use messages::MessageCodec;
pub use search::{FileType, SearchOrigin, SearchRequest, SearchResult};
pub use types::{AdcTransfer, Direction, Extensions, Message, MyInfo};

/// Errors produced while decoding individual message fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid {field} in ${command}: {value:?}")]
    InvalidNumber {
        command: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Field {field} of ${command} is not valid UTF-8")]
    BadEncoding {
        command: &'static str,
        field: &'static str,
    },
}
