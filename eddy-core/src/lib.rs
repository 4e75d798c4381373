//! Eddy Core - Direct Connect client building blocks
//!
//! This crate provides the wire codec, framed transport, hub and peer session
//! state machines, download scheduling, upload slot gating and the client
//! actor that ties them together.

pub mod client;
pub mod config;
pub mod events;
pub mod network;
pub mod protocol;
pub mod roster;
pub mod scheduler;
pub mod session;
pub mod share;
pub mod slots;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use client::{ClientContext, ClientError, ClientHandle, SearchQuery, spawn_client};
pub use config::EddyConfig;
pub use events::{Event, EventBus};
pub use network::TransportError;
pub use protocol::{CodecError, Message};
pub use scheduler::{Download, DownloadFailure, DownloadId, DownloadRequest, SchedulerError};
pub use session::SessionError;
pub use share::{LocalFileIndex, MemoryIndex};

/// Errors that can bubble up from any Eddy subsystem.
#[derive(Debug, thiserror::Error)]
pub enum EddyError {
    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Queue error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EddyError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            EddyError::Codec(_) => "Received a malformed protocol message".to_string(),
            EddyError::Transport(TransportError::ConnectTimeout { address }) => {
                format!("Connection to {address} timed out")
            }
            EddyError::Transport(_) => "Network error occurred".to_string(),
            EddyError::Session(e) => match e {
                SessionError::HubRejected { reason } => format!("Hub refused login: {reason}"),
                SessionError::HandshakeTimeout { .. } => "Peer did not respond in time".to_string(),
                _ => "Peer session error occurred".to_string(),
            },
            EddyError::Scheduler(e) => e.to_string(),
            EddyError::Client(ClientError::HubUnreachable { address, .. }) => {
                format!("Could not connect to hub: {address}")
            }
            EddyError::Client(ClientError::NotConnected) => "Not connected to a hub".to_string(),
            EddyError::Client(_) => "Client has stopped".to_string(),
            EddyError::Configuration { .. } => "Configuration error occurred".to_string(),
            EddyError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EddyError::Configuration { .. }
                | EddyError::Scheduler(_)
                | EddyError::Client(ClientError::NotConnected)
        )
    }
}

pub type Result<T> = std::result::Result<T, EddyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DownloadId;

    #[test]
    fn test_user_messages() {
        let error = EddyError::Session(SessionError::HubRejected {
            reason: "Bad password".to_string(),
        });
        assert_eq!(error.user_message(), "Hub refused login: Bad password");
        assert!(!error.is_user_error());

        let error = EddyError::from(ClientError::HubUnreachable {
            address: "hub:411".to_string(),
            reason: "refused".to_string(),
        });
        assert_eq!(error.user_message(), "Could not connect to hub: hub:411");
    }

    #[test]
    fn test_user_errors() {
        assert!(EddyError::from(SchedulerError::UnknownDownload { id: DownloadId(3) }).is_user_error());
        assert!(
            EddyError::Configuration {
                reason: "bad port".to_string()
            }
            .is_user_error()
        );
        assert!(!EddyError::Io(std::io::Error::other("disk")).is_user_error());
    }
}
