//! Hub and peer session state machines and their async drivers.
//!
//! The state machines in [`hub`], [`peer`], [`download`] and [`upload`] turn
//! inbound messages into actions; [`connection`] owns the sockets and carries
//! the actions out. Sessions never touch the scheduler directly, they report
//! to a [`SessionSupervisor`].

pub mod connection;
pub mod download;
pub mod hub;
pub mod peer;
pub mod upload;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use connection::{HubContext, PeerContext, run_hub_connection, run_peer_connection};
pub use download::{DownloadSession, DownloadStep, FetchMethod, catalog_name, select_fetch};
pub use hub::{HubAction, HubSession, HubState, SelfStatus};
pub use peer::{HandshakeState, PeerAction, PeerHandshake, resolve_direction};
pub use upload::{UploadReply, UploadRequest, UploadSession, UploadStream};

use crate::network::TransportError;
use crate::protocol::{Direction, Message};
use crate::scheduler::{DownloadFailure, DownloadId, DownloadTicket};

/// Side of the transfer this client took on a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Downloader,
    Uploader,
}

impl Role {
    pub fn direction(self) -> Direction {
        match self {
            Role::Downloader => Direction::Download,
            Role::Uploader => Direction::Upload,
        }
    }
}

/// Instructions the client sends to a live peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    Begin(DownloadTicket),
    Close,
}

/// Sending half kept by the client for each download-direction connection.
pub type PeerLink = mpsc::UnboundedSender<PeerCommand>;

/// Download progress reported by a peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadUpdate {
    Started {
        id: DownloadId,
        size: u64,
    },
    Progress {
        id: DownloadId,
        received: u64,
        size: u64,
        percent: f64,
    },
    Finished {
        id: DownloadId,
        path: PathBuf,
    },
    Failed {
        id: DownloadId,
        reason: DownloadFailure,
    },
}

impl DownloadUpdate {
    pub fn id(&self) -> DownloadId {
        match self {
            DownloadUpdate::Started { id, .. }
            | DownloadUpdate::Progress { id, .. }
            | DownloadUpdate::Finished { id, .. }
            | DownloadUpdate::Failed { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadUpdate::Finished { .. } | DownloadUpdate::Failed { .. }
        )
    }
}

/// Errors that end a hub or peer connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Protocol violation: got {received} while waiting for {expected}")]
    OutOfOrder {
        expected: &'static str,
        received: &'static str,
    },

    #[error("Peer key does not match our lock")]
    KeyMismatch,

    #[error("Both sides want to download and picked the same number {number}")]
    DirectionTie { number: u32 },

    #[error("Handshake did not complete within {seconds}s")]
    HandshakeTimeout { seconds: u64 },

    #[error("Hub refused the session: {reason}")]
    HubRejected { reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression error: {reason}")]
    Compression { reason: String },
}

/// Owner of the sessions, notified of everything the scheduler and roster
/// care about.
///
/// Implemented by the client actor link; tests substitute recorders. Hub
/// callbacks default to no-ops so peer-only supervisors stay short.
#[async_trait]
pub trait SessionSupervisor: Send + Sync {
    /// Whether a download is queued or running for `nick`.
    async fn has_download_for(&self, nick: &str) -> bool;

    /// A peer handshake completed.
    fn peer_ready(&self, nick: &str, role: Role, link: PeerLink);

    /// A peer connection ended. `role` is `None` if the handshake never completed.
    fn peer_closed(&self, nick: &str, role: Option<Role>);

    fn download_update(&self, nick: &str, update: DownloadUpdate);

    /// The hub relayed a `$ConnectToMe` addressed to `nick`.
    fn connect_peer(&self, _nick: String, _address: String, _port: u16) {}

    /// Roster traffic from the hub.
    fn hub_message(&self, _message: Message) {}

    fn hub_closed(&self, _reason: String) {}
}
