//! Command definitions for the client actor.

use tokio::sync::oneshot;

use super::ClientError;
use crate::network::BoxedStream;
use crate::protocol::Message;
use crate::scheduler::{Download, DownloadId, DownloadRequest};
use crate::session::{DownloadUpdate, PeerLink, Role};

/// What to look for in an outbound search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Space separated terms matched against file names
    Text(String),
    /// Exact content hash
    Tth(String),
}

/// Commands processed by the client actor.
///
/// The first group comes from [`ClientHandle`](super::ClientHandle) and
/// carries a responder. The rest are posted by sessions and timers through
/// the internal channel.
pub enum ClientCommand {
    /// Queue a file download.
    Download {
        request: DownloadRequest,
        responder: oneshot::Sender<Download>,
    },
    /// Fetch a peer's file catalog unless a fresh copy is cached.
    FileList {
        nick: String,
        responder: oneshot::Sender<Option<Download>>,
    },
    Search {
        query: SearchQuery,
        responder: oneshot::Sender<Result<(), ClientError>>,
    },
    RetryDownload {
        id: DownloadId,
        responder: oneshot::Sender<Result<Download, ClientError>>,
    },
    RemoveDownload {
        nick: String,
        file: String,
        responder: oneshot::Sender<Option<Download>>,
    },
    /// Clear a timed-out mark and re-queue the nick's failed downloads.
    TryAgain {
        nick: String,
        responder: oneshot::Sender<Vec<Download>>,
    },
    Downloads {
        responder: oneshot::Sender<Vec<Download>>,
    },
    Roster {
        responder: oneshot::Sender<Vec<String>>,
    },
    SendChat {
        text: String,
        responder: oneshot::Sender<Result<(), ClientError>>,
    },
    SendPrivate {
        to: String,
        text: String,
        responder: oneshot::Sender<Result<(), ClientError>>,
    },
    /// Dial the configured hub.
    ConnectHub {
        responder: oneshot::Sender<Result<(), ClientError>>,
    },
    /// Run the hub session over an already connected stream.
    AttachHub {
        stream: BoxedStream,
        responder: oneshot::Sender<()>,
    },
    /// Run a peer session over an already connected stream.
    AttachPeer {
        stream: BoxedStream,
        initiator: bool,
        responder: oneshot::Sender<()>,
    },
    Shutdown {
        responder: oneshot::Sender<()>,
    },

    PeerReady {
        nick: String,
        role: Role,
        link: PeerLink,
    },
    PeerClosed {
        nick: String,
        role: Option<Role>,
    },
    DownloadUpdate {
        nick: String,
        update: DownloadUpdate,
    },
    /// Handshake timer for a requested connection expired.
    ConnectTimeout {
        nick: String,
    },
    HubMessage(Message),
    HubClosed {
        reason: String,
    },
    ConnectPeer {
        nick: String,
        address: String,
        port: u16,
    },
    HasDownloadFor {
        nick: String,
        responder: oneshot::Sender<bool>,
    },
}
