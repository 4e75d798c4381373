//! Download queueing and slot arbitration.

pub mod download;
pub mod queue;

pub use download::{
    Download, DownloadFailure, DownloadId, DownloadRequest, DownloadStatus, DownloadTicket,
    FILE_LIST,
};
pub use queue::{DownloadScheduler, SchedulerAction};

/// Errors from queue manipulation requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Unknown download {id}")]
    UnknownDownload { id: DownloadId },

    #[error("Download {id} has not failed")]
    NotFailed { id: DownloadId },

    #[error("Peer {nick} is marked as timed out; use try_again first")]
    PeerTimedOut { nick: String },
}
