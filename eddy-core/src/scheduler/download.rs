//! Download records owned by the scheduler.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel file name requesting a peer's file catalog.
pub const FILE_LIST: &str = "file list";

/// Arena index of a download record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DownloadId(pub u64);

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Idle,
    Downloading,
    Finished,
    Failed,
    Timeout,
}

/// Why a download ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum DownloadFailure {
    #[error("Peer did not complete the handshake in time")]
    Timeout,

    #[error("Peer has no free upload slots")]
    NoSlots,

    #[error("Peer refused the request: {message}")]
    Rejected { message: String },

    #[error("Received {received} bytes, expected {expected}")]
    SizeMismatch { expected: u64, received: u64 },

    #[error("Peer did not announce a transfer length")]
    UnknownLength,

    #[error("Disconnected: {reason}")]
    Disconnected { reason: String },

    #[error("Local file error: {reason}")]
    Io { reason: String },

    #[error("Corrupt compressed stream: {reason}")]
    Decompression { reason: String },

    #[error("Removed from queue")]
    Removed,
}

/// One requested file transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub id: DownloadId,
    pub nick: String,
    /// Remote path, or [`FILE_LIST`] for the peer's catalog
    pub file: String,
    pub tth: Option<String>,
    /// Expected size when known
    pub size: Option<u64>,
    /// Resume point
    pub offset: u64,
    pub status: DownloadStatus,
    pub percent: f64,
    pub error: Option<DownloadFailure>,
    pub local_path: Option<PathBuf>,
    pub queued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Download {
    pub(crate) fn new(id: DownloadId, request: DownloadRequest) -> Self {
        Self {
            id,
            nick: request.nick,
            file: request.file,
            tth: request.tth,
            size: request.size,
            offset: request.offset,
            status: DownloadStatus::Idle,
            percent: 0.0,
            error: None,
            local_path: None,
            queued_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_file_list(&self) -> bool {
        self.file == FILE_LIST
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            DownloadStatus::Finished | DownloadStatus::Failed | DownloadStatus::Timeout
        )
    }

    /// Transfer parameters handed to a peer session.
    pub fn ticket(&self) -> DownloadTicket {
        DownloadTicket {
            id: self.id,
            nick: self.nick.clone(),
            file: self.file.clone(),
            tth: self.tth.clone(),
            size: self.size,
            offset: self.offset,
        }
    }
}

/// Parameters of a new download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub nick: String,
    pub file: String,
    pub tth: Option<String>,
    pub size: Option<u64>,
    pub offset: u64,
}

impl DownloadRequest {
    pub fn new(nick: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            file: file.into(),
            tth: None,
            size: None,
            offset: 0,
        }
    }

    /// Request for a peer's file catalog.
    pub fn file_list(nick: impl Into<String>) -> Self {
        Self::new(nick, FILE_LIST)
    }

    pub fn with_tth(mut self, tth: impl Into<String>) -> Self {
        self.tth = Some(tth.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// Immutable view of a download given to the session performing it.
///
/// Sessions report progress back by id; they never touch the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTicket {
    pub id: DownloadId,
    pub nick: String,
    pub file: String,
    pub tth: Option<String>,
    pub size: Option<u64>,
    pub offset: u64,
}

impl DownloadTicket {
    pub fn is_file_list(&self) -> bool {
        self.file == FILE_LIST
    }
}
