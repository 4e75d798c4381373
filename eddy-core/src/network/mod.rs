//! Network plumbing: framed connections, upload pacing and UDP search results.

pub mod datagram;
pub mod token_bucket;
pub mod transport;

use tokio::io::{AsyncRead, AsyncWrite};

pub use datagram::{run_search_listener, send_search_results};
pub use token_bucket::{TokenBucket, TokenBucketError};
pub use transport::{Connection, FrameBuffer, Inbound};

/// Any bidirectional byte stream a session can run over.
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased stream, used where TCP sockets and in-memory pipes mix.
pub type BoxedStream = Box<dyn PeerStream>;

/// Errors from socket I/O and connection setup.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection to {address} timed out")]
    ConnectTimeout { address: String },

    #[error("Connection closed by remote")]
    Closed,
}
