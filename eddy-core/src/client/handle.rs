//! Handle for communicating with the client actor.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::ClientError;
use super::commands::{ClientCommand, SearchQuery};
use crate::network::BoxedStream;
use crate::protocol::Message;
use crate::scheduler::{Download, DownloadId, DownloadRequest};
use crate::session::{DownloadUpdate, PeerLink, Role, SessionSupervisor};

/// Cloneable async API over the client actor.
#[derive(Clone)]
pub struct ClientHandle {
    sender: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    pub fn new(sender: mpsc::Sender<ClientCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ClientCommand,
    ) -> Result<T, ClientError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(build(responder))
            .await
            .map_err(|_| ClientError::ClientShutdown)?;
        rx.await.map_err(|_| ClientError::ClientShutdown)
    }

    /// Queues a download and returns its record.
    ///
    /// Queuing the same file twice for a nick returns the existing record.
    /// If the nick is marked timed out the record is already failed.
    pub async fn download(&self, request: DownloadRequest) -> Result<Download, ClientError> {
        self.request(|responder| ClientCommand::Download { request, responder })
            .await
    }

    /// Requests the file catalog of `nick`.
    ///
    /// Returns `None` when a cached catalog was reused; `FileListReady` is
    /// published in both cases.
    pub async fn file_list(&self, nick: &str) -> Result<Option<Download>, ClientError> {
        let nick = nick.to_string();
        self.request(|responder| ClientCommand::FileList { nick, responder })
            .await
    }

    /// Sends a search to the hub. Results arrive as `SearchResult` events.
    ///
    /// # Errors
    /// - `ClientError::NotConnected` - No hub session is running
    pub async fn search(&self, query: SearchQuery) -> Result<(), ClientError> {
        self.request(|responder| ClientCommand::Search { query, responder })
            .await?
    }

    /// Re-queues a failed download.
    ///
    /// # Errors
    /// - `ClientError::Scheduler` - Unknown id, not failed, or the peer is timed out
    pub async fn retry_download(&self, id: DownloadId) -> Result<Download, ClientError> {
        self.request(|responder| ClientCommand::RetryDownload { id, responder })
            .await?
    }

    /// Drops a download that has not started yet.
    pub async fn remove_download(
        &self,
        nick: &str,
        file: &str,
    ) -> Result<Option<Download>, ClientError> {
        let (nick, file) = (nick.to_string(), file.to_string());
        self.request(|responder| ClientCommand::RemoveDownload {
            nick,
            file,
            responder,
        })
        .await
    }

    pub async fn try_again(&self, nick: &str) -> Result<Vec<Download>, ClientError> {
        let nick = nick.to_string();
        self.request(|responder| ClientCommand::TryAgain { nick, responder })
            .await
    }

    pub async fn downloads(&self) -> Result<Vec<Download>, ClientError> {
        self.request(|responder| ClientCommand::Downloads { responder })
            .await
    }

    /// Nicks currently on the hub.
    pub async fn roster(&self) -> Result<Vec<String>, ClientError> {
        self.request(|responder| ClientCommand::Roster { responder })
            .await
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), ClientError> {
        let text = text.to_string();
        self.request(|responder| ClientCommand::SendChat { text, responder })
            .await?
    }

    pub async fn send_private(&self, to: &str, text: &str) -> Result<(), ClientError> {
        let (to, text) = (to.to_string(), text.to_string());
        self.request(|responder| ClientCommand::SendPrivate {
            to,
            text,
            responder,
        })
        .await?
    }

    /// Dials the configured hub and starts the session.
    ///
    /// In active mode this also opens the peer and search listeners.
    ///
    /// # Errors
    /// - `ClientError::HubUnreachable` - The hub could not be dialled in time
    /// - `ClientError::Transport` - A listener could not be bound
    pub async fn connect_hub(&self) -> Result<(), ClientError> {
        self.request(|responder| ClientCommand::ConnectHub { responder })
            .await?
    }

    /// Runs the hub session over a stream the caller connected.
    pub async fn attach_hub(&self, stream: BoxedStream) -> Result<(), ClientError> {
        self.request(|responder| ClientCommand::AttachHub { stream, responder })
            .await
    }

    /// Runs a peer session over a stream the caller connected or accepted.
    pub async fn attach_peer(&self, stream: BoxedStream, initiator: bool) -> Result<(), ClientError> {
        self.request(|responder| ClientCommand::AttachPeer {
            stream,
            initiator,
            responder,
        })
        .await
    }

    /// Closes every session and stops the actor.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.request(|responder| ClientCommand::Shutdown { responder })
            .await
    }
}

/// Session-side view of the actor, posting on the internal channel.
#[derive(Clone)]
pub(crate) struct ClientLink {
    internal: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientLink {
    pub(crate) fn new(internal: mpsc::UnboundedSender<ClientCommand>) -> Self {
        Self { internal }
    }

    pub(crate) fn post(&self, command: ClientCommand) {
        if self.internal.send(command).is_err() {
            tracing::debug!("Client actor gone, dropping session notification");
        }
    }
}

#[async_trait]
impl SessionSupervisor for ClientLink {
    async fn has_download_for(&self, nick: &str) -> bool {
        let (responder, rx) = oneshot::channel();
        self.post(ClientCommand::HasDownloadFor {
            nick: nick.to_string(),
            responder,
        });
        rx.await.unwrap_or(false)
    }

    fn peer_ready(&self, nick: &str, role: Role, link: PeerLink) {
        self.post(ClientCommand::PeerReady {
            nick: nick.to_string(),
            role,
            link,
        });
    }

    fn peer_closed(&self, nick: &str, role: Option<Role>) {
        self.post(ClientCommand::PeerClosed {
            nick: nick.to_string(),
            role,
        });
    }

    fn download_update(&self, nick: &str, update: DownloadUpdate) {
        self.post(ClientCommand::DownloadUpdate {
            nick: nick.to_string(),
            update,
        });
    }

    fn connect_peer(&self, nick: String, address: String, port: u16) {
        self.post(ClientCommand::ConnectPeer {
            nick,
            address,
            port,
        });
    }

    fn hub_message(&self, message: Message) {
        self.post(ClientCommand::HubMessage(message));
    }

    fn hub_closed(&self, reason: String) {
        self.post(ClientCommand::HubClosed { reason });
    }
}
