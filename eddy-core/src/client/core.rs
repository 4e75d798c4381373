//! Client aggregate owned by the actor task.
//!
//! Keeps the scheduler, the live peer links, the hub sender and the roster.
//! All mutation happens on the actor, so none of it is locked.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::commands::{ClientCommand, SearchQuery};
use super::handle::ClientLink;
use super::{ClientContext, ClientError};
use crate::config::EddyConfig;
use crate::events::{Event, EventBus};
use crate::network::{BoxedStream, PeerStream, TransportError, run_search_listener};
use crate::protocol::{Message, SearchRequest};
use crate::roster::Roster;
use crate::scheduler::{
    Download, DownloadFailure, DownloadId, DownloadRequest, DownloadScheduler, SchedulerAction,
};
use crate::session::{
    DownloadUpdate, HubContext, PeerCommand, PeerContext, PeerLink, Role, SessionSupervisor, hub,
    run_hub_connection, run_peer_connection,
};
use crate::share::LocalFileIndex;
use crate::slots::SharedSlotGate;

/// State of one running client.
pub struct ClientCore {
    config: EddyConfig,
    index: Arc<dyn LocalFileIndex>,
    events: EventBus,
    upload_slots: SharedSlotGate,
    link: Arc<ClientLink>,
    scheduler: DownloadScheduler,
    /// Download-direction connections, reused across downloads
    sessions: HashMap<String, PeerLink>,
    uploaders: HashMap<String, PeerLink>,
    timeouts: HashMap<String, JoinHandle<()>>,
    hub: Option<mpsc::UnboundedSender<Message>>,
    roster: Roster,
    file_lists: HashMap<String, (PathBuf, Instant)>,
    listeners: Vec<JoinHandle<()>>,
}

impl ClientCore {
    pub(crate) fn new(context: ClientContext, internal: mpsc::UnboundedSender<ClientCommand>) -> Self {
        let scheduler = DownloadScheduler::new(context.config.transfer.download_slots);
        Self {
            config: context.config,
            index: context.index,
            events: context.events,
            upload_slots: context.upload_slots,
            link: Arc::new(ClientLink::new(internal)),
            scheduler,
            sessions: HashMap::new(),
            uploaders: HashMap::new(),
            timeouts: HashMap::new(),
            hub: None,
            roster: Roster::new(),
            file_lists: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, request: DownloadRequest) -> Download {
        let download = self.scheduler.enqueue(request);
        tracing::info!("Queued {} from {} as {}", download.file, download.nick, download.id);
        if download.is_terminal() {
            self.publish_failure(&download);
        }
        self.tick();
        download
    }

    /// Reuses a cached catalog or queues a fresh download.
    pub fn request_file_list(&mut self, nick: &str) -> Option<Download> {
        let lifetime = self.config.transfer.file_list_lifetime;
        if let Some((path, fetched)) = self.file_lists.get(nick) {
            if fetched.elapsed() < lifetime {
                tracing::debug!("Reusing cached file list of {}", nick);
                self.events.publish(Event::FileListReady {
                    nick: nick.to_string(),
                    path: path.clone(),
                });
                return None;
            }
        }
        self.file_lists.remove(nick);
        Some(self.enqueue(DownloadRequest::file_list(nick)))
    }

    pub fn search(&self, query: SearchQuery) -> Result<(), ClientError> {
        let origin = hub::search_origin(&self.config.identity);
        let request = match &query {
            SearchQuery::Text(text) => SearchRequest::for_query(origin, text),
            SearchQuery::Tth(tth) => SearchRequest::for_tth(origin, tth),
        };
        self.send_hub(Message::Search(request))
    }

    pub fn send_chat(&self, text: String) -> Result<(), ClientError> {
        self.send_hub(Message::Chat {
            from: self.config.identity.nick.clone(),
            text,
        })
    }

    pub fn send_private(&self, to: String, text: String) -> Result<(), ClientError> {
        self.send_hub(Message::PrivateMessage {
            to,
            from: self.config.identity.nick.clone(),
            text,
        })
    }

    fn send_hub(&self, message: Message) -> Result<(), ClientError> {
        let hub = self.hub.as_ref().ok_or(ClientError::NotConnected)?;
        hub.send(message).map_err(|_| ClientError::NotConnected)
    }

    pub fn retry(&mut self, id: DownloadId) -> Result<Download, ClientError> {
        let download = self.scheduler.retry(id)?;
        self.tick();
        Ok(download)
    }

    pub fn remove(&mut self, nick: &str, file: &str) -> Option<Download> {
        let removed = self.scheduler.remove(nick, file)?;
        self.events.publish(Event::DownloadFailed {
            id: removed.id,
            nick: removed.nick.clone(),
            file: removed.file.clone(),
            reason: DownloadFailure::Removed,
        });
        Some(removed)
    }

    pub fn try_again(&mut self, nick: &str) -> Vec<Download> {
        let requeued = self.scheduler.try_again(nick);
        self.tick();
        requeued
    }

    pub fn downloads(&self) -> Vec<Download> {
        self.scheduler.downloads()
    }

    pub fn roster(&self) -> Vec<String> {
        self.roster.nicks()
    }

    pub fn has_download_for(&self, nick: &str) -> bool {
        self.scheduler.has_download_for(nick)
    }

    /// Dials the hub, then opens the listeners active mode needs.
    pub async fn connect_hub(&mut self) -> Result<(), ClientError> {
        let address = format!("{}:{}", self.config.hub.address, self.config.hub.port);
        let stream = match tokio::time::timeout(
            self.config.hub.connect_timeout,
            TcpStream::connect(&address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::HubUnreachable {
                    address,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ClientError::HubUnreachable {
                    address,
                    reason: "connect timed out".to_string(),
                });
            }
        };
        tracing::info!("Connected to hub {}", address);
        self.attach_hub(stream, address);

        if !self.config.identity.passive && self.listeners.is_empty() {
            self.start_listeners().await?;
        }
        Ok(())
    }

    /// Runs the hub session over `stream`.
    pub fn attach_hub<S: PeerStream>(&mut self, stream: S, hub_address: String) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        self.hub = Some(outbound);

        let ctx = HubContext {
            identity: self.config.identity.clone(),
            hub_address,
            index: Arc::clone(&self.index),
            upload_slots: self.upload_slots.clone(),
            events: self.events.clone(),
            supervisor: self.supervisor(),
        };
        tokio::spawn(async move {
            if let Err(e) = run_hub_connection(stream, ctx, receiver).await {
                tracing::warn!("Hub session ended: {}", e);
            }
        });
    }

    pub fn hub_address(&self) -> String {
        format!("{}:{}", self.config.hub.address, self.config.hub.port)
    }

    async fn start_listeners(&mut self) -> Result<(), ClientError> {
        let identity = &self.config.identity;
        let listener = TcpListener::bind(("0.0.0.0", identity.active_port))
            .await
            .map_err(TransportError::from)?;
        let socket = UdpSocket::bind(("0.0.0.0", identity.search_port))
            .await
            .map_err(TransportError::from)?;
        tracing::info!(
            "Listening for peers on {} and search results on {}",
            identity.active_port,
            identity.search_port
        );

        let ctx = self.peer_context();
        self.listeners.push(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        tracing::debug!("Accepted peer connection from {}", remote);
                        spawn_peer(stream, false, ctx.clone());
                    }
                    Err(e) => {
                        tracing::warn!("Peer listener failed: {}", e);
                        break;
                    }
                }
            }
        }));

        let events = self.events.clone();
        self.listeners.push(tokio::spawn(async move {
            if let Err(e) = run_search_listener(socket, events).await {
                tracing::warn!("Search listener failed: {}", e);
            }
        }));
        Ok(())
    }

    /// Runs a peer session over a stream the caller set up.
    pub fn attach_peer(&self, stream: BoxedStream, initiator: bool) {
        spawn_peer(stream, initiator, self.peer_context());
    }

    /// Dials a peer announced by the hub.
    ///
    /// Requests naming a nick the hub never listed are dropped.
    pub fn connect_peer(&self, nick: &str, address: String, port: u16) {
        if !self.roster.contains(nick) {
            tracing::info!("Ignoring $ConnectToMe for unknown nick {} ({}:{})", nick, address, port);
            return;
        }
        let ctx = self.peer_context();
        let limit = self.config.transfer.handshake_timeout;
        tokio::spawn(async move {
            let target = format!("{address}:{port}");
            match tokio::time::timeout(limit, TcpStream::connect(&target)).await {
                Ok(Ok(stream)) => {
                    tracing::debug!("Connected to peer at {}", target);
                    if let Err(e) = run_peer_connection(stream, true, ctx).await {
                        tracing::debug!("Peer session with {} ended early: {}", target, e);
                    }
                }
                Ok(Err(e)) => tracing::warn!("Cannot reach peer at {}: {}", target, e),
                Err(_) => tracing::warn!(
                    "{}",
                    TransportError::ConnectTimeout { address: target }
                ),
            }
        });
    }

    pub fn on_peer_ready(&mut self, nick: String, role: Role, link: PeerLink) {
        if let Some(timer) = self.timeouts.remove(&nick) {
            timer.abort();
        }

        let actions = match role {
            Role::Downloader => {
                self.sessions.insert(nick.clone(), link);
                self.scheduler.session_ready(&nick)
            }
            Role::Uploader => {
                self.uploaders.insert(nick.clone(), link);
                self.scheduler.session_deferred(&nick)
            }
        };
        self.execute(actions);
    }

    pub fn on_peer_closed(&mut self, nick: &str, role: Option<Role>) {
        match role {
            Some(Role::Downloader) => {
                let stale = self.sessions.get(nick).is_none_or(|link| link.is_closed());
                if stale {
                    self.sessions.remove(nick);
                    if let Some(id) = self.scheduler.session_closed(nick) {
                        self.fail(
                            id,
                            DownloadFailure::Disconnected {
                                reason: "Peer connection closed".to_string(),
                            },
                        );
                    }
                }
            }
            Some(Role::Uploader) => {
                if self.uploaders.get(nick).is_some_and(|link| link.is_closed()) {
                    self.uploaders.remove(nick);
                }
                let actions = self.scheduler.release_deferred(nick);
                self.execute(actions);
            }
            None => {}
        }
        self.tick();
    }

    pub fn on_download_update(&mut self, nick: &str, update: DownloadUpdate) {
        match update {
            DownloadUpdate::Started { id, size } => {
                self.scheduler.on_started(id, size);
                if let Some(download) = self.scheduler.download(id) {
                    self.events.publish(Event::DownloadStarted {
                        id,
                        nick: download.nick.clone(),
                        file: download.file.clone(),
                        size,
                    });
                }
            }
            DownloadUpdate::Progress {
                id,
                received,
                size,
                percent,
            } => {
                self.scheduler.on_progress(id, percent);
                if let Some(download) = self.scheduler.download(id) {
                    self.events.publish(Event::DownloadProgress {
                        id,
                        nick: download.nick.clone(),
                        file: download.file.clone(),
                        received,
                        size,
                        percent,
                    });
                }
            }
            DownloadUpdate::Finished { id, path } => {
                let Some(download) = self.scheduler.on_finished(id, path.clone()) else {
                    return;
                };
                tracing::info!("Finished {} from {}", download.file, nick);
                self.events.publish(Event::DownloadFinished {
                    id,
                    nick: download.nick.clone(),
                    file: download.file.clone(),
                    path: path.clone(),
                });

                if download.is_file_list() {
                    // The peer connection closes itself after a catalog.
                    self.sessions.remove(nick);
                    self.scheduler.session_closed(nick);
                    self.file_lists
                        .insert(nick.to_string(), (path.clone(), Instant::now()));
                    self.events.publish(Event::FileListReady {
                        nick: nick.to_string(),
                        path,
                    });
                }
                self.tick();
            }
            DownloadUpdate::Failed { id, reason } => {
                self.fail(id, reason);
                self.tick();
            }
        }
    }

    pub fn on_connect_timeout(&mut self, nick: &str) {
        self.timeouts.remove(nick);
        for download in self.scheduler.on_timeout(nick) {
            self.publish_failure(&download);
        }
        self.tick();
    }

    pub fn on_hub_message(&mut self, message: &Message) {
        self.roster.apply(message);
    }

    pub fn on_hub_closed(&mut self, reason: &str) {
        tracing::info!("Hub gone ({}), closing {} peer sessions", reason, self.sessions.len());
        self.hub = None;
        self.roster.clear();
        for link in self.sessions.values().chain(self.uploaders.values()) {
            let _ = link.send(PeerCommand::Close);
        }
    }

    /// Re-runs slot assignment, e.g. after an upload freed a peer.
    pub fn on_upload_finished(&mut self, nick: &str) {
        let actions = self.scheduler.release_deferred(nick);
        self.execute(actions);
    }

    pub fn shutdown(&mut self) {
        for (_, timer) in self.timeouts.drain() {
            timer.abort();
        }
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        for (_, link) in self.sessions.drain().chain(self.uploaders.drain()) {
            let _ = link.send(PeerCommand::Close);
        }
        self.hub = None;
    }

    pub fn tick(&mut self) {
        let actions = self.scheduler.tick();
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<SchedulerAction>) {
        for action in actions {
            match action {
                SchedulerAction::Connect { nick } => self.request_connection(nick),
                SchedulerAction::Begin { nick, ticket } => {
                    let id = ticket.id;
                    let delivered = self
                        .sessions
                        .get(&nick)
                        .is_some_and(|link| link.send(PeerCommand::Begin(ticket)).is_ok());
                    if !delivered {
                        // The download never started; reconnect for it.
                        tracing::debug!("Connection to {} is gone, requeueing {}", nick, id);
                        self.sessions.remove(&nick);
                        self.scheduler.session_closed(&nick);
                        self.scheduler.requeue_front(id);
                        self.tick();
                    }
                }
            }
        }
    }

    fn request_connection(&mut self, nick: String) {
        let message = hub::connect_request(&self.config.identity, &nick);
        if let Err(e) = self.send_hub(message) {
            tracing::warn!("Cannot request connection to {}: {}", nick, e);
        }

        let internal = self.link.clone();
        let limit = self.config.transfer.handshake_timeout;
        let timer_nick = nick.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            internal.post(ClientCommand::ConnectTimeout { nick: timer_nick });
        });
        if let Some(previous) = self.timeouts.insert(nick, timer) {
            previous.abort();
        }
    }

    fn fail(&mut self, id: DownloadId, reason: DownloadFailure) {
        if let Some(download) = self.scheduler.on_failed(id, reason) {
            self.publish_failure(&download);
        }
    }

    fn publish_failure(&self, download: &Download) {
        let reason = download.error.clone().unwrap_or(DownloadFailure::Timeout);
        tracing::info!("Download {} from {} failed: {}", download.file, download.nick, reason);
        self.events.publish(Event::DownloadFailed {
            id: download.id,
            nick: download.nick.clone(),
            file: download.file.clone(),
            reason,
        });
    }

    fn supervisor(&self) -> Arc<dyn SessionSupervisor> {
        self.link.clone()
    }

    fn peer_context(&self) -> PeerContext {
        PeerContext {
            own_nick: self.config.identity.nick.clone(),
            transfer: self.config.transfer.clone(),
            index: Arc::clone(&self.index),
            upload_slots: self.upload_slots.clone(),
            events: self.events.clone(),
            supervisor: self.supervisor(),
        }
    }
}

fn spawn_peer<S: PeerStream>(stream: S, initiator: bool, ctx: PeerContext) {
    tokio::spawn(async move {
        if let Err(e) = run_peer_connection(stream, initiator, ctx).await {
            tracing::debug!("Peer session ended early: {}", e);
        }
    });
}
