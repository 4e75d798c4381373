//! Async drivers that own hub and peer sockets.
//!
//! Each driver runs on its own task, feeds inbound frames to the matching
//! state machine and executes the returned actions. Everything the client
//! must know goes through the [`SessionSupervisor`] or the event bus.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::download::{DownloadSession, DownloadStep};
use super::hub::{HubAction, HubSession, SelfStatus};
use super::peer::{PeerAction, PeerHandshake};
use super::upload::{UploadReply, UploadRequest, UploadSession, UploadStream};
use super::{DownloadUpdate, PeerCommand, Role, SessionError, SessionSupervisor};
use crate::config::{IdentityConfig, TransferConfig};
use crate::events::{Event, EventBus};
use crate::network::{Connection, Inbound, PeerStream, TransportError, send_search_results};
use crate::protocol::{Direction, Extensions, Message, SearchOrigin};
use crate::scheduler::{DownloadFailure, DownloadTicket};
use crate::share::LocalFileIndex;
use crate::slots::SharedSlotGate;

/// Shared collaborators for peer connections.
#[derive(Clone)]
pub struct PeerContext {
    pub own_nick: String,
    pub transfer: TransferConfig,
    pub index: Arc<dyn LocalFileIndex>,
    pub upload_slots: SharedSlotGate,
    pub events: EventBus,
    pub supervisor: Arc<dyn SessionSupervisor>,
}

/// Collaborators for the hub connection.
#[derive(Clone)]
pub struct HubContext {
    pub identity: IdentityConfig,
    /// `host:port` as dialled, echoed in search results
    pub hub_address: String,
    pub index: Arc<dyn LocalFileIndex>,
    pub upload_slots: SharedSlotGate,
    pub events: EventBus,
    pub supervisor: Arc<dyn SessionSupervisor>,
}

/// Runs a peer connection from handshake to close.
///
/// `initiator` is true when we dialled the socket and must send our lock
/// first. The supervisor hears `peer_ready` once direction is settled and
/// `peer_closed` when the socket goes away.
///
/// # Errors
///
/// - `SessionError::HandshakeTimeout` - The handshake did not finish in time
/// - `SessionError::KeyMismatch`, `OutOfOrder`, `DirectionTie` - The handshake failed
/// - `SessionError::Transport` - The socket failed during the handshake
pub async fn run_peer_connection<S: PeerStream>(
    stream: S,
    initiator: bool,
    ctx: PeerContext,
) -> Result<(), SessionError> {
    let mut conn = Connection::new(stream, "peer");
    let mut handshake = PeerHandshake::new(ctx.own_nick.clone());
    let limit = ctx.transfer.handshake_timeout;

    let negotiated = match tokio::time::timeout(
        limit,
        negotiate(&mut conn, &mut handshake, initiator, ctx.supervisor.as_ref()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(SessionError::HandshakeTimeout {
            seconds: limit.as_secs(),
        }),
    };

    let role = match negotiated {
        Ok(role) => role,
        Err(e) => {
            tracing::warn!("Handshake with {} failed: {}", conn.label(), e);
            if let Some(nick) = handshake.remote_nick() {
                ctx.supervisor.peer_closed(nick, None);
                ctx.events.publish(Event::PeerDisconnected {
                    nick: nick.to_string(),
                });
            }
            let _ = conn.shutdown().await;
            return Err(e);
        }
    };

    let nick = handshake.remote_nick().unwrap_or_default().to_string();
    tracing::info!("Peer {} ready, we are {:?}", nick, role);
    ctx.events.publish(Event::PeerConnected {
        nick: nick.clone(),
        direction: role.direction(),
    });

    let (link, commands) = mpsc::unbounded_channel();
    ctx.supervisor.peer_ready(&nick, role, link);

    let uploads = UploadSession::new(
        Arc::clone(&ctx.index),
        ctx.upload_slots.clone(),
        ctx.transfer.upload_chunk_size,
        ctx.transfer.upload_ops_per_second,
    );
    let peer = PeerLoop {
        conn,
        nick,
        role,
        extensions: handshake.remote_extensions().clone(),
        uploads,
        ctx,
        download: None,
        pending: None,
        streaming: None,
        closing: false,
    };
    peer.run(commands).await;
    Ok(())
}

async fn negotiate<S: PeerStream>(
    conn: &mut Connection<S>,
    handshake: &mut PeerHandshake,
    initiator: bool,
    supervisor: &dyn SessionSupervisor,
) -> Result<Role, SessionError> {
    if initiator {
        for message in handshake.start() {
            conn.send(&message).await?;
        }
        conn.flush().await?;
    }

    loop {
        let message = match conn.next_inbound().await? {
            Some(Inbound::Frame(message)) => message,
            Some(Inbound::Raw(_)) => continue,
            None => return Err(TransportError::Closed.into()),
        };
        tracing::debug!("{} <- {}", conn.label(), message.name());

        for action in handshake.handle(message)? {
            match action {
                PeerAction::Send(message) => conn.send(&message).await?,
                PeerAction::Identified { nick } => {
                    conn.set_label(format!("peer {nick}"));
                    if supervisor.has_download_for(&nick).await {
                        handshake.set_local_direction(Direction::Download);
                    }
                }
                PeerAction::Ready { role } => {
                    conn.flush().await?;
                    return Ok(role);
                }
            }
        }
        conn.flush().await?;
    }
}

/// Post-handshake state of one peer connection.
struct PeerLoop<S> {
    conn: Connection<S>,
    nick: String,
    role: Role,
    extensions: Extensions,
    uploads: UploadSession,
    ctx: PeerContext,
    download: Option<DownloadSession>,
    /// Accepted legacy upload waiting for `$Send`
    pending: Option<UploadStream>,
    streaming: Option<UploadStream>,
    closing: bool,
}

impl<S: PeerStream> PeerLoop<S> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PeerCommand>) {
        let mut commands_open = true;

        let reason = loop {
            if self.closing {
                break "Transfer complete".to_string();
            }

            tokio::select! {
                inbound = self.conn.next_inbound() => {
                    let outcome = match inbound {
                        Ok(Some(Inbound::Frame(message))) => self.on_frame(message).await,
                        Ok(Some(Inbound::Raw(data))) => self.on_raw(&data).await,
                        Ok(None) => break "Connection closed by remote".to_string(),
                        Err(e) => break e.to_string(),
                    };
                    if let Err(e) = outcome {
                        break e.to_string();
                    }
                }
                command = commands.recv(), if commands_open => match command {
                    Some(PeerCommand::Begin(ticket)) => {
                        if let Err(e) = self.begin_download(ticket).await {
                            break e.to_string();
                        }
                    }
                    Some(PeerCommand::Close) => break "Closed by client".to_string(),
                    None => commands_open = false,
                },
                _ = pace(&mut self.streaming), if self.streaming.is_some() => {
                    if let Err(e) = self.send_next_chunk().await {
                        break e.to_string();
                    }
                }
            }
        };

        commands.close();
        self.teardown(reason).await;
    }

    async fn on_frame(&mut self, message: Message) -> Result<(), SessionError> {
        tracing::debug!("{} <- {}", self.conn.label(), message.name());

        if let Some(download) = self.download.as_mut() {
            if let Some(steps) = download.on_message(&message).await {
                return self.apply(steps).await;
            }
        }

        if self.role == Role::Uploader {
            if let Some(request) = UploadRequest::from_message(&message) {
                return self.on_request(request).await;
            }
        }

        match message {
            Message::Send if self.role == Role::Uploader => self.start_pending().await,
            Message::Cancel if self.role == Role::Uploader => self.cancel_upload().await,
            Message::GetListLen => {
                tracing::debug!("Ignoring $GetListLen from {}", self.nick);
                Ok(())
            }
            Message::KeepAlive => Ok(()),
            other => {
                self.ctx.events.publish(Event::PeerMessage {
                    nick: self.nick.clone(),
                    message: other,
                });
                Ok(())
            }
        }
    }

    async fn on_raw(&mut self, data: &[u8]) -> Result<(), SessionError> {
        match self.download.as_mut() {
            Some(download) => {
                let steps = download.on_data(data).await;
                self.apply(steps).await
            }
            None => {
                tracing::warn!("Dropping {} unexpected raw bytes from {}", data.len(), self.nick);
                self.conn.exit_raw_mode();
                Ok(())
            }
        }
    }

    async fn begin_download(&mut self, ticket: DownloadTicket) -> Result<(), SessionError> {
        if self.role != Role::Downloader || self.download.is_some() {
            tracing::warn!("Connection to {} cannot take {} now", self.nick, ticket.file);
            self.ctx.supervisor.download_update(
                &self.nick,
                DownloadUpdate::Failed {
                    id: ticket.id,
                    reason: DownloadFailure::Disconnected {
                        reason: "Connection busy".to_string(),
                    },
                },
            );
            return Ok(());
        }

        let (session, request) = DownloadSession::begin(
            ticket,
            &self.extensions,
            self.ctx.transfer.download_dir.clone(),
            self.ctx.transfer.progress_step,
        );
        self.download = Some(session);
        self.conn.send(&request).await?;
        self.conn.flush().await?;
        Ok(())
    }

    async fn apply(&mut self, steps: Vec<DownloadStep>) -> Result<(), SessionError> {
        for step in steps {
            match step {
                DownloadStep::Send(message) => self.conn.send(&message).await?,
                DownloadStep::EnterRaw => self.conn.enter_raw_mode(),
                DownloadStep::ExitRaw => self.conn.exit_raw_mode(),
                DownloadStep::Update(update) => {
                    if update.is_terminal() {
                        self.download = None;
                    }
                    self.ctx.supervisor.download_update(&self.nick, update);
                }
                DownloadStep::Close => self.closing = true,
            }
        }
        self.conn.flush().await?;
        Ok(())
    }

    async fn on_request(&mut self, request: UploadRequest) -> Result<(), SessionError> {
        if self.streaming.is_some() || self.pending.is_some() {
            tracing::debug!("{} asked for {} while another upload runs", self.nick, request.identifier);
            self.conn.send(&Message::MaxedOut).await?;
            return self.conn.flush().await.map_err(Into::into);
        }

        match self.uploads.handle_request(&request).await {
            UploadReply::Reject(message) => {
                self.conn.send(&message).await?;
            }
            UploadReply::Stream { reply, stream } => {
                self.conn.send(&reply).await?;
                self.start_stream(stream);
            }
            UploadReply::AwaitSend { reply, stream } => {
                self.conn.send(&reply).await?;
                self.pending = Some(stream);
            }
        }
        self.conn.flush().await?;
        Ok(())
    }

    async fn start_pending(&mut self) -> Result<(), SessionError> {
        match self.pending.take() {
            Some(stream) => self.start_stream(stream),
            None => {
                tracing::warn!("{} sent $Send without a pending request", self.nick);
            }
        }
        Ok(())
    }

    fn start_stream(&mut self, stream: UploadStream) {
        tracing::info!("Uploading {} ({} bytes) to {}", stream.name(), stream.size(), self.nick);
        self.ctx.events.publish(Event::UploadStarted {
            nick: self.nick.clone(),
            file: stream.name().to_string(),
            size: stream.size(),
        });
        self.streaming = Some(stream);
    }

    async fn send_next_chunk(&mut self) -> Result<(), SessionError> {
        let Some(stream) = self.streaming.as_mut() else {
            return Ok(());
        };

        if let Some(chunk) = stream.next_chunk().await? {
            if !chunk.is_empty() {
                self.conn.send_raw(&chunk).await?;
            }
        }

        if stream.is_finished() {
            self.conn.flush().await?;
            if let Some(stream) = self.streaming.take() {
                tracing::info!("Upload of {} to {} complete", stream.name(), self.nick);
                self.publish_upload_end(&stream, true);
            }
        }
        Ok(())
    }

    async fn cancel_upload(&mut self) -> Result<(), SessionError> {
        let stream = self.streaming.take().or_else(|| self.pending.take());
        if let Some(stream) = stream {
            tracing::info!("{} cancelled upload of {}", self.nick, stream.name());
            self.publish_upload_end(&stream, false);
        }
        self.conn.send(&Message::Canceled).await?;
        self.conn.flush().await?;
        Ok(())
    }

    fn publish_upload_end(&self, stream: &UploadStream, completed: bool) {
        self.ctx.events.publish(Event::UploadFinished {
            nick: self.nick.clone(),
            file: stream.name().to_string(),
            sent: stream.sent(),
            completed,
        });
    }

    async fn teardown(mut self, reason: String) {
        tracing::info!("Closing connection to {}: {}", self.nick, reason);

        if let Some(mut download) = self.download.take() {
            let steps = download
                .abort(DownloadFailure::Disconnected {
                    reason: reason.clone(),
                })
                .await;
            for step in steps {
                if let DownloadStep::Update(update) = step {
                    self.ctx.supervisor.download_update(&self.nick, update);
                }
            }
        }

        if let Some(stream) = self.streaming.take().or_else(|| self.pending.take()) {
            self.publish_upload_end(&stream, false);
        }

        let _ = self.conn.shutdown().await;
        self.ctx.supervisor.peer_closed(&self.nick, Some(self.role));
        self.ctx.events.publish(Event::PeerDisconnected {
            nick: self.nick.clone(),
        });
    }
}

async fn pace(streaming: &mut Option<UploadStream>) {
    match streaming {
        Some(stream) => stream.pace().await,
        None => std::future::pending().await,
    }
}

/// Runs the hub connection until either side closes it.
///
/// `outbound` carries messages the client wants sent to the hub; dropping
/// its sender ends the session.
///
/// # Errors
///
/// - `SessionError::HubRejected` - The hub refused our nick or password
/// - `SessionError::Transport` - The socket failed
pub async fn run_hub_connection<S: PeerStream>(
    stream: S,
    ctx: HubContext,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) -> Result<(), SessionError> {
    let mut conn = Connection::new(stream, format!("hub {}", ctx.hub_address));
    let mut session = HubSession::new(ctx.identity.clone(), ctx.hub_address.clone());
    session.on_connected();
    ctx.events.publish(Event::HubConnected {
        address: ctx.hub_address.clone(),
    });

    let result = drive_hub(&mut conn, &mut session, &ctx, &mut outbound).await;
    let reason = match &result {
        Ok(()) => "Client shut down".to_string(),
        Err(e) => e.to_string(),
    };
    tracing::info!("Hub connection {} closed: {}", ctx.hub_address, reason);

    let _ = conn.shutdown().await;
    ctx.events.publish(Event::HubDisconnected {
        reason: reason.clone(),
    });
    ctx.supervisor.hub_closed(reason);
    result
}

async fn drive_hub<S: PeerStream>(
    conn: &mut Connection<S>,
    session: &mut HubSession,
    ctx: &HubContext,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
) -> Result<(), SessionError> {
    loop {
        tokio::select! {
            inbound = conn.next_inbound() => {
                let message = match inbound? {
                    Some(Inbound::Frame(message)) => message,
                    Some(Inbound::Raw(_)) => continue,
                    None => return Err(TransportError::Closed.into()),
                };
                tracing::debug!("{} <- {}", conn.label(), message.name());

                let status = self_status(ctx).await;
                for action in session.handle(message, &status) {
                    execute(conn, session, ctx, &status, action).await?;
                }
                conn.flush().await?;
            }
            message = outbound.recv() => match message {
                Some(message) => {
                    tracing::debug!("{} -> {}", conn.label(), message.name());
                    conn.send(&message).await?;
                    conn.flush().await?;
                }
                None => return Ok(()),
            },
        }
    }
}

async fn self_status(ctx: &HubContext) -> SelfStatus {
    let (open_slots, total_slots) = {
        let gate = ctx.upload_slots.lock();
        (gate.available(), gate.capacity())
    };
    SelfStatus {
        open_slots,
        total_slots,
        share_size: ctx.index.share_size().await,
    }
}

async fn execute<S: PeerStream>(
    conn: &mut Connection<S>,
    session: &HubSession,
    ctx: &HubContext,
    status: &SelfStatus,
    action: HubAction,
) -> Result<(), SessionError> {
    match action {
        HubAction::Send(message) => conn.send(&message).await?,
        HubAction::Close { reason } => return Err(SessionError::HubRejected { reason }),
        HubAction::ConnectPeer {
            nick,
            address,
            port,
        } => ctx.supervisor.connect_peer(nick, address, port),
        HubAction::AnswerSearch(request) => {
            let limit = HubSession::result_limit(&request);
            let results: Vec<_> = ctx
                .index
                .search(&request)
                .await
                .iter()
                .take(limit)
                .map(|listing| session.search_result(listing, &request, status))
                .collect();
            if results.is_empty() {
                return Ok(());
            }

            match &request.origin {
                SearchOrigin::Passive { .. } => {
                    for result in results {
                        conn.send(&Message::SearchResult(result)).await?;
                    }
                }
                SearchOrigin::Active { address, port } => {
                    let (address, port) = (address.clone(), *port);
                    tokio::spawn(async move {
                        if let Err(e) = send_search_results(&address, port, &results).await {
                            tracing::warn!("Failed to deliver search results to {}:{}: {}", address, port, e);
                        }
                    });
                }
            }
        }
        HubAction::Validated => {
            tracing::info!("Logged in to {} as {}", ctx.hub_address, session.nick());
            ctx.events.publish(Event::HubValidated {
                hub_name: session.hub_name().map(str::to_string),
            });
        }
        HubAction::Forward(message) => forward(ctx, message),
    }
    Ok(())
}

fn forward(ctx: &HubContext, message: Message) {
    match message {
        Message::Chat { from, text } => ctx.events.publish(Event::Chat { from, text }),
        Message::PrivateMessage { from, text, .. } => {
            ctx.events.publish(Event::PrivateMessage { from, text })
        }
        Message::SearchResult(result) => ctx.events.publish(Event::SearchResult(result)),
        roster @ (Message::Hello { .. }
        | Message::NickList { .. }
        | Message::OpList { .. }
        | Message::BotList { .. }
        | Message::MyInfo(_)
        | Message::UserIp { .. }
        | Message::Quit { .. }) => {
            ctx.supervisor.hub_message(roster.clone());
            ctx.events.publish(Event::Hub(roster));
        }
        other => ctx.events.publish(Event::Hub(other)),
    }
}
