//! Actor loop for the client.

use tokio::sync::mpsc;

use super::ClientContext;
use super::commands::ClientCommand;
use super::core::ClientCore;
use super::handle::ClientHandle;
use crate::events::Event;

/// Spawns the client actor and returns its handle.
///
/// Commands from handles and notifications from sessions are processed one
/// at a time, which linearizes every scheduler mutation.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use std::sync::Arc;
/// use eddy_core::client::{ClientContext, spawn_client};
/// use eddy_core::config::EddyConfig;
/// use eddy_core::share::MemoryIndex;
///
/// let context = ClientContext::new(EddyConfig::default(), Arc::new(MemoryIndex::new()));
/// let handle = spawn_client(context);
/// handle.connect_hub().await.ok();
/// # }
/// ```
pub fn spawn_client(context: ClientContext) -> ClientHandle {
    let (sender, receiver) = mpsc::channel(100);
    let (internal_sender, internal_receiver) = mpsc::unbounded_channel();
    let events = context.events.subscribe_channel();
    let core = ClientCore::new(context, internal_sender);

    tokio::spawn(async move {
        run_actor_loop(core, receiver, internal_receiver, events).await;
    });

    ClientHandle::new(sender)
}

async fn run_actor_loop(
    mut core: ClientCore,
    mut receiver: mpsc::Receiver<ClientCommand>,
    mut internal: mpsc::UnboundedReceiver<ClientCommand>,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    tracing::debug!("Client actor started");

    loop {
        tokio::select! {
            Some(command) = receiver.recv() => {
                if !handle_command(&mut core, command).await {
                    break;
                }
            }
            Some(command) = internal.recv() => {
                if !handle_command(&mut core, command).await {
                    break;
                }
            }
            Some(event) = events.recv() => {
                if let Event::UploadFinished { nick, .. } = event {
                    core.on_upload_finished(&nick);
                }
            }
            else => break,
        }
    }

    core.shutdown();
    tracing::debug!("Client actor stopped");
}

/// Handles a single command. Returns false once the actor should stop.
async fn handle_command(core: &mut ClientCore, command: ClientCommand) -> bool {
    match command {
        ClientCommand::Download { request, responder } => {
            let _ = responder.send(core.enqueue(request));
        }

        ClientCommand::FileList { nick, responder } => {
            let _ = responder.send(core.request_file_list(&nick));
        }

        ClientCommand::Search { query, responder } => {
            let _ = responder.send(core.search(query));
        }

        ClientCommand::RetryDownload { id, responder } => {
            let _ = responder.send(core.retry(id));
        }

        ClientCommand::RemoveDownload {
            nick,
            file,
            responder,
        } => {
            let _ = responder.send(core.remove(&nick, &file));
        }

        ClientCommand::TryAgain { nick, responder } => {
            let _ = responder.send(core.try_again(&nick));
        }

        ClientCommand::Downloads { responder } => {
            let _ = responder.send(core.downloads());
        }

        ClientCommand::Roster { responder } => {
            let _ = responder.send(core.roster());
        }

        ClientCommand::SendChat { text, responder } => {
            let _ = responder.send(core.send_chat(text));
        }

        ClientCommand::SendPrivate {
            to,
            text,
            responder,
        } => {
            let _ = responder.send(core.send_private(to, text));
        }

        ClientCommand::ConnectHub { responder } => {
            let result = core.connect_hub().await;
            let _ = responder.send(result);
        }

        ClientCommand::AttachHub { stream, responder } => {
            let address = core.hub_address();
            core.attach_hub(stream, address);
            let _ = responder.send(());
        }

        ClientCommand::AttachPeer {
            stream,
            initiator,
            responder,
        } => {
            core.attach_peer(stream, initiator);
            let _ = responder.send(());
        }

        ClientCommand::Shutdown { responder } => {
            tracing::debug!("Client actor shutting down");
            core.shutdown();
            let _ = responder.send(());
            return false;
        }

        ClientCommand::PeerReady { nick, role, link } => {
            core.on_peer_ready(nick, role, link);
        }

        ClientCommand::PeerClosed { nick, role } => {
            core.on_peer_closed(&nick, role);
        }

        ClientCommand::DownloadUpdate { nick, update } => {
            core.on_download_update(&nick, update);
        }

        ClientCommand::ConnectTimeout { nick } => {
            core.on_connect_timeout(&nick);
        }

        ClientCommand::HubMessage(message) => {
            core.on_hub_message(&message);
        }

        ClientCommand::HubClosed { reason } => {
            core.on_hub_closed(&reason);
        }

        ClientCommand::ConnectPeer {
            nick,
            address,
            port,
        } => {
            core.connect_peer(&nick, address, port);
        }

        ClientCommand::HasDownloadFor { nick, responder } => {
            let _ = responder.send(core.has_download_for(&nick));
        }
    }
    true
}
