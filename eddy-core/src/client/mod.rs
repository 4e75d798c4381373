//! Client aggregate run as a tokio actor.
//!
//! [`spawn_client`] starts the actor and hands back a [`ClientHandle`].
//! Sessions talk back to the actor through an internal channel, so the
//! scheduler, roster and peer links are only ever touched by one task.

pub mod actor;
pub mod commands;
pub mod core;
pub mod handle;

use std::sync::Arc;

pub use actor::spawn_client;
pub use commands::{ClientCommand, SearchQuery};
pub use self::core::ClientCore;
pub use handle::ClientHandle;

use crate::config::EddyConfig;
use crate::events::EventBus;
use crate::network::TransportError;
use crate::scheduler::SchedulerError;
use crate::share::LocalFileIndex;
use crate::slots::{SharedSlotGate, shared_gate};

/// Collaborators injected into the client.
#[derive(Clone)]
pub struct ClientContext {
    pub config: EddyConfig,
    pub index: Arc<dyn LocalFileIndex>,
    pub events: EventBus,
    pub upload_slots: SharedSlotGate,
}

impl ClientContext {
    /// Fresh event bus and an upload gate sized from the config.
    pub fn new(config: EddyConfig, index: Arc<dyn LocalFileIndex>) -> Self {
        let upload_slots = shared_gate(config.transfer.upload_slots);
        Self {
            config,
            index,
            events: EventBus::new(),
            upload_slots,
        }
    }
}

/// Errors returned through the [`ClientHandle`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Client actor has shut down")]
    ClientShutdown,

    #[error("Not connected to a hub")]
    NotConnected,

    #[error("Queue error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Cannot reach hub {address}: {reason}")]
    HubUnreachable { address: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
