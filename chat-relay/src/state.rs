use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tracing::info;

use crate::{
    broadcast::{BroadcastReport, Broadcaster, Message},
    config::RelayConfig,
    connection::{Connection, ConnectionId},
    registry::Registry,
};

/// State shared by the listener, every session, and operator handles.
pub struct RelayState {
    config: RelayConfig,
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    next_id: AtomicU64,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_registry(config, Arc::new(Registry::new()))
    }

    /// Builds the state around an existing registry.
    pub fn with_registry(config: RelayConfig, registry: Arc<Registry>) -> Self {
        let broadcaster = Broadcaster::new(Arc::clone(&registry), config.echo);
        Self {
            config,
            registry,
            broadcaster,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub(crate) fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Closes `connection`, drops it from the registry, and announces that it left.
    ///
    /// Every shutdown path funnels through here, so a session racing a forced disconnect
    /// still produces exactly one "left" line.
    pub async fn depart(&self, connection: &Connection) {
        connection.close();
        self.registry.remove(connection.id());
        if connection.mark_departed() {
            let name = connection.name();
            info!(conn = connection.id(), peer = %connection.peer_addr(), %name, "client left");
            self.broadcaster.broadcast(&Message::left(&name)).await;
        }
    }

    /// Forcibly ends the session registered under `id`. Returns `false` if no such session
    /// is registered.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        match self.registry.get(id) {
            Some(connection) => {
                self.depart(&connection).await;
                true
            }
            None => false,
        }
    }

    /// Forcibly ends every registered session. Returns how many were disconnected.
    pub async fn disconnect_all(&self) -> usize {
        let members = self.registry.snapshot();
        for connection in &members {
            self.depart(connection).await;
        }
        members.len()
    }

    /// Sends a relay-originated line to everyone.
    pub async fn announce(&self, text: impl Into<String>) -> BroadcastReport {
        self.broadcaster.broadcast(&Message::announcement(text)).await
    }
}
