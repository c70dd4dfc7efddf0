//! Accept loop: binds the port and dispatches one session task per connection.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    select,
    sync::{OwnedSemaphorePermit, Semaphore, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::BroadcastReport,
    config::RelayConfig,
    connection::{Connection, ConnectionId},
    error::{RelayError, Result},
    registry::Registry,
    session::ConnectionSession,
    state::RelayState,
};

const SERVER_FULL: &str = "Server is full, try again later.";
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// A bound relay that has not started accepting yet.
pub struct Listener {
    listener: TcpListener,
    state: Arc<RelayState>,
    stop: Arc<watch::Sender<bool>>,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Binds `config.bind_addr` with a fresh registry.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        Self::bind_with_state(Arc::new(RelayState::new(config))).await
    }

    /// Binds using caller-provided state, e.g. to share a registry with a test harness.
    pub async fn bind_with_state(state: Arc<RelayState>) -> Result<Self> {
        let addr = state.config().bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;

        let max = state.config().max_connections;
        let connection_limit = (max > 0).then(|| Arc::new(Semaphore::new(max)));
        let (stop, _) = watch::channel(false);

        Ok(Self {
            listener,
            state,
            stop: Arc::new(stop),
            connection_limit,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Control handle that stays valid while and after the accept loop runs.
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            state: Arc::clone(&self.state),
            stop: Arc::clone(&self.stop),
        }
    }

    /// Accepts until [`ListenerHandle::stop`] is called.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts until `shutdown` resolves or [`ListenerHandle::stop`] is called.
    ///
    /// Either way the listening socket is closed on return. Sessions already dispatched
    /// keep running; use [`ListenerHandle::disconnect_all`] to end them.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Listener {
            listener,
            state,
            stop,
            connection_limit,
        } = self;
        let mut stopped = stop.subscribe();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = stopped.wait_for(|stopped| *stopped) => {
                    info!("listener stopped");
                    break;
                }
                accepted = listener.accept() => {
                    handle_accept_result(accepted, &state, connection_limit.as_ref());
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
    connection_limit: Option<&Arc<Semaphore>>,
) {
    match result {
        Ok((stream, peer)) => {
            let permit = match connection_limit.map(|limit| Arc::clone(limit).try_acquire_owned()) {
                Some(Err(_)) => {
                    warn!(%peer, "connection rejected: limit reached");
                    tokio::spawn(reject(stream));
                    return;
                }
                Some(Ok(permit)) => Some(permit),
                None => None,
            };
            spawn_session(stream, peer, state, permit);
        }
        Err(err) => warn!(error = %RelayError::Accept(err), "accept failed"),
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<RelayState>,
    permit: Option<OwnedSemaphorePermit>,
) {
    let config = state.config();
    if config.tcp_nodelay {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = ?err, "failed to set TCP_NODELAY");
        }
    }

    let id = state.next_id();
    let connection =
        Arc::new(Connection::new(id, stream, peer).with_write_timeout(config.write_timeout));
    let session = ConnectionSession::new(connection, Arc::clone(state));
    info!(conn = id, %peer, "connection accepted");

    tokio::spawn(async move {
        let exit = session.run().await;
        drop(permit);
        info!(conn = id, %peer, ?exit, "connection closed");
    });
}

async fn reject(mut stream: TcpStream) {
    let notice = format!("{SERVER_FULL}\n");
    let _ = timeout(REJECT_WRITE_TIMEOUT, stream.write_all(notice.as_bytes())).await;
}

/// Operator-side control over a listener and its sessions.
#[derive(Clone)]
pub struct ListenerHandle {
    state: Arc<RelayState>,
    stop: Arc<watch::Sender<bool>>,
}

impl ListenerHandle {
    /// Makes the accept loop exit and close the listening socket. Idempotent.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.state.registry()
    }

    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        self.state.disconnect(id).await
    }

    pub async fn disconnect_all(&self) -> usize {
        self.state.disconnect_all().await
    }

    pub async fn announce(&self, text: impl Into<String>) -> BroadcastReport {
        self.state.announce(text).await
    }
}
