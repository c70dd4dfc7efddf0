//! Per-connection control loop: handshake, relay lines, tear down.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info};

use crate::{broadcast::Message, connection::Connection, state::RelayState};

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Handshaking,
    Active,
    Closing,
    Closed,
}

/// Why a session left `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The client sent the quit command.
    Quit,
    /// The peer closed its side.
    EndOfStream,
    /// Reading from the peer failed.
    ReadFailure,
    /// No line arrived within the idle timeout.
    IdleTimeout,
    /// The connection was closed locally, by a failed write or an operator.
    Closed,
}

enum Inbound {
    Line(String),
    Exit(SessionExit),
}

pub struct ConnectionSession {
    connection: Arc<Connection>,
    state: Arc<RelayState>,
    phase: SessionState,
}

impl ConnectionSession {
    pub fn new(connection: Arc<Connection>, state: Arc<RelayState>) -> Self {
        Self {
            connection,
            state,
            phase: SessionState::Handshaking,
        }
    }

    pub fn phase(&self) -> SessionState {
        self.phase
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Drives the session to `Closed` and reports why it ended.
    pub async fn run(mut self) -> SessionExit {
        let pending = self.handshake().await;
        let exit = match pending {
            Some(exit) => exit,
            None => self.serve().await,
        };
        self.teardown(exit).await;
        exit
    }

    /// Prompts for a name and joins the registry. Never fails: an unusable reply becomes
    /// the default name. A reply that already ended the stream is handed back so the
    /// session can go straight to teardown after announcing the join.
    async fn handshake(&mut self) -> Option<SessionExit> {
        let state = Arc::clone(&self.state);
        let config = state.config();
        if let Err(err) = self.connection.write_line(&config.prompt).await {
            debug!(conn = self.connection.id(), error = %err, "failed to send prompt");
        }

        let (reply, pending) = match self.next_line().await {
            Inbound::Line(line) => (Some(line), None),
            Inbound::Exit(exit) => (None, Some(exit)),
        };
        let name = config.resolve_name(reply.as_deref());
        self.connection.set_name(&name);
        state.registry().add(&self.connection);
        self.transition(SessionState::Active);

        let peer = self.connection.peer_addr();
        info!(conn = self.connection.id(), %peer, %name, "client joined");
        let joined = if config.announce_peer_address {
            Message::joined_from(&name, peer)
        } else {
            Message::joined(&name)
        };
        state.broadcaster().broadcast(&joined).await;

        pending
    }

    async fn serve(&mut self) -> SessionExit {
        loop {
            match self.next_line().await {
                Inbound::Line(line) if self.state.config().is_quit(&line) => {
                    return SessionExit::Quit;
                }
                Inbound::Line(line) => {
                    let message = Message::chat(&self.connection, &line);
                    self.state.broadcaster().broadcast(&message).await;
                }
                Inbound::Exit(exit) => return exit,
            }
        }
    }

    async fn teardown(&mut self, exit: SessionExit) {
        self.transition(SessionState::Closing);
        debug!(conn = self.connection.id(), ?exit, "session closing");
        self.state.depart(&self.connection).await;
        self.transition(SessionState::Closed);
    }

    async fn next_line(&self) -> Inbound {
        let read = self.connection.read_line();
        let result = match self.state.config().idle_timeout {
            Some(limit) => match timeout(limit, read).await {
                Ok(result) => result,
                Err(_) => return Inbound::Exit(SessionExit::IdleTimeout),
            },
            None => read.await,
        };

        match result {
            Ok(Some(line)) => Inbound::Line(line),
            Ok(None) if self.connection.is_closed() => Inbound::Exit(SessionExit::Closed),
            Ok(None) => Inbound::Exit(SessionExit::EndOfStream),
            Err(err) => {
                debug!(conn = self.connection.id(), error = %err, "read failed");
                Inbound::Exit(SessionExit::ReadFailure)
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(next > self.phase, "{:?} -> {:?}", self.phase, next);
        debug!(conn = self.connection.id(), from = ?self.phase, to = ?next, "session transition");
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{io::AsyncWriteExt, task::JoinHandle};

    use super::*;
    use crate::{
        config::RelayConfig,
        testing::{Peer, connection_pair, named_connection},
    };

    struct Harness {
        state: Arc<RelayState>,
        observer: Peer,
        _observer_connection: Arc<Connection>,
    }

    async fn setup(config: RelayConfig) -> Harness {
        let state = Arc::new(RelayState::new(config));
        let (observer_connection, observer) = named_connection(100, "observer").await;
        state.registry().add(&observer_connection);
        Harness {
            state,
            observer,
            _observer_connection: observer_connection,
        }
    }

    async fn start(harness: &Harness, id: u64) -> (JoinHandle<SessionExit>, Peer) {
        let (connection, mut peer) = connection_pair(id).await;
        let session = ConnectionSession::new(connection, Arc::clone(&harness.state));
        assert_eq!(session.phase(), SessionState::Handshaking);
        let task = tokio::spawn(session.run());
        assert_eq!(peer.recv().await.as_deref(), Some("Welcome! Type your name:"));
        (task, peer)
    }

    #[tokio::test]
    async fn quit_command_is_not_relayed() {
        let mut harness = setup(RelayConfig::default()).await;
        let (task, mut peer) = start(&harness, 1).await;

        peer.send("bob").await;
        assert_eq!(peer.recv().await.as_deref(), Some("bob joined."));
        peer.send("hello").await;
        peer.send("/QUIT").await;

        assert_eq!(task.await.unwrap(), SessionExit::Quit);
        assert_eq!(harness.observer.recv().await.as_deref(), Some("bob joined."));
        assert_eq!(harness.observer.recv().await.as_deref(), Some("bob: hello"));
        assert_eq!(harness.observer.recv().await.as_deref(), Some("bob left."));
        harness.observer.expect_silence().await;
        assert_eq!(peer.recv().await, None);
        assert_eq!(harness.state.registry().len(), 1);
    }

    #[tokio::test]
    async fn blank_name_uses_the_default() {
        let mut harness = setup(RelayConfig::default()).await;
        let (task, mut peer) = start(&harness, 1).await;

        peer.send("   ").await;
        assert_eq!(
            harness.observer.recv().await.as_deref(),
            Some("User joined.")
        );
        peer.send("/quit").await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn end_of_stream_during_handshake_still_joins_then_leaves() {
        let mut harness = setup(RelayConfig::default()).await;
        let (task, peer) = start(&harness, 1).await;
        let (_reader, mut writer) = peer.into_parts();
        writer.shutdown().await.unwrap();

        assert_eq!(task.await.unwrap(), SessionExit::EndOfStream);
        assert_eq!(
            harness.observer.recv().await.as_deref(),
            Some("User joined.")
        );
        assert_eq!(harness.observer.recv().await.as_deref(), Some("User left."));
        assert!(!harness.state.registry().contains(1));
    }

    #[tokio::test]
    async fn join_can_include_the_peer_address() {
        let config = RelayConfig {
            announce_peer_address: true,
            ..RelayConfig::default()
        };
        let mut harness = setup(config).await;
        let (task, mut peer) = start(&harness, 1).await;

        peer.send("alice").await;
        let joined = harness.observer.recv().await.unwrap();
        assert!(joined.starts_with("alice joined from 127.0.0.1:"), "{joined}");
        peer.send("/quit").await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn idle_sessions_are_closed() {
        let config = RelayConfig {
            idle_timeout: Some(Duration::from_millis(100)),
            ..RelayConfig::default()
        };
        let mut harness = setup(config).await;
        let (task, mut peer) = start(&harness, 1).await;

        peer.send("sleepy").await;
        assert_eq!(task.await.unwrap(), SessionExit::IdleTimeout);
        assert_eq!(peer.recv().await.as_deref(), Some("sleepy joined."));
        assert_eq!(peer.recv().await, None);
        assert_eq!(harness.observer.recv().await.as_deref(), Some("sleepy joined."));
        assert_eq!(harness.observer.recv().await.as_deref(), Some("sleepy left."));
    }

    #[tokio::test]
    async fn forced_disconnect_ends_the_session_with_one_departure() {
        let mut harness = setup(RelayConfig::default()).await;
        let (task, mut peer) = start(&harness, 1).await;
        peer.send("carol").await;
        assert_eq!(harness.observer.recv().await.as_deref(), Some("carol joined."));

        assert!(harness.state.disconnect(1).await);

        assert_eq!(task.await.unwrap(), SessionExit::Closed);
        assert_eq!(harness.observer.recv().await.as_deref(), Some("carol left."));
        harness.observer.expect_silence().await;
    }
}
