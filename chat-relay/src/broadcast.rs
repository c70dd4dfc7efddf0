//! Fan-out of chat lines and announcements to registered connections.

use std::sync::Arc;

use clap::ValueEnum;
use tracing::debug;

use crate::{
    connection::{Connection, ConnectionId},
    registry::Registry,
};

/// Whether a sender receives its own chat lines back.
///
/// A listener picks one policy at startup and every broadcast it makes follows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum EchoPolicy {
    /// Clients echo their own input locally; the relay skips the sender.
    #[default]
    SuppressSender,
    /// The relay is the single source of truth; everyone, sender included, gets the line.
    EchoToAll,
}

impl EchoPolicy {
    pub fn excludes_sender(self) -> bool {
        matches!(self, EchoPolicy::SuppressSender)
    }
}

/// A line on its way to the participants, plus who sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    text: String,
    origin: Option<ConnectionId>,
}

impl Message {
    /// `"<name>: <text>"` from `sender`.
    pub fn chat(sender: &Connection, text: &str) -> Self {
        Self {
            text: format!("{}: {}", sender.name(), text),
            origin: Some(sender.id()),
        }
    }

    /// A relay-generated line with no originating connection.
    pub fn announcement(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: None,
        }
    }

    pub fn joined(name: &str) -> Self {
        Self::announcement(format!("{name} joined."))
    }

    pub fn joined_from(name: &str, addr: impl std::fmt::Display) -> Self {
        Self::announcement(format!("{name} joined from {addr}"))
    }

    pub fn left(name: &str) -> Self {
        Self::announcement(format!("{name} left."))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> Option<ConnectionId> {
        self.origin
    }
}

/// Outcome of one broadcast call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers messages to a snapshot of the registry.
///
/// Writes happen one recipient at a time on the caller's task, so two messages broadcast
/// in sequence reach every recipient in that order. A stalled recipient delays the caller
/// for at most the connection's write timeout.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    policy: EchoPolicy,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, policy: EchoPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> EchoPolicy {
        self.policy
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Sends `message` to every current member, skipping its origin when the policy
    /// suppresses echo.
    ///
    /// A recipient whose write fails is counted and skipped; it closes itself and its own
    /// session handles the departure. Nothing here fails the caller.
    pub async fn broadcast(&self, message: &Message) -> BroadcastReport {
        let exclude_sender = self.policy.excludes_sender();
        let mut report = BroadcastReport::default();

        for target in self.registry.snapshot() {
            if exclude_sender && message.origin == Some(target.id()) {
                continue;
            }
            match target.write_line(&message.text).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    debug!(conn = target.id(), error = %err, "dropping delivery to recipient");
                    report.failed += 1;
                }
            }
        }

        debug!(
            origin = ?message.origin,
            delivered = report.delivered,
            failed = report.failed,
            "[relay] {}",
            message.text
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::named_connection;

    async fn registry_with(
        members: &[(ConnectionId, &str)],
    ) -> (Arc<Registry>, Vec<(Arc<Connection>, crate::testing::Peer)>) {
        let registry = Arc::new(Registry::new());
        let mut pairs = Vec::new();
        for (id, name) in members {
            let (connection, peer) = named_connection(*id, name).await;
            registry.add(&connection);
            pairs.push((connection, peer));
        }
        (registry, pairs)
    }

    #[tokio::test]
    async fn suppressed_echo_skips_the_sender() {
        let (registry, mut members) = registry_with(&[(1, "alice"), (2, "bob")]).await;
        let broadcaster = Broadcaster::new(registry, EchoPolicy::SuppressSender);

        let message = Message::chat(&members[0].0, "hi");
        let report = broadcaster.broadcast(&message).await;

        assert_eq!(report, BroadcastReport { delivered: 1, failed: 0 });
        assert_eq!(members[1].1.recv().await.as_deref(), Some("alice: hi"));
        members[0].1.expect_silence().await;
    }

    #[tokio::test]
    async fn echo_to_all_reaches_the_sender_once() {
        let (registry, mut members) = registry_with(&[(1, "alice"), (2, "bob")]).await;
        let broadcaster = Broadcaster::new(registry, EchoPolicy::EchoToAll);

        let message = Message::chat(&members[0].0, "hi");
        let report = broadcaster.broadcast(&message).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(members[0].1.recv().await.as_deref(), Some("alice: hi"));
        members[0].1.expect_silence().await;
        assert_eq!(members[1].1.recv().await.as_deref(), Some("alice: hi"));
    }

    #[tokio::test]
    async fn announcements_reach_everyone_under_either_policy() {
        let (registry, mut members) = registry_with(&[(1, "alice"), (2, "bob")]).await;
        let broadcaster = Broadcaster::new(registry, EchoPolicy::SuppressSender);

        broadcaster.broadcast(&Message::joined("carol")).await;

        for (_, peer) in members.iter_mut() {
            assert_eq!(peer.recv().await.as_deref(), Some("carol joined."));
        }
    }

    #[tokio::test]
    async fn closed_recipient_does_not_stop_the_fan_out() {
        let (registry, mut members) =
            registry_with(&[(1, "alice"), (2, "bob"), (3, "carol")]).await;
        members[1].0.close();
        let broadcaster = Broadcaster::new(Arc::clone(&registry), EchoPolicy::SuppressSender);

        let report = broadcaster
            .broadcast(&Message::announcement("server restarting"))
            .await;

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 1 });
        assert_eq!(members[0].1.recv().await.as_deref(), Some("server restarting"));
        assert_eq!(members[2].1.recv().await.as_deref(), Some("server restarting"));
        // Removal is left to the failed connection's own session.
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn sequential_broadcasts_arrive_in_order() {
        let (registry, mut members) = registry_with(&[(1, "alice"), (2, "bob")]).await;
        let broadcaster = Broadcaster::new(registry, EchoPolicy::SuppressSender);

        for n in 0..20 {
            let message = Message::chat(&members[0].0, &n.to_string());
            broadcaster.broadcast(&message).await;
        }

        for n in 0..20 {
            assert_eq!(members[1].1.recv().await, Some(format!("alice: {n}")));
        }
    }
}
