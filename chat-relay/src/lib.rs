//! Line-oriented TCP chat relay.
//!
//! Clients connect, answer a name prompt, and from then on every line they send is
//! relayed to the other participants as `"<name>: <text>"`. Joins and departures are
//! announced to everyone. Nothing is persisted; the relay only forwards while a
//! connection is open.
//!
//! - [`connection`] wraps one accepted stream with line reads and writes.
//! - [`registry`] is the concurrency-safe set of joined connections.
//! - [`broadcast`] fans a message out to a registry snapshot under one echo policy.
//! - [`session`] runs the per-connection state machine.
//! - [`listener`] owns the accept loop and hands out operator handles.
//! - [`state`] bundles what sessions share and funnels every departure through one path.
//! - [`cli`] and [`client`] are the command-line surface and terminal client.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod registry;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use broadcast::{BroadcastReport, Broadcaster, EchoPolicy, Message};
pub use config::RelayConfig;
pub use connection::{Connection, ConnectionId};
pub use error::{RelayError, Result};
pub use listener::{Listener, ListenerHandle};
pub use registry::Registry;
pub use session::{ConnectionSession, SessionExit, SessionState};
pub use state::RelayState;
