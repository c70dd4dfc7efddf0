//! Error types for the relay.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Failures surfaced by connections, sessions, and the listener.
///
/// Each variant is contained to the scope it occurs in: only [`RelayError::Bind`] ever
/// reaches the operator, everything else ends one session or one delivery.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listening socket could not be bound (port in use, permission denied).
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A single accept call failed; the accept loop keeps running.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// Reading from a peer failed.
    #[error("failed to read from peer: {0}")]
    Read(#[source] io::Error),

    /// The peer is gone or the write was refused.
    #[error("peer disconnected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
