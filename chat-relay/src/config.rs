use std::{net::SocketAddr, time::Duration};

use crate::broadcast::EchoPolicy;

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_NAME: &str = "User";
pub const DEFAULT_PROMPT: &str = "Welcome! Type your name:";
pub const QUIT_COMMAND: &str = "/quit";
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by the listener and every session it spawns.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,
    /// Whether a sender receives its own lines back.
    pub echo: EchoPolicy,
    /// Name used when the handshake yields nothing usable.
    pub default_name: String,
    /// First line sent to every new connection.
    pub prompt: String,
    /// Line that ends a session, compared case-insensitively.
    pub quit_command: String,
    /// Announce joins as `"<name> joined from <addr>"` instead of `"<name> joined."`.
    pub announce_peer_address: bool,
    /// Upper bound on a single line write. A recipient that cannot accept a line within
    /// this window is treated as disconnected and closed, so one stalled reader only
    /// delays a broadcast by this much.
    pub write_timeout: Option<Duration>,
    /// Sessions that stay silent longer than this are closed.
    pub idle_timeout: Option<Duration>,
    /// Maximum concurrent connections, `0` for no limit.
    pub max_connections: usize,
    pub tcp_nodelay: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            echo: EchoPolicy::default(),
            default_name: DEFAULT_NAME.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            quit_command: QUIT_COMMAND.to_string(),
            announce_peer_address: false,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            idle_timeout: None,
            max_connections: 0,
            tcp_nodelay: true,
        }
    }
}

impl RelayConfig {
    /// Default settings bound to `addr`.
    pub fn with_bind_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Self::default()
        }
    }

    /// Returns true when `line` is the quit command.
    pub fn is_quit(&self, line: &str) -> bool {
        line.trim().eq_ignore_ascii_case(&self.quit_command)
    }

    /// Resolves the display name sent during the handshake.
    pub fn resolve_name(&self, candidate: Option<&str>) -> String {
        match candidate.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.default_name.clone(),
        }
    }
}
