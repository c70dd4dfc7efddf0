use std::{net::IpAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    broadcast::EchoPolicy,
    config::{DEFAULT_PORT, RelayConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP chat clients.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Interface the relay binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Whether senders receive their own lines back.
    #[arg(long, value_enum, default_value_t = EchoPolicy::SuppressSender)]
    pub echo: EchoPolicy,

    /// Announce joins together with the client's address.
    #[arg(long)]
    pub announce_address: bool,

    /// Drop a recipient that cannot take a line within this many milliseconds (0 = wait forever).
    #[arg(long, default_value_t = 5000)]
    pub write_timeout_ms: u64,

    /// Close sessions that stay silent for this many seconds.
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Maximum simultaneous connections (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_connections: usize,
}

impl ServerArgs {
    pub fn to_config(&self) -> RelayConfig {
        RelayConfig {
            bind_addr: (self.host, self.port).into(),
            echo: self.echo,
            announce_peer_address: self.announce_address,
            write_timeout: (self.write_timeout_ms > 0)
                .then(|| Duration::from_millis(self.write_timeout_ms)),
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            max_connections: self.max_connections,
            ..RelayConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Relay host name or address.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Relay port.
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
