//! Command line surface and runtime configuration for the server

use clap::Parser;
use shared::{WireFormat, DEFAULT_MAX_CLIENTS, DEFAULT_PORT, DEFAULT_TICKRATE};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Upper bound on how long one poll may block, and so on how stale a
/// broadcast snapshot can get while the server is idle.
pub const MAX_POLL_BUDGET: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative entity sync server")]
pub struct ServerArgs {
    /// Sets max players count who can connect to the server
    #[arg(short = 'c', long = "max_clients_count", default_value_t = DEFAULT_MAX_CLIENTS)]
    pub max_clients_count: u8,

    /// Sets server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Sets how many times per second the server updates
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_TICKRATE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub tickrate: u32,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Encoding for application messages (binary or text)
    #[arg(long, default_value_t = WireFormat::Binary)]
    pub wire: WireFormat,

    /// Milliseconds of silence before a client is dropped
    #[arg(long = "peer_timeout_ms", default_value_t = 5000)]
    pub peer_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_clients: u8,
    pub tickrate: u32,
    pub wire: WireFormat,
    pub peer_timeout: Duration,
}

impl ServerConfig {
    /// How long one Polling phase may block waiting for the first event:
    /// one tick's worth of milliseconds, capped at [`MAX_POLL_BUDGET`].
    pub fn poll_budget(&self) -> Duration {
        let millis = 1000 / u64::from(self.tickrate.max(1));
        Duration::from_millis(millis.max(1)).min(MAX_POLL_BUDGET)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_clients: DEFAULT_MAX_CLIENTS,
            tickrate: DEFAULT_TICKRATE,
            wire: WireFormat::default(),
            peer_timeout: shared::transport::DEFAULT_PEER_TIMEOUT,
        }
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            bind_addr: SocketAddr::new(args.bind, args.port),
            max_clients: args.max_clients_count,
            tickrate: args.tickrate,
            wire: args.wire,
            peer_timeout: Duration::from_millis(args.peer_timeout_ms),
        }
    }
}
