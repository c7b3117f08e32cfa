//! # Entity Sync Server Library
//!
//! Authoritative server for a real-time multiplayer spatial game. Clients
//! connect, receive an identity, report the position of their own entity every
//! tick, and get back a snapshot of every live entity at a fixed cadence.
//!
//! ## Core Responsibilities
//!
//! ### Identity Allocation
//! A bounded pool hands each new connection a small integer identity and takes
//! it back on disconnect. No identity is ever held by two live connections,
//! and returning an identity twice is refused.
//!
//! ### Connection Tracking
//! Every connected peer maps to exactly one identity and back. Updates from
//! peers that are not registered (for example ones that raced their own
//! disconnect) are dropped.
//!
//! ### State Broadcasting
//! Each tick the server takes one snapshot of the entity store, encodes it
//! once and sends the same bytes to every registered peer, so all clients see
//! the same server-side instant.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All registry and store mutations happen on the tick loop. A background task
//! only moves raw datagrams from the socket into a channel, so no locking is
//! needed around game state.
//!
//! ### Bounded Polling
//! A tick blocks at most one poll budget (derived from the tick rate and never
//! more than 50ms) waiting for network events, then drains everything queued
//! before mutating and broadcasting.
//!
//! ## Module Organization
//!
//! - `identity`: the identity pool
//! - `registry`: peer ↔ identity associations
//! - `store`: authoritative entity positions
//! - `transport`: UDP host producing connect/receive/disconnect events
//! - `config`: command line arguments and runtime configuration
//! - `network`: the tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         max_clients: 16,
//!         tickrate: 30,
//!         ..ServerConfig::default()
//!     };
//!
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod identity;
pub mod network;
pub mod registry;
pub mod store;
pub mod transport;
