//! # Entity Sync Client Library
//!
//! Client side of the entity sync protocol. A client connects to the server,
//! learns which entity it owns, reports that entity's position every tick and
//! mirrors every other entity from the snapshots the server broadcasts.
//!
//! ## Threads
//!
//! Networking runs on its own OS thread with a dedicated tokio runtime (see
//! [`network::spawn_network_thread`]). The caller's thread is left for input
//! and drawing. The two sides only meet in [`world::SharedWorld`], which
//! guards all entity data behind a single mutex.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The [`network::SyncAgent`] state machine:
//! - Connecting: repeats the connect request until acknowledged or timed out
//! - AwaitingIdentity: waits for the server to name the local entity
//! - Syncing: sends the local position each tick, applies snapshots
//! - Disconnected: terminal, no automatic reconnect
//!
//! ### World Module (`world`)
//! The shared entity view and the rules for who may write what.
//!
//! ### Autopilot Module (`autopilot`)
//! A headless input source that wanders the local entity around, used by the
//! `client` binary in place of a window.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{spawn_network_thread, ClientConfig};
//! use client::world::SharedWorld;
//!
//! let world = SharedWorld::new();
//! let config = ClientConfig::new("127.0.0.1:25566".parse().unwrap());
//! let network = spawn_network_thread(config, world.clone()).unwrap();
//!
//! while !network.is_finished() {
//!     world.set_local_velocity((1.0, 0.0));
//!     world.integrate(0.016);
//!     for entity in world.entities() {
//!         println!("{} at ({}, {})", entity.identity, entity.x, entity.y);
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! ```

pub mod autopilot;
pub mod network;
pub mod world;
