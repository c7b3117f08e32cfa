//! Types and codecs shared by the sync server and its clients.
//!
//! The crate has two layers:
//! - [`transport`]: bincode-encoded [`Frame`]s that carry the connection
//!   lifecycle (connect, accept, disconnect) and ordered payloads.
//! - [`protocol`]: the application [`Message`]s carried inside payloads,
//!   encoded with either the binary or the tagged text [`WireFormat`].
//!
//! [`body`] holds the client-side ball sizing and contact rules, which never
//! travel over the wire.

pub mod body;
pub mod protocol;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use protocol::{DecodeError, EncodeError, Message, WireFormat};
pub use transport::{Frame, SequenceCounter, SequenceFilter};

pub const DEFAULT_PORT: u16 = 25566;
pub const DEFAULT_TICKRATE: u32 = 32;
pub const DEFAULT_MAX_CLIENTS: u8 = 32;
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest UDP payload we ever send or expect to receive.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Position every new entity starts at until its owner reports in.
pub const SPAWN_POSITION: (f32, f32) = (0.0, 0.0);

/// Small integer naming one connected player's entity for the lifetime of
/// its connection. Identities are recycled after a disconnect.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Identity(pub u8);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for Identity {
    fn from(value: u8) -> Self {
        Identity(value)
    }
}

/// One `(identity, x, y)` record as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub identity: Identity,
    pub x: f32,
    pub y: f32,
}

impl EntityState {
    pub fn new(identity: Identity, x: f32, y: f32) -> Self {
        Self { identity, x, y }
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}
