//! Connection layer carried directly in UDP datagrams.
//!
//! Connect and disconnect are transport events rather than application
//! messages. Application messages travel inside [`Frame::Payload`] with a
//! per-direction sequence number, and receivers drop anything older than the
//! newest payload already seen so delivery stays ordered.

use crate::protocol::WireFormat;
use crate::MAX_DATAGRAM_SIZE;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a client repeats `Connect` while waiting for `Accept`.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Silence after which the other side is considered gone.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Connect { protocol_version: u32 },
    Accept { wire: WireFormat },
    Payload { sequence: u32, data: Vec<u8> },
    Disconnect,
}

pub(crate) fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_DATAGRAM_SIZE as u64)
        .reject_trailing_bytes()
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, bincode::Error> {
    bincode_options().serialize(frame)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, bincode::Error> {
    bincode_options().deserialize(bytes)
}

/// Tracks the newest inbound payload sequence for one direction of a
/// connection.
#[derive(Debug, Default, Clone)]
pub struct SequenceFilter {
    newest: Option<u32>,
}

impl SequenceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `sequence` is newer than everything seen so far and
    /// records it. Duplicates and reordered stragglers return false.
    pub fn accept(&mut self, sequence: u32) -> bool {
        match self.newest {
            Some(newest) if sequence <= newest => false,
            _ => {
                self.newest = Some(sequence);
                true
            }
        }
    }
}

/// Hands out outbound payload sequence numbers for one direction.
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
    next: u32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.next;
        self.next = self.next.wrapping_add(1);
        sequence
    }
}
