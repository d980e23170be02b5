//! # Shared Value Types
//!
//! Small plain types exchanged between drivers and the client facade.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// TTL state of a key, mirroring Redis `TTL`/`PTTL` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl TtlStatus {
    /// Maps a `PTTL` integer reply (-2, -1, or milliseconds) to a status.
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -2 => TtlStatus::Missing,
            value if value < 0 => TtlStatus::NoExpiry,
            value => TtlStatus::ExpiresIn(Duration::from_millis(value as u64)),
        }
    }

    /// Remaining lifetime, if the key expires.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            TtlStatus::ExpiresIn(remaining) => Some(*remaining),
            _ => None,
        }
    }
}

/// How a batch of commands is sent in its single round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchMode {
    /// Pipelined, best-effort ordered, no atomicity.
    Pipeline,
    /// MULTI/EXEC, all-or-nothing at the backend.
    Transaction,
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchMode::Pipeline => f.write_str("pipeline"),
            BatchMode::Transaction => f.write_str("transaction"),
        }
    }
}

/// Deployment shape of the backend behind a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    /// One node, addressed with an optional database index.
    SingleNode,
    /// Several nodes with key-slot routing.
    Cluster,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::SingleNode => f.write_str("single-node"),
            Topology::Cluster => f.write_str("cluster"),
        }
    }
}

/// Message received on a pub/sub channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published on.
    pub channel: String,
    /// Raw message payload.
    pub payload: Bytes,
}

impl Message {
    /// Builds a message from a channel name and payload.
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Message {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Payload as UTF-8 text, replacing invalid sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
