//! Core types for the cohort coordination link
//!
//! This module defines the fundamental identifiers used throughout the link,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Node Identity
// ----------------------------------------------------------------------------

/// Canonical identity of a node: `(canonical_hostname, listen_port)`
///
/// Two string-equal canonical hosts with equal ports denote the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub host: String,
    pub port: u16,
}

impl NodeId {
    /// Create a new node identity
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ----------------------------------------------------------------------------
// Peer Handle
// ----------------------------------------------------------------------------

/// Stable handle for a peer record in the peer table
///
/// Handles are never reused within the lifetime of a link, so a stale handle
/// carried by a driver callback resolves to nothing instead of to an
/// unrelated peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Connection Handle
// ----------------------------------------------------------------------------

/// Opaque handle naming one connection inside a socket driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnId(u64);

impl ConnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// State Identifier
// ----------------------------------------------------------------------------

/// 16-bit identifier of one piece of distributed application state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(u16);

impl StateId {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl From<u16> for StateId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source
// ----------------------------------------------------------------------------

/// Monotonic time in whole seconds, as used by the reconnect scheduler
pub type Tick = u64;

/// Trait for providing monotonic timestamps
///
/// The link only compares ticks and adds second-granularity intervals to
/// them, so any monotonic seconds counter will do. Test drivers substitute
/// a virtual clock.
pub trait TimeSource {
    /// Current monotonic time in seconds
    fn now(&self) -> Tick;
}

/// Monotonic system clock, counted from link creation
#[derive(Debug)]
pub struct SystemTimeSource {
    origin: std::time::Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Tick {
        self.origin.elapsed().as_secs()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        let id = NodeId::new("alpha.lan", 27273);
        assert_eq!(id.to_string(), "alpha.lan:27273");
    }

    #[test]
    fn test_node_id_equality_is_exact() {
        let a = NodeId::new("alpha.lan", 27273);
        let b = NodeId::new("alpha.lan", 27273);
        let c = NodeId::new("Alpha.lan", 27273);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_handles_roundtrip_raw() {
        assert_eq!(ClientId::new(7).raw(), 7);
        assert_eq!(ConnId::new(9).raw(), 9);
        assert_eq!(StateId::new(42).raw(), 42);
    }
}
