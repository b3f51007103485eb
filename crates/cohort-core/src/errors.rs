//! Error types for the cohort coordination link
//!
//! Per-concern error enums unified into the crate-level [`LinkError`].
//! Nothing here is fatal to the link: protocol-level faults are recovered
//! locally (frame dropped, peer reaped) and the embedder only ever observes
//! active-role changes and state-transfer completions.

use crate::types::ConnId;

// ----------------------------------------------------------------------------
// Packet Buffer Errors
// ----------------------------------------------------------------------------

/// Errors from primitive pack/unpack operations on a packet buffer
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("buffer underrun: needed {needed} bytes, {available} available")]
    Underrun { needed: usize, available: usize },

    #[error("offset {offset} outside written range of {written} bytes")]
    BadOffset { offset: usize, written: usize },

    #[error("field of {len} bytes exceeds the u16 length prefix")]
    FieldTooLong { len: usize },
}

// ----------------------------------------------------------------------------
// Protocol Errors
// ----------------------------------------------------------------------------

/// Errors from framing and message decoding
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("declared frame length {0} below the 6-byte header")]
    ShortFrame(u16),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error("client list entry length {len} shorter than its decoded fields")]
    BadEntryLength { len: u16 },

    #[error("state entry declares {expected} data bytes but the frame ends early")]
    TruncatedState { expected: u16 },
}

// ----------------------------------------------------------------------------
// Driver Errors
// ----------------------------------------------------------------------------

/// Errors reported by a socket driver
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to bind listen port {port}: {reason}")]
    Bind { port: u16, reason: String },

    #[error("unknown connection {0}")]
    UnknownConnection(ConnId),

    #[error("driver is shut down")]
    Shutdown,
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Crate-level error type for the coordination link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("invalid join url: {url}")]
    InvalidUrl { url: String },
}

impl LinkError {
    /// Create an invalid-url error
    pub fn invalid_url<T: Into<String>>(url: T) -> Self {
        LinkError::InvalidUrl { url: url.into() }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, LinkError>;
