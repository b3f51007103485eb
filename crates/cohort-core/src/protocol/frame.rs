//! Frame layout and reassembly
//!
//! Every message is a single frame: a big-endian `u16` total length, a
//! version byte, a flags byte, a `u16` command, then the payload. The
//! length is back-patched at send time; the decoder dispatches a frame only
//! when exactly that many bytes have accumulated, tolerating arbitrary TCP
//! segmentation.

use crate::errors::{PacketError, ProtocolError};
use crate::packet::PacketBuffer;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Fixed frame header size: length (2) + version (1) + flags (1) + command (2)
pub const FRAME_HEADER_LEN: usize = 6;

/// Wire protocol version
pub const PROTOCOL_VERSION: u8 = 1;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Wire commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// Credentials and identity, sent by the connector after TCP connect
    Hello = 1,
    /// Accepter's identity, in reply to an accepted HELLO
    Welcome = 2,
    /// Membership gossip, forwarded exactly once
    ClientList = 3,
    /// Request to take over the active role
    Claim = 4,
    /// Announcement of the new active node
    NewMaster = 5,
    /// Application state transfer from the active node
    StateInfo = 6,
    /// Identity conflict: the recipient must drop this socket
    Duplicate = 7,
}

impl Command {
    /// Convert from the raw wire value; unknown commands are discarded
    /// upstream, so this returns `None` rather than an error
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Command::Hello),
            2 => Some(Command::Welcome),
            3 => Some(Command::ClientList),
            4 => Some(Command::Claim),
            5 => Some(Command::NewMaster),
            6 => Some(Command::StateInfo),
            7 => Some(Command::Duplicate),
            _ => None,
        }
    }

    /// Raw wire value
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

// ----------------------------------------------------------------------------
// Frame Header
// ----------------------------------------------------------------------------

/// Decoded 6-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u16,
    pub version: u8,
    pub flags: u8,
    pub command: u16,
}

impl FrameHeader {
    /// Consume the header fields from a buffer positioned at frame start
    pub fn decode(pkt: &mut PacketBuffer) -> Result<Self, PacketError> {
        Ok(Self {
            length: pkt.unpack_u16()?,
            version: pkt.unpack_u8()?,
            flags: pkt.unpack_u8()?,
            command: pkt.unpack_u16()?,
        })
    }

    /// The command, if this implementation knows it
    pub fn command(&self) -> Option<Command> {
        Command::from_u16(self.command)
    }
}

// ----------------------------------------------------------------------------
// Frame Assembly
// ----------------------------------------------------------------------------

/// Start an outgoing frame: zero length placeholder, version, flags, command
///
/// The final length is poked in by [`finish_frame`] once the payload is
/// packed.
pub fn begin_frame(cmd: Command) -> PacketBuffer {
    let mut pkt = PacketBuffer::new();
    pkt.pack_u16(0);
    pkt.pack_u8(PROTOCOL_VERSION);
    pkt.pack_u8(0);
    pkt.pack_u16(cmd.as_u16());
    pkt
}

/// Back-patch the total length at offset 0
pub fn finish_frame(pkt: &mut PacketBuffer) -> Result<(), PacketError> {
    let len = pkt.bytes_written();
    if len > u16::MAX as usize {
        return Err(PacketError::FieldTooLong { len });
    }
    pkt.poke_u16(0, len as u16)
}

// ----------------------------------------------------------------------------
// Reassembly
// ----------------------------------------------------------------------------

/// Extract the next whole frame from a reassembly buffer, if one has fully
/// arrived
///
/// Returns `Ok(None)` while bytes are still outstanding. A declared length
/// below the header size is a malformed stream; the caller drops the
/// buffer contents per the lenient error policy.
pub fn take_frame(buf: &mut PacketBuffer) -> Result<Option<Vec<u8>>, ProtocolError> {
    if buf.bytes_available() < 2 {
        return Ok(None);
    }
    let declared = buf.peek_u16(buf.bytes_read())?;
    if (declared as usize) < FRAME_HEADER_LEN {
        return Err(ProtocolError::ShortFrame(declared));
    }
    if buf.bytes_available() < declared as usize {
        return Ok(None);
    }
    let frame = buf.unpack_raw(declared as usize)?;
    buf.compact();
    Ok(Some(frame))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_finish_backpatches_length() {
        let mut pkt = begin_frame(Command::Claim);
        pkt.pack_u16(0);
        finish_frame(&mut pkt).unwrap();

        let bytes = pkt.as_slice();
        assert_eq!(bytes.len(), 8);
        assert_eq!(u16::from_be_bytes([bytes[0], bytes[1]]), 8);
        assert_eq!(bytes[2], PROTOCOL_VERSION);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 4);
    }

    #[test]
    fn test_take_frame_waits_for_all_bytes() {
        let mut pkt = begin_frame(Command::Hello);
        pkt.pack_string("x").unwrap();
        finish_frame(&mut pkt).unwrap();
        let wire = pkt.as_slice().to_vec();

        let mut reasm = PacketBuffer::new();

        // Feed one byte at a time; only the final byte completes the frame.
        for (i, b) in wire.iter().enumerate() {
            reasm.pack_u8(*b);
            let got = take_frame(&mut reasm).unwrap();
            if i + 1 < wire.len() {
                assert!(got.is_none(), "frame surfaced early at byte {}", i);
            } else {
                assert_eq!(got.unwrap(), wire);
            }
        }
        assert_eq!(reasm.bytes_available(), 0);
    }

    #[test]
    fn test_take_frame_splits_coalesced_frames() {
        let mut a = begin_frame(Command::Claim);
        a.pack_u16(0);
        finish_frame(&mut a).unwrap();
        let mut b = begin_frame(Command::Duplicate);
        finish_frame(&mut b).unwrap();

        let mut reasm = PacketBuffer::new();
        reasm.pack_raw(a.as_slice());
        reasm.pack_raw(b.as_slice());

        assert_eq!(take_frame(&mut reasm).unwrap().unwrap(), a.as_slice());
        assert_eq!(take_frame(&mut reasm).unwrap().unwrap(), b.as_slice());
        assert!(take_frame(&mut reasm).unwrap().is_none());
    }

    #[test]
    fn test_take_frame_rejects_short_declared_length() {
        let mut reasm = PacketBuffer::new();
        reasm.pack_u16(5); // below the 6-byte header
        assert!(matches!(
            take_frame(&mut reasm),
            Err(ProtocolError::ShortFrame(5))
        ));
    }

    #[test]
    fn test_unknown_command_decodes_to_none() {
        assert_eq!(Command::from_u16(0), None);
        assert_eq!(Command::from_u16(99), None);
        assert_eq!(Command::from_u16(3), Some(Command::ClientList));
    }
}
