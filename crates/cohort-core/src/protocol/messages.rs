//! Typed wire messages
//!
//! One struct per command, each encoding to a complete back-patched frame
//! and decoding from a buffer positioned just past the frame header. Field
//! layout is byte-exact; see the frame module for the header.

use crate::errors::{PacketError, ProtocolError};
use crate::packet::PacketBuffer;
use crate::protocol::frame::{begin_frame, finish_frame, Command, FRAME_HEADER_LEN};
use crate::types::StateId;

// ----------------------------------------------------------------------------
// Client List Flags
// ----------------------------------------------------------------------------

/// Absolute offset of the CLIENT_LIST flags word within its frame:
/// header, then the `u16` entry count
pub const CLIENT_LIST_FLAGS_OFFSET: usize = FRAME_HEADER_LEN + 2;

/// Flags carried by a CLIENT_LIST frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientListFlags(u16);

impl ClientListFlags {
    /// The recipient should re-broadcast this frame once
    pub const FORWARDABLE: Self = Self(1);

    /// The sender is the active node
    pub const I_AM_ACTIVE: Self = Self(2);

    /// The frame names the active node explicitly
    pub const HAS_ACTIVE_REF: Self = Self(4);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn is_forwardable(self) -> bool {
        (self.0 & Self::FORWARDABLE.0) != 0
    }

    pub const fn sender_is_active(self) -> bool {
        (self.0 & Self::I_AM_ACTIVE.0) != 0
    }

    pub const fn has_active_ref(self) -> bool {
        (self.0 & Self::HAS_ACTIVE_REF.0) != 0
    }

    pub fn with_forwardable(mut self) -> Self {
        self.0 |= Self::FORWARDABLE.0;
        self
    }

    pub fn with_sender_active(mut self) -> Self {
        self.0 |= Self::I_AM_ACTIVE.0;
        self
    }

    pub fn with_active_ref(mut self) -> Self {
        self.0 |= Self::HAS_ACTIVE_REF.0;
        self
    }

    pub fn without_forwardable(mut self) -> Self {
        self.0 &= !Self::FORWARDABLE.0;
        self
    }
}

// ----------------------------------------------------------------------------
// HELLO
// ----------------------------------------------------------------------------

/// Credentials and identity, sent by the connector immediately after
/// TCP connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl Hello {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut pkt = begin_frame(Command::Hello);
        pkt.pack_string(&self.username)?;
        pkt.pack_string(&self.password)?;
        pkt.pack_string(&self.host)?;
        pkt.pack_u16(self.port);
        finish_frame(&mut pkt)?;
        Ok(pkt.as_slice().to_vec())
    }

    pub fn decode(pkt: &mut PacketBuffer) -> Result<Self, PacketError> {
        Ok(Self {
            username: pkt.unpack_string()?,
            password: pkt.unpack_string()?,
            host: pkt.unpack_string()?,
            port: pkt.unpack_u16()?,
        })
    }
}

// ----------------------------------------------------------------------------
// WELCOME
// ----------------------------------------------------------------------------

/// Accepter's identity, in reply to an accepted HELLO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    pub host: String,
    pub port: u16,
}

impl Welcome {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut pkt = begin_frame(Command::Welcome);
        pkt.pack_string(&self.host)?;
        pkt.pack_u16(self.port);
        finish_frame(&mut pkt)?;
        Ok(pkt.as_slice().to_vec())
    }

    pub fn decode(pkt: &mut PacketBuffer) -> Result<Self, PacketError> {
        Ok(Self {
            host: pkt.unpack_string()?,
            port: pkt.unpack_u16()?,
        })
    }
}

// ----------------------------------------------------------------------------
// CLIENT_LIST
// ----------------------------------------------------------------------------

/// One gossiped peer entry
///
/// Entries carry their own length so fields can be appended later without
/// breaking older decoders; unknown tail bytes are skipped on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientListEntry {
    pub host: String,
    pub port: u16,
}

/// Membership gossip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientList {
    pub flags: ClientListFlags,
    /// Identity of the active node, present iff `HAS_ACTIVE_REF`
    pub active: Option<(String, u16)>,
    pub entries: Vec<ClientListEntry>,
}

impl ClientList {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut pkt = begin_frame(Command::ClientList);
        pkt.pack_u16(self.entries.len() as u16);
        pkt.pack_u16(self.flags.as_u16());

        if let Some((host, port)) = &self.active {
            pkt.pack_string(host)?;
            pkt.pack_u16(*port);
        }

        for entry in &self.entries {
            let start = pkt.bytes_written();
            pkt.pack_u16(0); // entry length, poked below
            pkt.pack_string(&entry.host)?;
            pkt.pack_u16(entry.port);
            pkt.poke_u16(start, (pkt.bytes_written() - start) as u16)?;
        }

        finish_frame(&mut pkt)?;
        Ok(pkt.as_slice().to_vec())
    }

    pub fn decode(pkt: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        let count = pkt.unpack_u16()?;
        let flags = ClientListFlags::new(pkt.unpack_u16()?);

        let active = if flags.has_active_ref() {
            let host = pkt.unpack_string()?;
            let port = pkt.unpack_u16()?;
            Some((host, port))
        } else {
            None
        };

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(Self::decode_entry(pkt)?);
        }

        Ok(Self {
            flags,
            active,
            entries,
        })
    }

    /// Decode one entry, skipping any trailing bytes newer senders appended
    pub fn decode_entry(pkt: &mut PacketBuffer) -> Result<ClientListEntry, ProtocolError> {
        let start = pkt.bytes_read();
        let len = pkt.unpack_u16()?;
        let host = pkt.unpack_string()?;
        let port = pkt.unpack_u16()?;

        let consumed = pkt.bytes_read() - start;
        if (len as usize) < consumed {
            return Err(ProtocolError::BadEntryLength { len });
        }
        pkt.skip(len as usize - consumed)?;

        Ok(ClientListEntry { host, port })
    }
}

// ----------------------------------------------------------------------------
// CLAIM
// ----------------------------------------------------------------------------

/// Request to take over the active role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Claim {
    pub reserved: u16,
}

impl Claim {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut pkt = begin_frame(Command::Claim);
        pkt.pack_u16(self.reserved);
        finish_frame(&mut pkt)?;
        Ok(pkt.as_slice().to_vec())
    }

    pub fn decode(pkt: &mut PacketBuffer) -> Result<Self, PacketError> {
        Ok(Self {
            reserved: pkt.unpack_u16()?,
        })
    }
}

// ----------------------------------------------------------------------------
// NEW_MASTER
// ----------------------------------------------------------------------------

/// Announcement of who the active node now is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMaster {
    pub host: String,
    pub port: u16,
}

impl NewMaster {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut pkt = begin_frame(Command::NewMaster);
        pkt.pack_string(&self.host)?;
        pkt.pack_u16(self.port);
        pkt.pack_u16(0); // reserved
        finish_frame(&mut pkt)?;
        Ok(pkt.as_slice().to_vec())
    }

    pub fn decode(pkt: &mut PacketBuffer) -> Result<Self, PacketError> {
        let host = pkt.unpack_string()?;
        let port = pkt.unpack_u16()?;
        let _reserved = pkt.unpack_u16()?;
        Ok(Self { host, port })
    }
}

// ----------------------------------------------------------------------------
// STATEINFO
// ----------------------------------------------------------------------------

/// One distributed state entry; an empty `data` means the provider had
/// nothing to report for this id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub id: StateId,
    pub data: Vec<u8>,
}

/// Application state pushed from the active node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    /// Active identity as the sender sees it; an empty host means unknown
    pub active_host: String,
    pub active_port: u16,
    pub entries: Vec<StateEntry>,
}

impl StateInfo {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut pkt = begin_frame(Command::StateInfo);
        pkt.pack_string(&self.active_host)?;
        pkt.pack_u16(self.active_port);
        pkt.pack_u16(self.entries.len() as u16);

        for entry in &self.entries {
            if entry.data.len() > u16::MAX as usize {
                return Err(PacketError::FieldTooLong {
                    len: entry.data.len(),
                });
            }
            pkt.pack_u16(entry.data.len() as u16);
            pkt.pack_u16(entry.id.raw());
            pkt.pack_raw(&entry.data);
        }

        finish_frame(&mut pkt)?;
        Ok(pkt.as_slice().to_vec())
    }

    pub fn decode(pkt: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        let active_host = pkt.unpack_string()?;
        let active_port = pkt.unpack_u16()?;
        let count = pkt.unpack_u16()?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let data_len = pkt.unpack_u16()?;
            let id = StateId::new(pkt.unpack_u16()?);
            let data = pkt
                .unpack_raw(data_len as usize)
                .map_err(|_| ProtocolError::TruncatedState { expected: data_len })?;
            entries.push(StateEntry { id, data });
        }

        Ok(Self {
            active_host,
            active_port,
            entries,
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
