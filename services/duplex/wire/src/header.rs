//! Frame header processing for the wire protocol.
//!
//! Every frame starts with a 4-byte header right after its length prefix.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 4;

/// Frame types as defined in the wire protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    /// Client request to open a session
    Handshake = 0x01,
    /// Server answer to a handshake
    HandshakeAck = 0x02,
    /// Fragment of a logical message
    Data = 0x03,
    /// Close handshake
    Close = 0x04,
}

impl TryFrom<u8> for FrameType {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Handshake),
            0x02 => Ok(FrameType::HandshakeAck),
            0x03 => Ok(FrameType::Data),
            0x04 => Ok(FrameType::Close),
            _ => Err(crate::WireError::Type(value)),
        }
    }
}

bitflags! {
    /// Frame flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u16 {
        /// Final fragment of a logical message
        const FIN = 1 << 0;
    }
}

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Protocol version (must be 1)
    pub ver: u8,
    /// Frame type
    pub typ: FrameType,
    /// Frame flags
    pub flags: Flags,
}

impl FrameHeader {
    /// Create a header for the current wire version
    pub fn new(typ: FrameType, flags: Flags) -> Self {
        Self {
            ver: WIRE_VERSION,
            typ,
            flags,
        }
    }

    /// Encode the header into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ver);
        buf.put_u8(self.typ as u8);
        buf.put_u16(self.flags.bits());
    }

    /// Decode a header from the front of a buffer
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(crate::WireError::Malformed);
        }

        let ver = buf.get_u8();
        if ver != WIRE_VERSION {
            return Err(crate::WireError::Version(ver));
        }

        let typ = FrameType::try_from(buf.get_u8())?;
        let flags = Flags::from_bits(buf.get_u16()).ok_or(crate::WireError::Reserved)?;

        Ok(Self { ver, typ, flags })
    }
}
