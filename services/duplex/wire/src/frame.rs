//! Message framing for the wire protocol.
//!
//! This module provides the complete frame structure and the incremental
//! decoder used on the read side of a connection.

use crate::close::{encode_close, CloseCode};
use crate::header::{Flags, FrameHeader, FrameType, FRAME_HEADER_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Maximum frame size (16 MiB default, 64 MiB hard limit)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Hard maximum frame size limit (64 MiB)
pub const HARD_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Complete wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a data fragment; `fin` marks the last fragment of a message
    pub fn data(payload: Bytes, fin: bool) -> Self {
        let flags = if fin { Flags::FIN } else { Flags::empty() };
        Self::new(FrameHeader::new(FrameType::Data, flags), payload)
    }

    /// Create a close frame
    pub fn close(code: CloseCode, reason: &str) -> Self {
        Self::new(
            FrameHeader::new(FrameType::Close, Flags::FIN),
            encode_close(code, reason),
        )
    }

    /// Create a handshake request carrying CBOR metadata
    pub fn handshake(meta: Bytes) -> Self {
        Self::new(FrameHeader::new(FrameType::Handshake, Flags::FIN), meta)
    }

    /// Create a handshake acknowledgement carrying CBOR metadata
    pub fn handshake_ack(meta: Bytes) -> Self {
        Self::new(FrameHeader::new(FrameType::HandshakeAck, Flags::FIN), meta)
    }

    /// Frame type shortcut
    pub fn typ(&self) -> FrameType {
        self.header.typ
    }

    /// Whether this frame ends a logical message
    pub fn is_fin(&self) -> bool {
        self.header.flags.contains(Flags::FIN)
    }

    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        4 + FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode frame to a contiguous buffer
    pub fn encode(&self, max_frame_size: usize) -> Result<Bytes, crate::WireError> {
        let total_size = self.encoded_size();
        if total_size - 4 > max_frame_size.min(HARD_MAX_FRAME_SIZE) {
            return Err(crate::WireError::Size(total_size));
        }

        let mut buf = BytesMut::with_capacity(total_size);

        // Frame length (everything after this u32)
        buf.put_u32((total_size - 4) as u32);
        self.header.encode(&mut buf);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }
}

/// Frame decoder for parsing incoming frames
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder that rejects frames above `max_frame_size`
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(HARD_MAX_FRAME_SIZE),
        }
    }

    /// Decode one frame from a buffer
    ///
    /// Returns `Ok(None)` and leaves the buffer untouched when it does not yet
    /// hold a complete frame.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, crate::WireError> {
        // Need at least 4 bytes for frame length
        if buf.len() < 4 {
            return Ok(None);
        }

        let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if frame_len > self.max_frame_size {
            return Err(crate::WireError::Size(frame_len));
        }
        if frame_len < FRAME_HEADER_SIZE {
            return Err(crate::WireError::Malformed);
        }

        if buf.len() < 4 + frame_len {
            return Ok(None);
        }

        buf.advance(4);
        let mut frame_buf = buf.split_to(frame_len).freeze();
        let header = FrameHeader::decode(&mut frame_buf)?;
        trace!(
            "Decoded {:?} frame ({} payload bytes)",
            header.typ,
            frame_buf.len()
        );

        Ok(Some(Frame {
            header,
            payload: frame_buf,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
