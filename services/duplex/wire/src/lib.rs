//! Fragment framing, close frames and handshake metadata for duplex sessions.
//!
//! This crate provides the low-level wire format that duplex sessions exchange
//! once a TCP connection is up: handshake frames, data fragments that make up
//! logical messages, and the close handshake.
//!
//! ## Features
//!
//! - **Fragmented Messages**: A logical message is one or more `Data` frames,
//!   the last one carrying the `FIN` flag
//! - **Zero-Copy I/O**: Uses `Bytes`/`BytesMut` for minimal allocations
//! - **Close Handshake**: `Close` frames carry a status code and a reason
//! - **CBOR Metadata**: Handshake parameters travel as a CBOR map
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 frame_len        | length of bytes that follow|
//! +----------------------+----------------------------+
//! | u8 version           | always WIRE_VERSION        |
//! +----------------------+----------------------------+
//! | u8 frame type        | handshake/ack/data/close   |
//! +----------------------+----------------------------+
//! | u16 flags            | FIN                        |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod close;
pub mod codec;
pub mod error;
pub mod frame;
pub mod header;

// Re-export main types
pub use close::{encode_close, parse_close, CloseCode};
pub use codec::{decode_meta, encode_meta, AckMeta, CodecError, HandshakeMeta, STATUS_OK};
pub use error::WireError;
pub use frame::{Frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE};
pub use header::{Flags, FrameHeader, FrameType, FRAME_HEADER_SIZE, WIRE_VERSION};
