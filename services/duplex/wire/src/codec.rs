//! CBOR metadata carried by handshake frames.
//!
//! Both handshake payloads are CBOR maps. Missing keys decode to their
//! defaults and unknown keys are ignored, so either side may announce more
//! than the other understands.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status a server acknowledges an accepted handshake with
pub const STATUS_OK: &str = "ok";

/// Payload of a `Handshake` frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeMeta {
    /// Wire version spoken by the client
    pub version: u32,
    /// Host the client connected to
    pub host: String,
    /// Target path requested by the client
    pub target: String,
    /// Client agent string
    pub agent: String,
}

/// Payload of a `HandshakeAck` frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckMeta {
    /// Wire version spoken by the server
    pub version: u32,
    /// Server agent string
    pub agent: String,
    /// [`STATUS_OK`] or the reason the handshake was refused
    pub status: String,
}

impl AckMeta {
    /// Whether the server accepted the handshake
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Wire protocol error
    #[error("wire error: {0}")]
    Wire(#[from] crate::WireError),
    /// Metadata encoding error
    #[error("metadata encoding failed")]
    MetaEncode,
    /// Metadata decoding error
    #[error("metadata decoding failed")]
    MetaDecode,
}

/// Encode handshake metadata as CBOR
pub fn encode_meta<T: Serialize>(meta: &T) -> Result<Bytes, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(meta, &mut buf).map_err(|_| CodecError::MetaEncode)?;
    Ok(Bytes::from(buf))
}

/// Decode handshake metadata from CBOR
pub fn decode_meta<T: DeserializeOwned>(raw: &[u8]) -> Result<T, CodecError> {
    ciborium::from_reader(raw).map_err(|_| CodecError::MetaDecode)
}
