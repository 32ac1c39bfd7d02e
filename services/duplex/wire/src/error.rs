//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Reserved bits nonzero
    #[error("reserved bits nonzero")]
    Reserved,

    /// Unknown frame type
    #[error("unknown type {0}")]
    Type(u8),

    /// Close payload is not a status code followed by UTF-8
    #[error("malformed close payload")]
    Close,

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,
}
