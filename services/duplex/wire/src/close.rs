//! Close handshake payloads.

use bytes::{BufMut, Bytes, BytesMut};

/// Status code carried by a close frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Conversation finished normally
    Normal,
    /// Endpoint is going away (shutdown, cancellation)
    GoingAway,
    /// Peer violated the protocol
    ProtocolError,
    /// Peer sent something this endpoint cannot accept
    Unsupported,
    /// Unexpected condition on the closing endpoint
    InternalError,
    /// Any other code
    Other(u16),
}

impl From<u16> for CloseCode {
    fn from(value: u16) -> Self {
        match value {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::InternalError => 1011,
            CloseCode::Other(other) => other,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// Encode a close payload: u16 status code followed by a UTF-8 reason
pub fn encode_close(code: CloseCode, reason: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.put_u16(code.into());
    buf.put_slice(reason.as_bytes());
    buf.freeze()
}

/// Parse a close payload; an empty payload means a normal closure
pub fn parse_close(payload: &[u8]) -> Result<(CloseCode, String), crate::WireError> {
    match payload.len() {
        0 => Ok((CloseCode::Normal, String::new())),
        1 => Err(crate::WireError::Close),
        _ => {
            let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
            let reason =
                std::str::from_utf8(&payload[2..]).map_err(|_| crate::WireError::Close)?;
            Ok((code, reason.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(u16::from(CloseCode::Normal), 1000);
        assert_eq!(CloseCode::from(1011), CloseCode::InternalError);
        assert_eq!(CloseCode::from(4000), CloseCode::Other(4000));
        assert_eq!(CloseCode::GoingAway.to_string(), "1001");
    }

    #[test]
    fn test_empty_and_malformed_payloads() {
        assert_eq!(parse_close(&[]).unwrap(), (CloseCode::Normal, String::new()));
        assert!(parse_close(&[0x03]).is_err());
        assert!(parse_close(&[0x03, 0xE8, 0xFF, 0xFE]).is_err());
    }
}
