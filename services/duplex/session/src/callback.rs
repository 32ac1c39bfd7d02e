//! Callback protocol between a session and the application.
//!
//! The application describes its conversation as a [`Callback`]: the session
//! hands it whatever bytes the last read produced and the callback answers
//! with a [`Decision`] telling the session which I/O step to perform next.
//! A conversation is half-duplex: a side finishes writing before it reads.

use bytes::Bytes;
use std::fmt;

/// Next step of a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Read a whole logical message (server role only)
    ReadFull,
    /// Read at most one bounded chunk of the current message
    ReadPartial,
    /// Write a non-final fragment, then ask again without reading
    WritePartial(Bytes),
    /// Write the final fragment, then read a whole logical message
    WriteCompleteThenRead(Bytes),
    /// Write the final fragment, then read one bounded chunk
    WriteCompleteThenReadPartial(Bytes),
    /// Terminate the conversation
    Close,
}

impl Decision {
    /// Non-final fragment
    pub fn write_partial(payload: impl Into<Bytes>) -> Self {
        Decision::WritePartial(payload.into())
    }

    /// Final fragment followed by a full read
    pub fn write_complete_then_read(payload: impl Into<Bytes>) -> Self {
        Decision::WriteCompleteThenRead(payload.into())
    }

    /// Final fragment followed by a bounded read
    pub fn write_complete_then_read_partial(payload: impl Into<Bytes>) -> Self {
        Decision::WriteCompleteThenReadPartial(payload.into())
    }

    /// Decision name for logs and error reports
    pub fn name(&self) -> &'static str {
        match self {
            Decision::ReadFull => "read_full",
            Decision::ReadPartial => "read_partial",
            Decision::WritePartial(_) => "write_partial",
            Decision::WriteCompleteThenRead(_) => "write_complete_then_read",
            Decision::WriteCompleteThenReadPartial(_) => "write_complete_then_read_partial",
            Decision::Close => "close",
        }
    }
}

/// Which side of the connection a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiated the connection
    Client,
    /// Accepted the connection
    Server,
}

impl Role {
    /// Whether a session in this role can carry out `decision`
    pub fn permits(&self, decision: &Decision) -> bool {
        match self {
            Role::Client => !matches!(decision, Decision::ReadFull),
            Role::Server => true,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Application state machine driven by a session
///
/// `decide` is called once per cycle with the bytes delivered by the most
/// recent read (`bytes` of them, zero after a write or right after the
/// connection opened) and whether the message being read is complete. The
/// buffer is cleared as soon as `decide` returns, so anything needed later
/// must be copied out. Implementations must not block or perform I/O.
///
/// Returning an error (or panicking) is a callback fault: the session reports
/// it and closes the connection.
pub trait Callback: Send + 'static {
    /// Decide the next step of the conversation
    fn decide(
        &mut self,
        buffer: &[u8],
        bytes: usize,
        message_complete: bool,
    ) -> anyhow::Result<Decision>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_full_is_server_only() {
        assert!(!Role::Client.permits(&Decision::ReadFull));
        assert!(Role::Server.permits(&Decision::ReadFull));

        for decision in [
            Decision::ReadPartial,
            Decision::write_partial("a"),
            Decision::write_complete_then_read("b"),
            Decision::write_complete_then_read_partial("c"),
            Decision::Close,
        ] {
            assert!(Role::Client.permits(&decision), "{}", decision.name());
            assert!(Role::Server.permits(&decision), "{}", decision.name());
        }
    }

    #[test]
    fn test_constructors() {
        assert_eq!(
            Decision::write_partial("00100"),
            Decision::WritePartial(Bytes::from_static(b"00100"))
        );
        assert_eq!(
            Decision::write_complete_then_read(String::from("hello")).name(),
            "write_complete_then_read"
        );
    }
}
