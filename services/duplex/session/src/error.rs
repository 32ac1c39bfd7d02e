//! Error taxonomy for duplex sessions.
//!
//! Errors are classified at two levels: transport errors, raised by the
//! connection underneath a session and tagged with the [`Phase`] they occurred
//! in, and protocol errors raised by the session driver itself. Both map to a
//! stable [`ErrorCode`] whose [`ErrorCategory`] gives it a name and a message.

use duplex_wire::{CodecError, FrameType, WireError};
use once_cell::sync::Lazy;
use std::fmt;
use thiserror::Error;

/// Step of a session or listener during which an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Host name resolution
    Resolve,
    /// TCP connect
    Connect,
    /// Client handshake
    Handshake,
    /// Server handshake, or accepting a connection on a listener
    Accept,
    /// Reading from the transport
    Read,
    /// Writing to the transport
    Write,
    /// Closing the transport
    Close,
    /// Opening the listening socket
    Open,
    /// Configuring the listening socket
    SetOption,
    /// Binding the listening socket
    Bind,
    /// Starting to listen
    Listen,
}

impl Phase {
    /// Phase name as reported to failure sinks
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Resolve => "resolve",
            Phase::Connect => "connect",
            Phase::Handshake => "handshake",
            Phase::Accept => "accept",
            Phase::Read => "read",
            Phase::Write => "write",
            Phase::Close => "close",
            Phase::Open => "open",
            Phase::SetOption => "set_option",
            Phase::Bind => "bind",
            Phase::Listen => "listen",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named family of error codes
#[derive(Debug)]
pub struct ErrorCategory {
    name: &'static str,
    messages: &'static [(i32, &'static str)],
}

impl ErrorCategory {
    /// Category name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Human readable message for a code in this category
    pub fn message(&self, value: i32) -> &'static str {
        self.messages
            .iter()
            .find(|(code, _)| *code == value)
            .map(|(_, message)| *message)
            .unwrap_or("(unrecognized error)")
    }
}

static SESSION_CATEGORY: Lazy<ErrorCategory> = Lazy::new(|| ErrorCategory {
    name: "duplex_session",
    messages: &[(1, "unrecognised state"), (2, "unexpected exception")],
});

static TRANSPORT_CATEGORY: Lazy<ErrorCategory> = Lazy::new(|| ErrorCategory {
    name: "duplex_transport",
    messages: &[
        (1, "i/o error"),
        (2, "malformed frame"),
        (3, "closed by peer"),
        (4, "end of stream"),
        (5, "timed out"),
        (6, "no endpoints"),
        (7, "handshake rejected"),
        (8, "unexpected frame"),
        (9, "already closed"),
        (10, "cancelled"),
    ],
});

/// Category of errors raised by the session driver
pub fn session_category() -> &'static ErrorCategory {
    &SESSION_CATEGORY
}

/// Category of errors raised by the transport
pub fn transport_category() -> &'static ErrorCategory {
    &TRANSPORT_CATEGORY
}

/// A code within a category
#[derive(Debug, Clone, Copy)]
pub struct ErrorCode {
    value: i32,
    category: &'static ErrorCategory,
}

impl ErrorCode {
    /// Create a code in the given category
    pub fn new(value: i32, category: &'static ErrorCategory) -> Self {
        Self { value, category }
    }

    /// Numeric value
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Owning category
    pub fn category(&self) -> &'static ErrorCategory {
        self.category
    }

    /// Message for this code
    pub fn message(&self) -> &'static str {
        self.category.message(self.value)
    }
}

impl PartialEq for ErrorCode {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && std::ptr::eq(self.category, other.category)
    }
}

impl Eq for ErrorCode {}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.category.name(), self.value, self.message())
    }
}

/// Errors raised by the session driver itself
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrc {
    /// The callback returned a decision the session role does not support
    UnrecognisedState = 1,
    /// The callback failed while computing a decision
    UnexpectedException = 2,
}

/// Build the error code for a protocol error
pub fn make_error_code(errc: ProtocolErrc) -> ErrorCode {
    ErrorCode::new(errc as i32, session_category())
}

fn protocol_message(errc: &ProtocolErrc) -> &'static str {
    make_error_code(*errc).message()
}

impl From<ProtocolErrc> for ErrorCode {
    fn from(errc: ProtocolErrc) -> Self {
        make_error_code(errc)
    }
}

/// Errors reported by a transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The peer closed the conversation with a close frame
    #[error("connection closed by peer (code {0})")]
    ClosedByPeer(u16),

    /// The socket ended without a close frame
    #[error("end of stream")]
    Eof,

    /// A bounded operation did not finish in time
    #[error("operation timed out")]
    Timeout,

    /// Name resolution produced nothing to connect to
    #[error("no endpoints resolved for {0}")]
    NoEndpoints(String),

    /// The peer refused the handshake
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// A frame arrived that is not valid at this point of the conversation
    #[error("unexpected {0:?} frame")]
    UnexpectedFrame(FrameType),

    /// The transport has already been closed
    #[error("transport already closed")]
    AlreadyClosed,

    /// The session owning the transport was asked to shut down
    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        let value = match self {
            TransportError::Io(_) => 1,
            TransportError::Wire(_) => 2,
            TransportError::ClosedByPeer(_) => 3,
            TransportError::Eof => 4,
            TransportError::Timeout => 5,
            TransportError::NoEndpoints(_) => 6,
            TransportError::Rejected(_) => 7,
            TransportError::UnexpectedFrame(_) => 8,
            TransportError::AlreadyClosed => 9,
            TransportError::Cancelled => 10,
        };
        ErrorCode::new(value, transport_category())
    }

    /// Whether the connection is already torn down, so closing it is pointless
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TransportError::ClosedByPeer(_) | TransportError::AlreadyClosed
        )
    }
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Wire(wire) => TransportError::Wire(wire),
            other => TransportError::Rejected(other.to_string()),
        }
    }
}

/// Terminal error of a session or listener
#[derive(Error, Debug)]
pub enum SessionError {
    /// A transport step failed
    #[error("{phase}: {source}")]
    Transport {
        /// Step that failed
        phase: Phase,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },

    /// The session driver rejected what the callback did
    #[error("{}: {what}", protocol_message(.code))]
    Protocol {
        /// Protocol error kind
        code: ProtocolErrc,
        /// Description of what went wrong
        what: String,
    },
}

impl SessionError {
    /// Tag a transport error with the phase it happened in
    pub fn transport(phase: Phase, source: TransportError) -> Self {
        SessionError::Transport { phase, source }
    }

    /// Build a protocol error
    pub fn protocol(code: ProtocolErrc, what: impl Into<String>) -> Self {
        SessionError::Protocol {
            code,
            what: what.into(),
        }
    }

    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::Transport { source, .. } => source.code(),
            SessionError::Protocol { code, .. } => make_error_code(*code),
        }
    }

    /// Phase for transport errors, detail for protocol errors
    pub fn what(&self) -> &str {
        match self {
            SessionError::Transport { phase, .. } => phase.as_str(),
            SessionError::Protocol { what, .. } => what,
        }
    }

    /// Phase a transport error occurred in
    pub fn phase(&self) -> Option<Phase> {
        match self {
            SessionError::Transport { phase, .. } => Some(*phase),
            SessionError::Protocol { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_codes() {
        let code = make_error_code(ProtocolErrc::UnrecognisedState);
        assert_eq!(code.value(), 1);
        assert_eq!(code.message(), "unrecognised state");
        assert_eq!(code.category().name(), "duplex_session");
        assert_eq!(
            ErrorCode::from(ProtocolErrc::UnexpectedException).message(),
            "unexpected exception"
        );
        assert_eq!(session_category().message(99), "(unrecognized error)");
    }

    #[test]
    fn test_codes_compare_by_category() {
        let session = make_error_code(ProtocolErrc::UnrecognisedState);
        let transport = TransportError::Io(std::io::ErrorKind::Other.into()).code();
        assert_eq!(session.value(), transport.value());
        assert_ne!(session, transport);
        assert_eq!(session, ErrorCode::new(1, session_category()));
    }

    #[test]
    fn test_session_error_accessors() {
        let err = SessionError::transport(Phase::Read, TransportError::Eof);
        assert_eq!(err.what(), "read");
        assert_eq!(err.phase(), Some(Phase::Read));
        assert_eq!(err.code().message(), "end of stream");
        assert_eq!(err.to_string(), "read: end of stream");

        let err = SessionError::protocol(ProtocolErrc::UnrecognisedState, "read_full");
        assert_eq!(err.what(), "read_full");
        assert_eq!(err.phase(), None);
        assert_eq!(err.to_string(), "unrecognised state: read_full");
    }

    #[test]
    fn test_closed_errors() {
        assert!(TransportError::ClosedByPeer(1000).is_closed());
        assert!(TransportError::AlreadyClosed.is_closed());
        assert!(!TransportError::Eof.is_closed());
        assert_eq!(Phase::SetOption.to_string(), "set_option");
    }
}
