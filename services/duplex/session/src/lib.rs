//! Half-duplex, message-oriented sessions for duplex.
//!
//! This crate drives conversations in which each side either writes or reads
//! at any point in time. The application supplies a [`Callback`] state
//! machine; a session repeatedly hands it the bytes of the last read and
//! performs the single I/O step the callback decides on next, until the
//! callback closes the conversation or a step fails.
//!
//! ## Features
//!
//! - **Client sessions**: resolve, connect with a timeout, handshake, converse
//! - **Server sessions**: answer the handshake on an accepted stream, converse
//! - **Listener**: accept connections in single- or multi-connection mode
//! - **Failure sinks**: every terminal failure reported once, tagged by phase
//! - **Cancellation**: stop any session through a [`ShutdownHandle`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use duplex_session::{ClientSession, HelloWorld, Listener, LogSink, SessionConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SessionConfig::default();
//! let sink = Arc::new(LogSink);
//!
//! let listener = Listener::bind(
//!     "127.0.0.1:8080".parse()?,
//!     false,
//!     sink.clone(),
//!     HelloWorld::server,
//!     config.clone(),
//! )?;
//! tokio::spawn(listener.run());
//!
//! let outcome = ClientSession::new(HelloWorld::client(), sink, config)
//!     .run("127.0.0.1", 8080, "/")
//!     .await;
//! println!("Client finished: {:?}", outcome);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod framed;
pub mod handshake;
pub mod hello;
pub mod listener;
pub mod server;
pub mod session;
pub mod sink;
pub mod transport;

#[cfg(test)]
mod mock;

// Re-export main types
pub use callback::{Callback, Decision, Role};
pub use client::ClientSession;
pub use config::SessionConfig;
pub use error::{
    make_error_code, session_category, transport_category, ErrorCategory, ErrorCode, Phase,
    ProtocolErrc, SessionError, TransportError,
};
pub use framed::FramedTransport;
pub use handshake::{client_handshake, server_handshake, HandshakeRequest};
pub use hello::HelloWorld;
pub use listener::Listener;
pub use server::ServerSession;
pub use session::{Session, SessionOutcome, SessionStats, ShutdownHandle};
pub use sink::{FailureSink, LogSink};
pub use transport::Transport;
