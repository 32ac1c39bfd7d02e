//! Session configuration.

use duplex_wire::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Configuration shared by client sessions, server sessions and listeners
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Bound on connecting to the resolved endpoints for client sessions
    pub connect_timeout: Duration,
    /// Bound on the handshake, both roles
    pub handshake_timeout: Duration,
    /// Bound on the close handshake
    pub close_timeout: Duration,
    /// Largest chunk a partial read hands to the callback
    pub read_chunk_size: usize,
    /// Largest frame accepted or produced
    pub max_frame_size: usize,
    /// Largest logical message accepted across all its fragments
    pub max_message_size: usize,
    /// Agent string announced during the handshake
    pub agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
            read_chunk_size: 64 * 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: 16 * 1024 * 1024,
            agent: format!("duplex-session/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
