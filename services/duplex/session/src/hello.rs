//! Demonstration conversation used by the binary and the end-to-end tests.
//!
//! The client says hello and waits for the reply, then streams the countdown
//! `00100` .. `00000` as fragments of one message and reads the answer in
//! bounded chunks. The server reads the hello in full, replies, reads the
//! streamed countdown chunk by chunk and answers with its own countdown
//! `r00100` .. `r00000`. The client closes once the whole answer is in.

use crate::callback::{Callback, Decision, Role};
use anyhow::{bail, ensure};
use tracing::debug;

/// Greeting sent by the client
pub const HELLO: &str = "hello world";

/// Reply sent by the server
pub const HELLO_REPLY: &str = "responding1 hello back";

/// First value of each streamed countdown
pub const STREAM_COUNT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HelloState {
    Initialise,
    ReceiveHello,
    ReceiveHelloStreamed,
    End,
}

/// Both halves of the hello conversation
#[derive(Debug)]
pub struct HelloWorld {
    role: Role,
    state: HelloState,
    stream_count: u32,
    streamed_in: bool,
    received: Vec<u8>,
}

impl HelloWorld {
    /// Callback for a client session
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    /// Callback for a server session
    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    fn new(role: Role) -> Self {
        Self {
            role,
            state: HelloState::Initialise,
            stream_count: STREAM_COUNT,
            streamed_in: false,
            received: Vec::new(),
        }
    }

    /// Whether the whole exchange has been seen
    pub fn is_finished(&self) -> bool {
        self.state == HelloState::End
    }

    /// Next countdown fragment; the last one completes the message
    fn countdown(&mut self, prefix: &str) -> (String, bool) {
        let chunk = format!("{}{:05}", prefix, self.stream_count);
        if self.stream_count == 0 {
            self.stream_count = STREAM_COUNT;
            (chunk, true)
        } else {
            self.stream_count -= 1;
            (chunk, false)
        }
    }

    fn client_decide(&mut self, buffer: &[u8], bytes: usize, complete: bool) -> anyhow::Result<Decision> {
        match self.state {
            HelloState::Initialise => {
                self.state = HelloState::ReceiveHello;
                Ok(Decision::write_complete_then_read(HELLO))
            }
            HelloState::ReceiveHello => {
                if self.stream_count == STREAM_COUNT {
                    ensure!(bytes != 0, "expected a reply to hello");
                    ensure!(buffer == HELLO_REPLY.as_bytes(), "unexpected reply to hello");
                } else {
                    ensure!(bytes == 0, "unexpected data while streaming");
                }
                match self.countdown("") {
                    (chunk, true) => {
                        self.state = HelloState::ReceiveHelloStreamed;
                        Ok(Decision::write_complete_then_read_partial(chunk))
                    }
                    (chunk, false) => Ok(Decision::write_partial(chunk)),
                }
            }
            HelloState::ReceiveHelloStreamed => {
                ensure!(bytes != 0, "expected streamed reply data");
                self.received.extend_from_slice(buffer);
                if !complete {
                    return Ok(Decision::ReadPartial);
                }
                ensure!(
                    self.received == countdown_message("r").as_bytes(),
                    "streamed reply does not match"
                );
                self.state = HelloState::End;
                Ok(Decision::Close)
            }
            HelloState::End => bail!("conversation already finished"),
        }
    }

    fn server_decide(&mut self, buffer: &[u8], bytes: usize, complete: bool) -> anyhow::Result<Decision> {
        match self.state {
            HelloState::Initialise => {
                self.state = HelloState::ReceiveHello;
                Ok(Decision::ReadFull)
            }
            HelloState::ReceiveHello => {
                ensure!(bytes != 0, "expected hello");
                ensure!(buffer == HELLO.as_bytes(), "unexpected greeting");
                self.state = HelloState::ReceiveHelloStreamed;
                Ok(Decision::write_complete_then_read(HELLO_REPLY))
            }
            HelloState::ReceiveHelloStreamed => {
                if !self.streamed_in {
                    self.received.extend_from_slice(buffer);
                    if !complete {
                        return Ok(Decision::ReadPartial);
                    }
                    ensure!(
                        self.received == countdown_message("").as_bytes(),
                        "streamed message does not match"
                    );
                    self.streamed_in = true;
                } else {
                    ensure!(bytes == 0, "unexpected data while streaming");
                }
                match self.countdown("r") {
                    (chunk, true) => {
                        self.state = HelloState::End;
                        Ok(Decision::write_complete_then_read(chunk))
                    }
                    (chunk, false) => Ok(Decision::write_partial(chunk)),
                }
            }
            HelloState::End => Ok(Decision::Close),
        }
    }
}

impl Callback for HelloWorld {
    fn decide(
        &mut self,
        buffer: &[u8],
        bytes: usize,
        message_complete: bool,
    ) -> anyhow::Result<Decision> {
        debug!(
            "{} {:?}: {} bytes (complete: {}) {}",
            self.role,
            self.state,
            bytes,
            message_complete,
            String::from_utf8_lossy(buffer)
        );
        match self.role {
            Role::Client => self.client_decide(buffer, bytes, message_complete),
            Role::Server => self.server_decide(buffer, bytes, message_complete),
        }
    }
}

/// The full countdown message with each value prefixed by `prefix`
fn countdown_message(prefix: &str) -> String {
    (0..=STREAM_COUNT)
        .rev()
        .map(|n| format!("{}{:05}", prefix, n))
        .collect()
}
