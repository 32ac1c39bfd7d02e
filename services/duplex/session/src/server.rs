//! Server role: answer the handshake on an accepted stream, then converse.

use crate::callback::{Callback, Role};
use crate::config::SessionConfig;
use crate::error::{Phase, SessionError, TransportError};
use crate::handshake::server_handshake;
use crate::session::{shutdown_pair, Session, SessionOutcome, ShutdownHandle, ShutdownSignal};
use crate::sink::FailureSink;
use crate::transport::bounded;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Session on the accepting side of a connection
pub struct ServerSession<S, C> {
    stream: S,
    callback: C,
    sink: Arc<dyn FailureSink>,
    config: SessionConfig,
    label: String,
    handle: ShutdownHandle,
    shutdown: ShutdownSignal,
}

impl<S, C> ServerSession<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    C: Callback,
{
    /// Take ownership of an accepted stream
    pub fn new(stream: S, callback: C, sink: Arc<dyn FailureSink>, config: SessionConfig) -> Self {
        let (handle, shutdown) = shutdown_pair();
        Self {
            stream,
            callback,
            sink,
            config,
            label: "peer".to_string(),
            handle,
            shutdown,
        }
    }

    /// Name the peer in logs
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Handle that stops this session
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Complete the handshake and run the conversation
    ///
    /// A failed handshake is reported to the sink tagged `accept`.
    pub async fn run(self) -> SessionOutcome {
        debug!("Waiting for handshake from {}", self.label);
        let handshake = server_handshake(self.stream, &self.config.agent, self.config.max_frame_size);
        let result = self
            .shutdown
            .guard(bounded(self.config.handshake_timeout, handshake))
            .await;

        let (transport, request) = match result {
            Ok((transport, request)) => (
                transport.with_max_message_size(self.config.max_message_size),
                request,
            ),
            Err(TransportError::Cancelled) => {
                info!("Server session for {} cancelled during handshake", self.label);
                return SessionOutcome::Cancelled;
            }
            Err(source) => {
                let err = SessionError::transport(Phase::Accept, source);
                self.sink.notify(&err);
                return SessionOutcome::failed(&err);
            }
        };

        info!(
            "Accepted {} for {}{} from {}",
            request.agent, request.host, request.target, self.label
        );

        Session::new(
            transport,
            self.callback,
            Role::Server,
            self.sink,
            &self.config,
        )
        .with_label(format!("{}{}", self.label, request.target))
        .with_shutdown(self.handle, self.shutdown)
        .run()
        .await
    }
}
