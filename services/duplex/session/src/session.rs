//! Core session driver.
//!
//! A [`Session`] owns one established transport, one receive buffer and one
//! callback. It runs the exchange loop shared by both roles: ask the callback
//! what to do with the bytes the last step produced, perform exactly that I/O
//! step, repeat until the callback says `Close` or a step fails. Every step is
//! awaited before the next one is issued, so there is never more than one
//! outstanding operation on the transport nor more than one callback
//! invocation.

use crate::callback::{Callback, Decision, Role};
use crate::config::SessionConfig;
use crate::error::{ErrorCode, Phase, ProtocolErrc, SessionError, TransportError};
use crate::sink::FailureSink;
use crate::transport::{bounded, Transport};
use bytes::{Bytes, BytesMut};
use duplex_wire::CloseCode;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The callback asked to close and the close handshake completed
    Closed,
    /// The peer closed the conversation while a server session was reading
    PeerClosed,
    /// Shutdown was requested through a [`ShutdownHandle`]
    Cancelled,
    /// A step failed; the failure sink has been notified
    Failed {
        /// Code of the reported error
        code: ErrorCode,
        /// Phase or description of the reported error
        what: String,
    },
}

impl SessionOutcome {
    pub(crate) fn failed(err: &SessionError) -> Self {
        SessionOutcome::Failed {
            code: err.code(),
            what: err.what().to_string(),
        }
    }
}

/// Statistics for a session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Total bytes handed to the callback
    pub bytes_in: u64,
    /// Total payload bytes written
    pub bytes_out: u64,
    /// Number of completed reads
    pub reads: u64,
    /// Number of completed writes
    pub writes: u64,
    /// Number of callback invocations
    pub decisions: u64,
}

/// Requests a session to stop
///
/// Shutting down makes the outstanding I/O step return early; the session
/// then sends a `going away` close and never calls its callback again.
/// Calling it before the session runs, or after it finished, is harmless.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the session to stop
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving side of a [`ShutdownHandle`]
#[derive(Clone, Debug)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub(crate) fn shutdown_pair() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

impl ShutdownSignal {
    pub(crate) fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Run `fut` unless shutdown is requested first
    pub(crate) async fn guard<T, F>(&self, fut: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        let rx = self.rx.clone();
        tokio::select! {
            biased;
            _ = wait_requested(rx) => Err(TransportError::Cancelled),
            result = fut => result,
        }
    }
}

async fn wait_requested(mut rx: watch::Receiver<bool>) {
    loop {
        let requested = *rx.borrow_and_update();
        if requested {
            return;
        }
        if rx.changed().await.is_err() {
            // Handle dropped without asking: never resolves
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ReadMode {
    Full,
    Partial,
}

/// One conversation over one transport
pub struct Session<T, C> {
    transport: T,
    buffer: BytesMut,
    callback: C,
    role: Role,
    sink: Arc<dyn FailureSink>,
    read_chunk_size: usize,
    close_timeout: Duration,
    label: String,
    handle: ShutdownHandle,
    shutdown: ShutdownSignal,
    stats: SessionStats,
}

impl<T, C> Session<T, C>
where
    T: Transport,
    C: Callback,
{
    /// Create a session over an established transport
    pub fn new(
        transport: T,
        callback: C,
        role: Role,
        sink: Arc<dyn FailureSink>,
        config: &SessionConfig,
    ) -> Self {
        let (handle, shutdown) = shutdown_pair();
        Self {
            transport,
            buffer: BytesMut::with_capacity(config.read_chunk_size.min(64 * 1024)),
            callback,
            role,
            sink,
            read_chunk_size: config.read_chunk_size.max(1),
            close_timeout: config.close_timeout,
            label: "peer".to_string(),
            handle,
            shutdown,
            stats: SessionStats::default(),
        }
    }

    /// Name the peer in logs
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub(crate) fn with_shutdown(mut self, handle: ShutdownHandle, shutdown: ShutdownSignal) -> Self {
        self.handle = handle;
        self.shutdown = shutdown;
        self
    }

    /// Handle that stops this session
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Run the conversation to completion
    pub async fn run(mut self) -> SessionOutcome {
        info!("Starting {} session with {}", self.role, self.label);
        let outcome = self.exchange().await;
        info!(
            "Session with {} ended ({:?}). Stats: {:?}",
            self.label, outcome, self.stats
        );
        outcome
    }

    async fn exchange(&mut self) -> SessionOutcome {
        // Nothing has been read when the conversation opens
        let mut bytes = 0;

        loop {
            if self.shutdown.is_requested() {
                return self.cancel().await;
            }

            let decision = match self.decide(bytes) {
                Ok(decision) => decision,
                Err(err) => return self.abort(err).await,
            };
            debug!("{} decided {}", self.role, decision.name());

            let step = match decision {
                Decision::Close => return self.close().await,
                Decision::ReadFull => self.read(ReadMode::Full).await,
                Decision::ReadPartial => self.read(ReadMode::Partial).await,
                Decision::WritePartial(payload) => self.write(payload, false).await.map(|_| 0),
                Decision::WriteCompleteThenRead(payload) => {
                    match self.write(payload, true).await {
                        Ok(_) => self.read(ReadMode::Full).await,
                        Err(err) => Err(err),
                    }
                }
                Decision::WriteCompleteThenReadPartial(payload) => {
                    match self.write(payload, true).await {
                        Ok(_) => self.read(ReadMode::Partial).await,
                        Err(err) => Err(err),
                    }
                }
            };

            match step {
                Ok(n) => bytes = n,
                Err(err) => return self.fail(err).await,
            }
        }
    }

    /// Invoke the callback once, then clear what it was shown
    fn decide(&mut self, bytes: usize) -> Result<Decision, SessionError> {
        let complete = self.transport.is_message_complete();
        let buffer = &self.buffer[..];
        let callback = &mut self.callback;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            callback.decide(buffer, bytes, complete)
        }));

        self.buffer.clear();
        self.stats.decisions += 1;

        let decision = match result {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                return Err(SessionError::protocol(
                    ProtocolErrc::UnexpectedException,
                    format!("{:#}", e),
                ))
            }
            Err(payload) => {
                return Err(SessionError::protocol(
                    ProtocolErrc::UnexpectedException,
                    panic_message(payload.as_ref()),
                ))
            }
        };

        if !self.role.permits(&decision) {
            return Err(SessionError::protocol(
                ProtocolErrc::UnrecognisedState,
                format!("{} is not a {} decision", decision.name(), self.role),
            ));
        }

        Ok(decision)
    }

    async fn read(&mut self, mode: ReadMode) -> Result<usize, SessionError> {
        let transport = &mut self.transport;
        let buffer = &mut self.buffer;
        let max = self.read_chunk_size;

        let n = self
            .shutdown
            .guard(async move {
                match mode {
                    ReadMode::Full => transport.read_full(buffer).await,
                    ReadMode::Partial => transport.read_partial(buffer, max).await,
                }
            })
            .await
            .map_err(|source| SessionError::transport(Phase::Read, source))?;

        self.stats.reads += 1;
        self.stats.bytes_in += n as u64;
        trace!("Read {} bytes ({:?}) from {}", n, mode, self.label);
        Ok(n)
    }

    async fn write(&mut self, payload: Bytes, fin: bool) -> Result<usize, SessionError> {
        let transport = &mut self.transport;

        let n = self
            .shutdown
            .guard(transport.write(&payload, fin))
            .await
            .map_err(|source| SessionError::transport(Phase::Write, source))?;

        self.stats.writes += 1;
        self.stats.bytes_out += n as u64;
        trace!("Wrote {} bytes (fin: {}) to {}", n, fin, self.label);
        Ok(n)
    }

    async fn close_transport(&mut self, code: CloseCode) -> Result<(), TransportError> {
        bounded(self.close_timeout, self.transport.close(code)).await
    }

    /// Close requested by the callback
    async fn close(&mut self) -> SessionOutcome {
        match self.close_transport(CloseCode::Normal).await {
            Ok(()) => SessionOutcome::Closed,
            Err(source) => {
                let err = SessionError::transport(Phase::Close, source);
                self.sink.notify(&err);
                SessionOutcome::failed(&err)
            }
        }
    }

    /// Protocol error: report it, then still say goodbye to the peer
    async fn abort(&mut self, err: SessionError) -> SessionOutcome {
        warn!("Session with {} aborted: {}", self.label, err);
        self.sink.notify(&err);
        if let Err(e) = self.close_transport(CloseCode::Normal).await {
            debug!("Close after abort failed for {}: {}", self.label, e);
        }
        SessionOutcome::failed(&err)
    }

    /// Failed I/O step
    async fn fail(&mut self, err: SessionError) -> SessionOutcome {
        let closed = match &err {
            SessionError::Transport {
                source: TransportError::Cancelled,
                ..
            } => return self.cancel().await,
            SessionError::Transport {
                phase: Phase::Read,
                source: TransportError::ClosedByPeer(code),
            } if self.role == Role::Server => {
                debug!("{} closed the conversation (code {})", self.label, code);
                return SessionOutcome::PeerClosed;
            }
            SessionError::Transport { source, .. } => source.is_closed(),
            SessionError::Protocol { .. } => false,
        };

        warn!("Session with {} failed: {}", self.label, err);
        self.sink.notify(&err);
        if !closed {
            if let Err(e) = self.close_transport(CloseCode::InternalError).await {
                debug!("Close after failure failed for {}: {}", self.label, e);
            }
        }
        SessionOutcome::failed(&err)
    }

    async fn cancel(&mut self) -> SessionOutcome {
        info!("Session with {} shutting down", self.label);
        if let Err(e) = self.close_transport(CloseCode::GoingAway).await {
            debug!("Close on shutdown failed for {}: {}", self.label, e);
        }
        SessionOutcome::Cancelled
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("callback panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("callback panicked: {}", message)
    } else {
        "callback panicked".to_string()
    }
}
