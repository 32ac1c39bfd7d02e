//! Listening endpoint that turns accepted connections into server sessions.

use crate::callback::Callback;
use crate::config::SessionConfig;
use crate::error::{Phase, SessionError, TransportError};
use crate::server::ServerSession;
use crate::session::SessionOutcome;
use crate::sink::FailureSink;
use crate::transport::{listen, open_socket};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const LISTEN_BACKLOG: u32 = 1024;

/// Accepts connections and runs a server session on each
///
/// `factory` builds a fresh callback per accepted connection. In
/// single-connection mode the listener accepts exactly one connection and
/// drives its session to completion before [`run`](Self::run) returns;
/// otherwise every session gets its own task and the accept loop continues.
pub struct Listener<F> {
    listener: TcpListener,
    single: bool,
    sink: Arc<dyn FailureSink>,
    factory: F,
    config: SessionConfig,
}

impl<F, C> Listener<F>
where
    F: Fn() -> C + Send + Sync + 'static,
    C: Callback,
{
    /// Open, configure, bind and start listening on `addr`
    ///
    /// Each failing step is reported to the sink with its phase name and
    /// returned.
    pub fn bind(
        addr: SocketAddr,
        single: bool,
        sink: Arc<dyn FailureSink>,
        factory: F,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let report = |phase: Phase, e: std::io::Error| {
            let err = SessionError::transport(phase, TransportError::Io(e));
            sink.notify(&err);
            err
        };

        let socket = open_socket(addr).map_err(|e| report(Phase::Open, e))?;
        socket
            .set_reuseaddr(true)
            .map_err(|e| report(Phase::SetOption, e))?;
        socket.bind(addr).map_err(|e| report(Phase::Bind, e))?;
        let listener = listen(socket, LISTEN_BACKLOG).map_err(|e| report(Phase::Listen, e))?;

        info!(
            "Listening on {} ({})",
            addr,
            if single { "single connection" } else { "multi connection" }
        );

        Ok(Self {
            listener,
            single,
            sink,
            factory,
            config,
        })
    }

    /// Address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections
    ///
    /// In single-connection mode, returns the outcome of the one session, or
    /// `None` if accepting failed. Otherwise never returns.
    pub async fn run(self) -> Option<SessionOutcome> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!("Accepted connection from {}", peer);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
                    }

                    let session = ServerSession::new(
                        stream,
                        (self.factory)(),
                        self.sink.clone(),
                        self.config.clone(),
                    )
                    .with_label(peer.to_string());

                    if self.single {
                        return Some(session.run().await);
                    }
                    tokio::spawn(session.run());
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    self.sink
                        .notify(&SessionError::transport(Phase::Accept, e.into()));
                    if self.single {
                        return None;
                    }
                }
            }
        }
    }
}
