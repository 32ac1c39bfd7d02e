//! Client role: resolve, connect, handshake, then converse.

use crate::callback::{Callback, Role};
use crate::config::SessionConfig;
use crate::error::{Phase, SessionError, TransportError};
use crate::handshake::client_handshake;
use crate::session::{shutdown_pair, Session, SessionOutcome, ShutdownHandle, ShutdownSignal};
use crate::sink::FailureSink;
use crate::transport::{bounded, connect, resolve};
use std::sync::Arc;
use tracing::info;

/// Session that initiates the connection
pub struct ClientSession<C> {
    callback: C,
    sink: Arc<dyn FailureSink>,
    config: SessionConfig,
    handle: ShutdownHandle,
    shutdown: ShutdownSignal,
}

impl<C: Callback> ClientSession<C> {
    /// Create a client session; nothing happens until [`run`](Self::run)
    pub fn new(callback: C, sink: Arc<dyn FailureSink>, config: SessionConfig) -> Self {
        let (handle, shutdown) = shutdown_pair();
        Self {
            callback,
            sink,
            config,
            handle,
            shutdown,
        }
    }

    /// Handle that stops this session at any point, establishment included
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Connect to `host:port`, open `target` and run the conversation
    ///
    /// Failures before the conversation starts are reported to the sink
    /// tagged `resolve`, `connect` or `handshake`.
    pub async fn run(self, host: &str, port: u16, target: &str) -> SessionOutcome {
        info!("Connecting to {}:{}{}", host, port, target);

        let endpoints = match self.shutdown.guard(resolve(host, port)).await {
            Ok(endpoints) => endpoints,
            Err(e) => return self.fail(Phase::Resolve, e),
        };

        let stream = match self
            .shutdown
            .guard(connect(&endpoints, self.config.connect_timeout))
            .await
        {
            Ok(stream) => stream,
            Err(e) => return self.fail(Phase::Connect, e),
        };
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("{}:{}", host, port));

        let handshake = client_handshake(
            stream,
            host,
            target,
            &self.config.agent,
            self.config.max_frame_size,
        );
        let transport = match self
            .shutdown
            .guard(bounded(self.config.handshake_timeout, handshake))
            .await
        {
            Ok(transport) => transport.with_max_message_size(self.config.max_message_size),
            Err(e) => return self.fail(Phase::Handshake, e),
        };

        Session::new(
            transport,
            self.callback,
            Role::Client,
            self.sink,
            &self.config,
        )
        .with_label(format!("{}{}", peer, target))
        .with_shutdown(self.handle, self.shutdown)
        .run()
        .await
    }

    fn fail(&self, phase: Phase, source: TransportError) -> SessionOutcome {
        if matches!(source, TransportError::Cancelled) {
            info!("Client session cancelled during {}", phase);
            return SessionOutcome::Cancelled;
        }
        let err = SessionError::transport(phase, source);
        self.sink.notify(&err);
        SessionOutcome::failed(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Decision;
    use crate::mock::{RecordingSink, Scripted};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_refused_connection_reports_connect() {
        let port = unused_port().await;
        let sink = RecordingSink::default();
        let client = ClientSession::new(
            Scripted::new(vec![Ok(Decision::Close)]),
            sink.shared(),
            SessionConfig::default(),
        );

        let outcome = client.run("127.0.0.1", port, "/").await;

        assert!(matches!(outcome, SessionOutcome::Failed { ref what, .. } if what == "connect"));
        assert_eq!(sink.reports().len(), 1);
        assert_eq!(sink.reports()[0].1, "connect");
    }

    #[tokio::test]
    async fn test_unknown_host_reports_resolve() {
        let sink = RecordingSink::default();
        let client = ClientSession::new(
            Scripted::new(vec![Ok(Decision::Close)]),
            sink.shared(),
            SessionConfig::default(),
        );

        let outcome = client.run("no-such-host.invalid", 80, "/").await;

        assert!(matches!(outcome, SessionOutcome::Failed { ref what, .. } if what == "resolve"));
        assert_eq!(sink.reports().len(), 1);
        assert_eq!(sink.reports()[0].1, "resolve");
    }

    #[tokio::test]
    async fn test_peer_hanging_up_reports_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let sink = RecordingSink::default();
        let client = ClientSession::new(
            Scripted::new(vec![Ok(Decision::Close)]),
            sink.shared(),
            SessionConfig::default(),
        );
        let outcome = client.run("127.0.0.1", addr.port(), "/").await;

        assert!(matches!(outcome, SessionOutcome::Failed { ref what, .. } if what == "handshake"));
        assert_eq!(sink.reports().len(), 1);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let sink = RecordingSink::default();
        let config = SessionConfig {
            handshake_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        let client = ClientSession::new(Scripted::new(vec![]), sink.shared(), config);
        client.run("127.0.0.1", addr.port(), "/").await;

        assert_eq!(
            sink.reports(),
            vec![("timed out".to_string(), "handshake".to_string())]
        );
        server.abort();
    }

    #[tokio::test]
    async fn test_shutdown_during_handshake_is_not_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let sink = RecordingSink::default();
        let client = ClientSession::new(Scripted::new(vec![]), sink.shared(), SessionConfig::default());
        let handle = client.shutdown_handle();
        let task = tokio::spawn(async move { client.run("127.0.0.1", addr.port(), "/").await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        assert_eq!(task.await.unwrap(), SessionOutcome::Cancelled);
        assert!(sink.is_empty());
        server.abort();
    }
}
