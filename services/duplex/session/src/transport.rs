//! Transport boundary for duplex sessions.
//!
//! A session only needs a message-oriented byte stream: read a whole logical
//! message, read a bounded chunk of one, write a fragment, close. The
//! [`Transport`] trait captures exactly that. Connection establishment (name
//! resolution, TCP connect with a timeout, listening sockets) lives here as
//! plain functions because only the client and listener glue use it.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::BytesMut;
use duplex_wire::CloseCode;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::debug;

/// Message-oriented byte stream owned by one session
///
/// All operations take `&mut self`, so at most one of them can be
/// outstanding at a time.
#[async_trait]
pub trait Transport: Send {
    /// Read until the current logical message is complete, appending to `buf`
    ///
    /// Returns the number of bytes appended.
    async fn read_full(&mut self, buf: &mut BytesMut) -> Result<usize, TransportError>;

    /// Read one bounded chunk of at most `max` bytes, appending to `buf`
    ///
    /// Returns as soon as any data is available; the message may still be
    /// incomplete afterwards.
    async fn read_partial(&mut self, buf: &mut BytesMut, max: usize)
        -> Result<usize, TransportError>;

    /// Write one fragment; `fin` ends the logical message
    async fn write(&mut self, data: &[u8], fin: bool) -> Result<usize, TransportError>;

    /// Close the conversation with the given code
    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError>;

    /// Whether the most recent read completed a logical message
    fn is_message_complete(&self) -> bool;
}

/// Resolve a host and port into candidate endpoints
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let endpoints: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    if endpoints.is_empty() {
        return Err(TransportError::NoEndpoints(format!("{}:{}", host, port)));
    }
    debug!("Resolved {}:{} to {:?}", host, port, endpoints);
    Ok(endpoints)
}

/// Run a transport step, failing with [`TransportError::Timeout`] after `timeout`
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Connect to the first reachable endpoint, bounded by `timeout` overall
pub async fn connect(
    endpoints: &[SocketAddr],
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    bounded(timeout, connect_any(endpoints)).await
}

async fn connect_any(endpoints: &[SocketAddr]) -> Result<TcpStream, TransportError> {
    let mut last_err = None;
    for endpoint in endpoints {
        match TcpStream::connect(endpoint).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!("Connected to {}", endpoint);
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", endpoint, e);
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => TransportError::Io(e),
        None => TransportError::NoEndpoints("empty endpoint list".to_string()),
    })
}

/// Open a socket of the right family for `addr`
pub fn open_socket(addr: SocketAddr) -> std::io::Result<TcpSocket> {
    if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

/// Start listening on a socket that has been bound
pub fn listen(socket: TcpSocket, backlog: u32) -> std::io::Result<TcpListener> {
    socket.listen(backlog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_tcp_listen_connect() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let socket = open_socket(addr).unwrap();
        socket.bind(addr).unwrap();
        let listener = listen(socket, 16).unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let stream = connect(&[bound_addr], Duration::from_secs(5)).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), bound_addr);
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let endpoints = resolve("127.0.0.1", 8080).await.unwrap();
        assert_eq!(endpoints, vec!["127.0.0.1:8080".parse().unwrap()]);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let err = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, TransportError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_connect_empty_endpoints() {
        let err = connect(&[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::NoEndpoints(_)));
    }
}
