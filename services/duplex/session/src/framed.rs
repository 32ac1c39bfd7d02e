//! Framed transport over a byte stream.
//!
//! Logical messages travel as one or more `Data` frames, the last one flagged
//! `FIN`. A partial read hands out at most one fragment (or a bounded slice
//! of one); a full read keeps going until the message is complete. Receiving
//! a `Close` frame answers it and surfaces as
//! [`TransportError::ClosedByPeer`].

use crate::error::TransportError;
use crate::handshake::{recv_any_frame, send_frame};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use duplex_wire::{parse_close, CloseCode, Frame, FrameDecoder, FrameType, WireError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Remainder of a data frame not yet handed to a reader
#[derive(Debug)]
struct Fragment {
    data: Bytes,
    fin: bool,
}

/// [`Transport`] implementation speaking the duplex wire format
#[derive(Debug)]
pub struct FramedTransport<S> {
    stream: S,
    decoder: FrameDecoder,
    rx: BytesMut,
    pending: Option<Fragment>,
    message_complete: bool,
    close_sent: bool,
    peer_closed: Option<CloseCode>,
    max_frame_size: usize,
    max_message_size: usize,
    message_len: usize,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream whose handshake is already done
    pub fn new(stream: S, max_frame_size: usize) -> Self {
        Self::from_parts(
            stream,
            FrameDecoder::with_max_frame_size(max_frame_size),
            BytesMut::with_capacity(8 * 1024),
            max_frame_size,
        )
    }

    /// Wrap a stream together with decoder state left over from the handshake
    pub fn from_parts(
        stream: S,
        decoder: FrameDecoder,
        rx: BytesMut,
        max_frame_size: usize,
    ) -> Self {
        Self {
            stream,
            decoder,
            rx,
            pending: None,
            message_complete: true,
            close_sent: false,
            peer_closed: None,
            max_frame_size,
            max_message_size: usize::MAX,
            message_len: 0,
        }
    }

    /// Cap the total size of one logical message across its fragments
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Close code received from the peer, if it closed first
    pub fn peer_close_code(&self) -> Option<CloseCode> {
        self.peer_closed
    }

    /// Next data fragment, answering a peer close on the way
    async fn next_fragment(&mut self) -> Result<Fragment, TransportError> {
        if let Some(code) = self.peer_closed {
            return Err(TransportError::ClosedByPeer(code.into()));
        }
        if self.close_sent {
            return Err(TransportError::AlreadyClosed);
        }

        let frame = recv_any_frame(&mut self.stream, &mut self.decoder, &mut self.rx).await?;
        match frame.typ() {
            FrameType::Data => {
                trace!(
                    "Received fragment of {} bytes (fin: {})",
                    frame.payload.len(),
                    frame.is_fin()
                );
                Ok(Fragment {
                    fin: frame.is_fin(),
                    data: frame.payload,
                })
            }
            FrameType::Close => {
                let (code, reason) = parse_close(&frame.payload)?;
                debug!("Peer closed with code {} ({})", code, reason);
                self.peer_closed = Some(code);
                self.close_sent = true;
                send_frame(&mut self.stream, &Frame::close(code, ""), self.max_frame_size).await?;
                self.stream.shutdown().await?;
                Err(TransportError::ClosedByPeer(code.into()))
            }
            other => Err(TransportError::UnexpectedFrame(other)),
        }
    }
}

#[async_trait]
impl<S> Transport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_full(&mut self, buf: &mut BytesMut) -> Result<usize, TransportError> {
        let mut total = 0;
        loop {
            total += self.read_partial(buf, usize::MAX).await?;
            if self.message_complete {
                return Ok(total);
            }
        }
    }

    async fn read_partial(
        &mut self,
        buf: &mut BytesMut,
        max: usize,
    ) -> Result<usize, TransportError> {
        let mut fragment = match self.pending.take() {
            Some(fragment) => fragment,
            None => loop {
                let fragment = self.next_fragment().await?;
                self.message_len = self.message_len.saturating_add(fragment.data.len());
                if self.message_len > self.max_message_size {
                    return Err(WireError::Size(self.message_len).into());
                }
                // Empty non-final fragments carry nothing to hand out
                if !fragment.data.is_empty() || fragment.fin {
                    break fragment;
                }
            },
        };

        let take = fragment.data.len().min(max.max(1));
        let chunk = fragment.data.split_to(take);
        buf.extend_from_slice(&chunk);

        if fragment.data.is_empty() {
            self.message_complete = fragment.fin;
            if fragment.fin {
                self.message_len = 0;
            }
        } else {
            self.message_complete = false;
            self.pending = Some(fragment);
        }

        Ok(chunk.len())
    }

    async fn write(&mut self, data: &[u8], fin: bool) -> Result<usize, TransportError> {
        if self.close_sent {
            return Err(TransportError::AlreadyClosed);
        }
        let frame = Frame::data(Bytes::copy_from_slice(data), fin);
        send_frame(&mut self.stream, &frame, self.max_frame_size).await?;
        trace!("Sent fragment of {} bytes (fin: {})", data.len(), fin);
        Ok(data.len())
    }

    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
        if self.close_sent {
            return Err(TransportError::AlreadyClosed);
        }
        self.close_sent = true;
        send_frame(&mut self.stream, &Frame::close(code, ""), self.max_frame_size).await?;

        // Drain until the peer answers; data still in flight is discarded
        loop {
            match recv_any_frame(&mut self.stream, &mut self.decoder, &mut self.rx).await {
                Ok(frame) if frame.typ() == FrameType::Close => {
                    let (peer_code, _) = parse_close(&frame.payload)?;
                    self.peer_closed = Some(peer_code);
                    break;
                }
                Ok(frame) => trace!("Discarding {:?} frame while closing", frame.typ()),
                Err(TransportError::Eof) => break,
                Err(e) => return Err(e),
            }
        }

        self.stream.shutdown().await?;
        debug!("Closed with code {}", code);
        Ok(())
    }

    fn is_message_complete(&self) -> bool {
        self.message_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_wire::DEFAULT_MAX_FRAME_SIZE;
    use tokio::io::DuplexStream;

    fn pair() -> (FramedTransport<DuplexStream>, FramedTransport<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            FramedTransport::new(a, DEFAULT_MAX_FRAME_SIZE),
            FramedTransport::new(b, DEFAULT_MAX_FRAME_SIZE),
        )
    }

    #[tokio::test]
    async fn test_full_read_spans_fragments() {
        let (mut writer, mut reader) = pair();
        writer.write(b"00002", false).await.unwrap();
        writer.write(b"00001", false).await.unwrap();
        writer.write(b"00000", true).await.unwrap();

        let mut buf = BytesMut::new();
        let n = reader.read_full(&mut buf).await.unwrap();

        assert_eq!(n, 15);
        assert_eq!(&buf[..], b"000020000100000");
        assert!(reader.is_message_complete());
    }

    #[tokio::test]
    async fn test_partial_reads_follow_fragments() {
        let (mut writer, mut reader) = pair();
        writer.write(b"r00001", false).await.unwrap();
        writer.write(b"r00000", true).await.unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(reader.read_partial(&mut buf, 1024).await.unwrap(), 6);
        assert!(!reader.is_message_complete());
        assert_eq!(&buf[..], b"r00001");

        buf.clear();
        assert_eq!(reader.read_partial(&mut buf, 1024).await.unwrap(), 6);
        assert!(reader.is_message_complete());
        assert_eq!(&buf[..], b"r00000");
    }

    #[tokio::test]
    async fn test_partial_read_is_bounded() {
        let (mut writer, mut reader) = pair();
        writer.write(b"hello world", true).await.unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(reader.read_partial(&mut buf, 4).await.unwrap(), 4);
        assert!(!reader.is_message_complete());
        assert_eq!(reader.read_partial(&mut buf, 4).await.unwrap(), 4);
        assert_eq!(reader.read_partial(&mut buf, 4).await.unwrap(), 3);
        assert!(reader.is_message_complete());
        assert_eq!(&buf[..], b"hello world");
    }

    #[tokio::test]
    async fn test_full_read_finishes_partially_read_message() {
        let (mut writer, mut reader) = pair();
        writer.write(b"abc", false).await.unwrap();
        writer.write(b"def", true).await.unwrap();

        let mut buf = BytesMut::new();
        reader.read_partial(&mut buf, 2).await.unwrap();
        buf.clear();

        assert_eq!(reader.read_full(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..], b"cdef");
        assert!(reader.is_message_complete());
    }

    #[tokio::test]
    async fn test_empty_fragments_are_skipped() {
        let (mut writer, mut reader) = pair();
        writer.write(b"", false).await.unwrap();
        writer.write(b"x", false).await.unwrap();
        writer.write(b"", true).await.unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(reader.read_partial(&mut buf, 16).await.unwrap(), 1);
        assert!(!reader.is_message_complete());
        assert_eq!(reader.read_partial(&mut buf, 16).await.unwrap(), 0);
        assert!(reader.is_message_complete());
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut writer = FramedTransport::new(a, 64);
        let mut reader = FramedTransport::new(b, 64).with_max_message_size(120);

        for _ in 0..3 {
            writer.write(&[7u8; 50], false).await.unwrap();
        }
        writer.write(b"", true).await.unwrap();

        let mut buf = BytesMut::new();
        let err = reader.read_full(&mut buf).await.unwrap_err();
        assert!(matches!(err, TransportError::Wire(WireError::Size(150))));
        assert_eq!(buf.len(), 100);
    }

    #[tokio::test]
    async fn test_message_size_counts_per_message() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut writer = FramedTransport::new(a, 64);
        let mut reader = FramedTransport::new(b, 64).with_max_message_size(100);

        for _ in 0..3 {
            writer.write(&[1u8; 40], false).await.unwrap();
            writer.write(&[2u8; 40], true).await.unwrap();
        }

        let mut buf = BytesMut::new();
        for _ in 0..3 {
            buf.clear();
            assert_eq!(reader.read_full(&mut buf).await.unwrap(), 80);
        }
    }

    #[tokio::test]
    async fn test_close_handshake() {
        let (mut closer, mut peer) = pair();
        closer.write(b"unread", true).await.unwrap();

        let peer_task = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            peer.read_full(&mut buf).await.unwrap();
            let err = peer.read_full(&mut buf).await.unwrap_err();
            (err, peer.peer_close_code())
        });

        closer.close(CloseCode::Normal).await.unwrap();
        assert_eq!(closer.peer_close_code(), Some(CloseCode::Normal));

        let (err, code) = peer_task.await.unwrap();
        assert!(matches!(err, TransportError::ClosedByPeer(1000)));
        assert_eq!(code, Some(CloseCode::Normal));
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let (mut closer, peer) = pair();
        drop(peer);

        closer.close(CloseCode::GoingAway).await.unwrap_or(());
        assert!(matches!(
            closer.write(b"late", true).await,
            Err(TransportError::AlreadyClosed)
        ));
        assert!(matches!(
            closer.close(CloseCode::Normal).await,
            Err(TransportError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_eof_without_close() {
        let (writer, mut reader) = pair();
        drop(writer);

        let mut buf = BytesMut::new();
        let err = reader.read_partial(&mut buf, 16).await.unwrap_err();
        assert!(matches!(err, TransportError::Eof));
    }
}
