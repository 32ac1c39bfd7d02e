//! Handshake protocol for duplex sessions.
//!
//! The client opens with a `Handshake` frame naming the host and target it
//! wants to talk to; the server answers with a `HandshakeAck` whose status is
//! `ok` or the reason it refused. Only after a successful exchange does the
//! connection become a [`FramedTransport`].

use crate::error::TransportError;
use crate::framed::FramedTransport;
use bytes::BytesMut;
use duplex_wire::{
    decode_meta, encode_meta, AckMeta, Frame, FrameDecoder, FrameType, HandshakeMeta, STATUS_OK,
    WIRE_VERSION,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Parameters a client announced in its handshake
pub type HandshakeRequest = HandshakeMeta;

/// Read any frame from the socket
///
/// Frames already sitting in `buffer` are returned before touching the
/// socket; bytes past the returned frame stay in `buffer`.
pub async fn recv_any_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    buffer: &mut BytesMut,
) -> Result<Frame, TransportError> {
    loop {
        if let Some(frame) = decoder.decode(buffer)? {
            return Ok(frame);
        }

        let bytes_read = reader.read_buf(buffer).await?;
        if bytes_read == 0 {
            return Err(TransportError::Eof);
        }

        trace!(
            "Read {} bytes, buffer now has {} bytes",
            bytes_read,
            buffer.len()
        );
    }
}

/// Encode and send one frame
pub async fn send_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    max_frame_size: usize,
) -> Result<usize, TransportError> {
    let bytes = frame.encode(max_frame_size)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(bytes.len())
}

/// Perform the client side of the handshake
pub async fn client_handshake<S>(
    mut stream: S,
    host: &str,
    target: &str,
    agent: &str,
    max_frame_size: usize,
) -> Result<FramedTransport<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let meta = encode_meta(&HandshakeMeta {
        version: WIRE_VERSION as u32,
        host: host.to_string(),
        target: target.to_string(),
        agent: agent.to_string(),
    })?;
    send_frame(&mut stream, &Frame::handshake(meta), max_frame_size).await?;
    debug!("Sent handshake for {}{}", host, target);

    let mut decoder = FrameDecoder::with_max_frame_size(max_frame_size);
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let frame = recv_any_frame(&mut stream, &mut decoder, &mut buffer).await?;

    match frame.typ() {
        FrameType::HandshakeAck => {
            let ack: AckMeta = decode_meta(&frame.payload)?;
            if !ack.is_ok() {
                return Err(TransportError::Rejected(ack.status));
            }
            if ack.version != WIRE_VERSION as u32 {
                return Err(TransportError::Rejected(format!(
                    "server speaks version {}",
                    ack.version
                )));
            }
            debug!("Handshake accepted by {}", ack.agent);
            Ok(FramedTransport::from_parts(
                stream,
                decoder,
                buffer,
                max_frame_size,
            ))
        }
        other => Err(TransportError::UnexpectedFrame(other)),
    }
}

/// Perform the server side of the handshake
pub async fn server_handshake<S>(
    mut stream: S,
    agent: &str,
    max_frame_size: usize,
) -> Result<(FramedTransport<S>, HandshakeRequest), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut decoder = FrameDecoder::with_max_frame_size(max_frame_size);
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let frame = recv_any_frame(&mut stream, &mut decoder, &mut buffer).await?;

    if frame.typ() != FrameType::Handshake {
        return Err(TransportError::UnexpectedFrame(frame.typ()));
    }

    let mut request: HandshakeRequest = decode_meta(&frame.payload)?;
    if request.target.is_empty() {
        request.target = "/".to_string();
    }

    let status = if request.version == WIRE_VERSION as u32 {
        STATUS_OK.to_string()
    } else {
        format!("unsupported version {}", request.version)
    };

    let ack = AckMeta {
        version: WIRE_VERSION as u32,
        agent: agent.to_string(),
        status,
    };
    send_frame(
        &mut stream,
        &Frame::handshake_ack(encode_meta(&ack)?),
        max_frame_size,
    )
    .await?;

    if !ack.is_ok() {
        return Err(TransportError::Rejected(ack.status));
    }

    debug!(
        "Accepted handshake from {} for {}{}",
        request.agent, request.host, request.target
    );
    Ok((
        FramedTransport::from_parts(stream, decoder, buffer, max_frame_size),
        request,
    ))
}
