//! Frame encoding and decoding.
//!
//! Readers consume exactly one frame: a 4-byte header, then exactly the
//! declared number of payload bytes. A peer that closes mid-frame is a
//! framing error rather than something to wait out.

use super::error::{PARTIAL_HEADER, SHORT_BODY, SHORT_HEADER};
use super::{Message, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header size in bytes (u32 big-endian payload length).
pub const HEADER_SIZE: usize = 4;

/// Largest payload any peer is allowed to declare (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Serialize `message` and prefix it with its length.
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.extend_from_slice(&payload);
    Ok(frame.freeze())
}

/// Parse a frame header into the payload length it announces.
pub fn parse_header(header: [u8; HEADER_SIZE]) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Deserialize a complete payload.
pub fn decode_payload(payload: &[u8]) -> Result<Message, ProtocolError> {
    Ok(rmp_serde::from_slice(payload)?)
}

/// Read exactly one frame from a blocking stream.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Message, ProtocolError> {
    // EOF before the first byte is a clean close; after it, a violation.
    let mut header = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header[..1])
        .map_err(|e| short_read(e, SHORT_HEADER))?;
    reader
        .read_exact(&mut header[1..])
        .map_err(|e| short_read(e, PARTIAL_HEADER))?;

    let len = parse_header(header)?;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| short_read(e, SHORT_BODY))?;

    decode_payload(&payload)
}

/// Encode `message` and write the whole frame to a blocking stream.
pub fn write_frame<W: Write>(writer: &mut W, message: &Message) -> Result<(), ProtocolError> {
    let frame = encode(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read exactly one frame from an async stream.
pub async fn read_frame_async<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header[..1])
        .await
        .map_err(|e| short_read(e, SHORT_HEADER))?;
    reader
        .read_exact(&mut header[1..])
        .await
        .map_err(|e| short_read(e, PARTIAL_HEADER))?;

    let len = parse_header(header)?;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| short_read(e, SHORT_BODY))?;

    decode_payload(&payload)
}

/// Encode `message` and write the whole frame to an async stream.
pub async fn write_frame_async<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn short_read(e: io::Error, reason: &'static str) -> ProtocolError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::Framing(reason)
    } else {
        ProtocolError::Io(e)
    }
}
