//! Async DoIP stream framing utilities.
//!
//! This module provides async versions of the codec functions for use with tokio.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DecodeError, Result};
use crate::frame::{DoipFrame, FrameCodec};
use crate::header::{DoipHeader, HEADER_SIZE};

/// Read a complete DoIP frame from an async stream.
///
/// Reads the header first, then the payload announced by its length field.
/// Payloads above the codec limit are rejected before they are read.
pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R, codec: &FrameCodec) -> Result<DoipFrame> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;

    let (_, _, payload_len) = DoipHeader::peek(&header_buf)?;
    if payload_len as usize > codec.max_payload_size() {
        return Err(DecodeError::PayloadTooLarge {
            length: payload_len,
            max: codec.max_payload_size(),
        }
        .into());
    }

    let mut data = vec![0u8; HEADER_SIZE + payload_len as usize];
    data[..HEADER_SIZE].copy_from_slice(&header_buf);
    if payload_len > 0 {
        reader.read_exact(&mut data[HEADER_SIZE..]).await?;
    }

    Ok(codec.decode(&data)?)
}

/// Write a complete DoIP frame to an async stream and flush it.
pub async fn write_frame_async<W: AsyncWrite + Unpin>(writer: &mut W, frame: &DoipFrame) -> Result<()> {
    writer.write_all(&frame.header.to_bytes()).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    Ok(())
}
