//! DoIP frame encoding and decoding.

use bytes::Bytes;

use crate::error::{DecodeError, DoipError, Result};
use crate::header::{DoipHeader, HEADER_SIZE};
use crate::types::{MAX_PAYLOAD_LENGTH, PROTOCOL_VERSION_DEFAULT, PayloadType};

/// A complete DoIP frame (header + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoipFrame {
    /// Frame header.
    pub header: DoipHeader,
    /// Frame payload.
    pub payload: Bytes,
}

impl DoipFrame {
    /// Create a frame with the default protocol version.
    pub fn new(payload_type: PayloadType, payload: impl Into<Bytes>) -> Result<Self> {
        FrameCodec::default().frame(payload_type, payload)
    }

    /// Create a vehicle identification request frame.
    ///
    /// Identification requests use the default protocol version so that
    /// entities of any protocol revision answer.
    pub fn identification_request(payload_type: PayloadType, payload: impl Into<Bytes>) -> Result<Self> {
        let mut frame = Self::new(payload_type, payload)?;
        frame.header = DoipHeader::with_version(
            PROTOCOL_VERSION_DEFAULT,
            payload_type,
            frame.header.payload_length,
        );
        Ok(frame)
    }

    /// Parse a frame from bytes.
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, DecodeError> {
        FrameCodec::default().decode(data)
    }

    /// Serialize the frame to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_size());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Payload type of this frame.
    pub fn payload_type(&self) -> PayloadType {
        self.header.payload_type
    }

    /// Get the total frame size (header + payload).
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a payload into frame bytes.
pub fn encode(payload_type: PayloadType, payload: &[u8]) -> Result<Vec<u8>> {
    FrameCodec::default().encode(payload_type, payload)
}

/// Decode frame bytes.
pub fn decode(data: &[u8]) -> std::result::Result<DoipFrame, DecodeError> {
    FrameCodec::default().decode(data)
}

/// Frame encoder/decoder with a payload size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_LENGTH,
        }
    }
}

impl FrameCodec {
    /// Create a codec with the protocol maximum payload size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum payload size, capped at the protocol maximum.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size.min(MAX_PAYLOAD_LENGTH);
        self
    }

    /// Maximum payload size accepted by this codec.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Build a frame, rejecting payloads over the limit.
    pub fn frame(&self, payload_type: PayloadType, payload: impl Into<Bytes>) -> Result<DoipFrame> {
        let payload = payload.into();
        if payload.len() > self.max_payload_size {
            return Err(DoipError::OversizedPayload {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        Ok(DoipFrame {
            header: DoipHeader::new(payload_type, payload.len() as u32),
            payload,
        })
    }

    /// Encode a payload into frame bytes.
    pub fn encode(&self, payload_type: PayloadType, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > self.max_payload_size {
            return Err(DoipError::OversizedPayload {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        let header = DoipHeader::new(payload_type, payload.len() as u32);
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    /// Decode one frame from the start of `data`.
    ///
    /// Bytes after the declared payload are ignored.
    pub fn decode(&self, data: &[u8]) -> std::result::Result<DoipFrame, DecodeError> {
        let (_, _, payload_length) = DoipHeader::peek(data)?;

        if payload_length as usize > self.max_payload_size {
            return Err(DecodeError::PayloadTooLarge {
                length: payload_length,
                max: self.max_payload_size,
            });
        }

        let available = data.len() - HEADER_SIZE;
        if available < payload_length as usize {
            return Err(DecodeError::IncompletePayload {
                declared: payload_length,
                available,
            });
        }

        let header = DoipHeader::from_bytes(data)?;
        let end = HEADER_SIZE + payload_length as usize;
        let payload = Bytes::copy_from_slice(&data[HEADER_SIZE..end]);

        Ok(DoipFrame { header, payload })
    }
}
