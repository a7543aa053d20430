//! DoIP generic header.

use crate::error::DecodeError;
use crate::types::{PROTOCOL_VERSION, PayloadType};

/// Size of the DoIP generic header in bytes.
pub const HEADER_SIZE: usize = 8;

/// DoIP generic header (8 bytes).
///
/// ```text
/// +----------------+----------------+---------------------------------+
/// | Protocol Ver   | Inverse Ver    |  Payload Type (16 bits)         |
/// | (8 bits)       | (8 bits)       |                                 |
/// +----------------+----------------+---------------------------------+
/// |           Payload Length (32 bits)                                |
/// +-------------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoipHeader {
    /// Protocol version.
    pub protocol_version: u8,
    /// Bitwise complement of the protocol version.
    pub inverse_version: u8,
    /// Payload type.
    pub payload_type: PayloadType,
    /// Length of the payload following the header.
    pub payload_length: u32,
}

impl DoipHeader {
    /// Create a header for the given payload type and length.
    pub fn new(payload_type: PayloadType, payload_length: u32) -> Self {
        Self::with_version(PROTOCOL_VERSION, payload_type, payload_length)
    }

    /// Create a header with an explicit protocol version.
    pub fn with_version(protocol_version: u8, payload_type: PayloadType, payload_length: u32) -> Self {
        Self {
            protocol_version,
            inverse_version: !protocol_version,
            payload_type,
            payload_length,
        }
    }

    /// Validate the version bytes and read the raw type and length fields.
    ///
    /// Used by stream readers that need the frame length even when the payload
    /// type is unknown.
    pub fn peek(data: &[u8]) -> Result<(u8, u16, u32), DecodeError> {
        if data.len() < HEADER_SIZE {
            return Err(DecodeError::malformed(format!(
                "expected at least {HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }

        let protocol_version = data[0];
        let inverse_version = data[1];
        if inverse_version != !protocol_version {
            return Err(DecodeError::malformed(format!(
                "inverse version 0x{inverse_version:02X} does not match version 0x{protocol_version:02X}"
            )));
        }

        let payload_type = u16::from_be_bytes([data[2], data[3]]);
        let payload_length = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        Ok((protocol_version, payload_type, payload_length))
    }

    /// Parse a header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let (protocol_version, raw_type, payload_length) = Self::peek(data)?;
        let payload_type =
            PayloadType::from_u16(raw_type).ok_or(DecodeError::UnknownPayloadType(raw_type))?;

        Ok(Self {
            protocol_version,
            inverse_version: !protocol_version,
            payload_type,
            payload_length,
        })
    }

    /// Serialize the header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0] = self.protocol_version;
        buf[1] = self.inverse_version;
        buf[2..4].copy_from_slice(&(self.payload_type as u16).to_be_bytes());
        buf[4..8].copy_from_slice(&self.payload_length.to_be_bytes());

        buf
    }

    /// Total frame size (header plus payload).
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }
}
