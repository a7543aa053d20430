//! Routing activation, diagnostic message and acknowledgement payloads.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::types::{
    ActivationType, DiagnosticNackCode, GenericNackCode, LogicalAddress, PayloadType,
    RoutingActivationCode,
};

/// Routing activation request length without the OEM field.
pub const ROUTING_ACTIVATION_REQUEST_LENGTH: usize = 7;

/// Routing activation response length without the OEM field.
pub const ROUTING_ACTIVATION_RESPONSE_MIN_LENGTH: usize = 9;

/// Routing activation response length with the OEM field.
pub const ROUTING_ACTIVATION_RESPONSE_MAX_LENGTH: usize = 13;

/// Source and target address bytes in front of diagnostic user data.
pub const DIAGNOSTIC_ADDRESS_LENGTH: usize = 4;

/// UDS negative response service id.
const UDS_NEGATIVE_RESPONSE: u8 = 0x7F;

/// UDS negative response code "request correctly received, response pending".
const UDS_RESPONSE_PENDING: u8 = 0x78;

fn read_address(payload: &[u8], offset: usize) -> LogicalAddress {
    LogicalAddress::from_bytes([payload[offset], payload[offset + 1]])
}

/// Routing activation request (0x0005).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingActivationRequest {
    /// Logical address of the tester.
    pub source_address: LogicalAddress,
    /// Requested activation type.
    pub activation_type: ActivationType,
}

impl RoutingActivationRequest {
    /// Encode the request payload; the reserved field is zero.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ROUTING_ACTIVATION_REQUEST_LENGTH);
        buf.put_u16(self.source_address.0);
        buf.put_u8(self.activation_type.as_u8());
        buf.put_u32(0);
        buf.freeze()
    }

    /// Decode a request payload, as received by an entity.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() != ROUTING_ACTIVATION_REQUEST_LENGTH && payload.len() != 11 {
            return Err(DecodeError::InvalidPayloadLength {
                payload_type: PayloadType::RoutingActivationRequest,
                expected: "7 or 11",
                actual: payload.len(),
            });
        }

        let activation_type = match payload[2] {
            0x01 => ActivationType::WwhObd,
            0xE0 => ActivationType::CentralSecurity,
            _ => ActivationType::Default,
        };
        Ok(Self {
            source_address: read_address(payload, 0),
            activation_type,
        })
    }
}

/// Routing activation response (0x0006).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingActivationResponse {
    /// Logical address of the tester.
    pub client_address: LogicalAddress,
    /// Logical address of the DoIP entity.
    pub entity_address: LogicalAddress,
    /// Response code.
    pub code: RoutingActivationCode,
    /// OEM specific field.
    pub oem: Option<u32>,
}

impl RoutingActivationResponse {
    /// Decode a response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() != ROUTING_ACTIVATION_RESPONSE_MIN_LENGTH
            && payload.len() != ROUTING_ACTIVATION_RESPONSE_MAX_LENGTH
        {
            return Err(DecodeError::InvalidPayloadLength {
                payload_type: PayloadType::RoutingActivationResponse,
                expected: "9 or 13",
                actual: payload.len(),
            });
        }

        let oem = (payload.len() == ROUTING_ACTIVATION_RESPONSE_MAX_LENGTH)
            .then(|| u32::from_be_bytes([payload[9], payload[10], payload[11], payload[12]]));

        Ok(Self {
            client_address: read_address(payload, 0),
            entity_address: read_address(payload, 2),
            code: RoutingActivationCode::from_u8(payload[4]),
            oem,
        })
    }

    /// Encode the response payload.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ROUTING_ACTIVATION_RESPONSE_MAX_LENGTH);
        buf.put_u16(self.client_address.0);
        buf.put_u16(self.entity_address.0);
        buf.put_u8(self.code.as_u8());
        buf.put_u32(0);
        if let Some(oem) = self.oem {
            buf.put_u32(oem);
        }
        buf.freeze()
    }
}

/// Diagnostic message (0x8001) carrying opaque UDS data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    /// Sender logical address.
    pub source_address: LogicalAddress,
    /// Receiver logical address.
    pub target_address: LogicalAddress,
    /// UDS request or response bytes.
    pub user_data: Bytes,
}

impl DiagnosticMessage {
    /// Encode the message payload.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DIAGNOSTIC_ADDRESS_LENGTH + self.user_data.len());
        buf.put_u16(self.source_address.0);
        buf.put_u16(self.target_address.0);
        buf.put_slice(&self.user_data);
        buf.freeze()
    }

    /// Decode a message payload; user data must not be empty.
    pub fn decode(payload: &Bytes) -> Result<Self, DecodeError> {
        if payload.len() <= DIAGNOSTIC_ADDRESS_LENGTH {
            return Err(DecodeError::InvalidPayloadLength {
                payload_type: PayloadType::DiagnosticMessage,
                expected: "at least 5",
                actual: payload.len(),
            });
        }

        Ok(Self {
            source_address: read_address(payload, 0),
            target_address: read_address(payload, 2),
            user_data: payload.slice(DIAGNOSTIC_ADDRESS_LENGTH..),
        })
    }

    /// Service id of a UDS response-pending answer, if this is one.
    pub fn response_pending_sid(&self) -> Option<u8> {
        match self.user_data.as_ref() {
            [UDS_NEGATIVE_RESPONSE, sid, UDS_RESPONSE_PENDING] => Some(*sid),
            _ => None,
        }
    }
}

/// Diagnostic message acknowledgement (0x8002 positive / 0x8003 negative).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessageAck {
    /// Sender logical address (the entity).
    pub source_address: LogicalAddress,
    /// Receiver logical address (the tester).
    pub target_address: LogicalAddress,
    /// Raw ack or nack code.
    pub code: u8,
    /// Echo of the acknowledged message, if sent.
    pub previous_message: Bytes,
}

impl DiagnosticMessageAck {
    /// Decode an acknowledgement payload of either polarity.
    pub fn decode(payload_type: PayloadType, payload: &Bytes) -> Result<Self, DecodeError> {
        if payload.len() < DIAGNOSTIC_ADDRESS_LENGTH + 1 {
            return Err(DecodeError::InvalidPayloadLength {
                payload_type,
                expected: "at least 5",
                actual: payload.len(),
            });
        }

        Ok(Self {
            source_address: read_address(payload, 0),
            target_address: read_address(payload, 2),
            code: payload[4],
            previous_message: payload.slice(DIAGNOSTIC_ADDRESS_LENGTH + 1..),
        })
    }

    /// Encode the acknowledgement payload.
    pub fn to_payload(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(DIAGNOSTIC_ADDRESS_LENGTH + 1 + self.previous_message.len());
        buf.put_u16(self.source_address.0);
        buf.put_u16(self.target_address.0);
        buf.put_u8(self.code);
        buf.put_slice(&self.previous_message);
        buf.freeze()
    }

    /// Interpret the code as a negative acknowledgement code.
    pub fn nack_code(&self) -> DiagnosticNackCode {
        DiagnosticNackCode::from_u8(self.code)
    }
}

/// Alive check response payload (0x0008).
pub fn alive_check_response(source_address: LogicalAddress) -> Bytes {
    Bytes::copy_from_slice(&source_address.to_bytes())
}

/// Decode a generic header negative acknowledge payload (0x0000).
pub fn decode_generic_nack(payload: &[u8]) -> Result<Option<GenericNackCode>, DecodeError> {
    match payload {
        [code] => Ok(GenericNackCode::from_u8(*code)),
        _ => Err(DecodeError::InvalidPayloadLength {
            payload_type: PayloadType::GenericNack,
            expected: "1",
            actual: payload.len(),
        }),
    }
}
