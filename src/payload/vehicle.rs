//! Vehicle identification request and announcement payloads.

use std::net::IpAddr;

use bytes::Bytes;

use crate::error::{DecodeError, DoipError, Result};
use crate::frame::DoipFrame;
use crate::types::{ENTITY_ID_LENGTH, EntityId, LogicalAddress, PayloadType, VIN_LENGTH, Vin};

/// Announcement payload length without the VIN/GID sync status byte.
pub const ANNOUNCEMENT_LENGTH: usize = 32;

/// Announcement payload length with the VIN/GID sync status byte.
pub const ANNOUNCEMENT_LENGTH_WITH_SYNC: usize = 33;

/// Further action code announcing that central security routing is required.
pub const FURTHER_ACTION_CENTRAL_SECURITY: u8 = 0x10;

/// Filter applied by entities to a vehicle identification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preselection {
    /// Every entity answers.
    #[default]
    None,
    /// Only entities of the vehicle with this VIN answer.
    Vin(Vin),
    /// Only the entity with this EID answers.
    Eid(EntityId),
}

impl Preselection {
    /// Build a preselection from a numeric mode and its textual value.
    ///
    /// Mode 0 takes no value, mode 1 a 17 character VIN, mode 2 an EID
    /// written as colon separated hex bytes.
    pub fn from_mode(mode: u8, value: &str) -> Result<Self> {
        match mode {
            0 => Ok(Self::None),
            1 => Ok(Self::Vin(value.parse()?)),
            2 => Ok(Self::Eid(value.parse()?)),
            other => Err(DoipError::invalid_parameter(format!(
                "unknown preselection mode {other}"
            ))),
        }
    }

    /// Payload type of the request carrying this filter.
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Self::None => PayloadType::VehicleIdentificationRequest,
            Self::Vin(_) => PayloadType::VehicleIdentificationRequestWithVin,
            Self::Eid(_) => PayloadType::VehicleIdentificationRequestWithEid,
        }
    }

    /// Request payload bytes.
    pub fn to_payload(&self) -> Bytes {
        match self {
            Self::None => Bytes::new(),
            Self::Vin(vin) => Bytes::copy_from_slice(vin.as_bytes()),
            Self::Eid(eid) => Bytes::copy_from_slice(&eid.0),
        }
    }

    /// Request frame for this filter.
    pub fn to_frame(&self) -> Result<DoipFrame> {
        DoipFrame::identification_request(self.payload_type(), self.to_payload())
    }

    /// Parse a received identification request frame back into a filter.
    pub fn from_frame(frame: &DoipFrame) -> std::result::Result<Self, DecodeError> {
        let payload = frame.payload.as_ref();
        let payload_type = frame.payload_type();
        match payload_type {
            PayloadType::VehicleIdentificationRequest if payload.is_empty() => Ok(Self::None),
            PayloadType::VehicleIdentificationRequestWithVin if payload.len() == VIN_LENGTH => {
                let mut vin = [0u8; VIN_LENGTH];
                vin.copy_from_slice(payload);
                Ok(Self::Vin(Vin(vin)))
            }
            PayloadType::VehicleIdentificationRequestWithEid if payload.len() == ENTITY_ID_LENGTH => {
                let mut eid = [0u8; ENTITY_ID_LENGTH];
                eid.copy_from_slice(payload);
                Ok(Self::Eid(EntityId(eid)))
            }
            _ => Err(DecodeError::InvalidPayloadLength {
                payload_type,
                expected: "0, 17 or 6 matching the request type",
                actual: payload.len(),
            }),
        }
    }

    /// Check whether a response satisfies this filter.
    pub fn matches(&self, response: &VehicleAddrInfoResponse) -> bool {
        match self {
            Self::None => true,
            Self::Vin(vin) => response.vin == *vin,
            Self::Eid(eid) => response.eid == *eid,
        }
    }
}

/// Request parameters for a single vehicle identification exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VehicleAddrInfoRequest {
    /// Filter sent with the request.
    pub preselection: Preselection,
    /// Entity to address; the conversation's broadcast address when `None`.
    pub host: Option<IpAddr>,
}

impl VehicleAddrInfoRequest {
    /// Create a request with the given filter.
    pub fn new(preselection: Preselection) -> Self {
        Self {
            preselection,
            host: None,
        }
    }

    /// Request filtered by VIN.
    pub fn by_vin(vin: &str) -> Result<Self> {
        Ok(Self::new(Preselection::Vin(vin.parse()?)))
    }

    /// Request filtered by EID.
    pub fn by_eid(eid: &str) -> Result<Self> {
        Ok(Self::new(Preselection::Eid(eid.parse()?)))
    }

    /// Address the request to a specific entity.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }
}

/// Identity of a discovered entity used for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleKey {
    /// Vehicle identification number.
    pub vin: Vin,
    /// Logical address of the entity.
    pub logical_address: LogicalAddress,
}

/// Decoded vehicle announcement / identification response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleAddrInfoResponse {
    /// Address the response was received from.
    pub ip_address: IpAddr,
    /// Logical address of the responding entity.
    pub logical_address: LogicalAddress,
    /// Vehicle identification number.
    pub vin: Vin,
    /// Entity identifier.
    pub eid: EntityId,
    /// Group identifier.
    pub gid: EntityId,
    /// Further action code.
    pub further_action: u8,
    /// VIN/GID synchronisation status, if sent.
    pub sync_status: Option<u8>,
}

impl VehicleAddrInfoResponse {
    /// Decode an announcement payload received from `ip_address`.
    pub fn decode(payload: &[u8], ip_address: IpAddr) -> std::result::Result<Self, DecodeError> {
        if payload.len() != ANNOUNCEMENT_LENGTH && payload.len() != ANNOUNCEMENT_LENGTH_WITH_SYNC {
            return Err(DecodeError::InvalidPayloadLength {
                payload_type: PayloadType::VehicleAnnouncementResponse,
                expected: "32 or 33",
                actual: payload.len(),
            });
        }

        let mut vin = [0u8; VIN_LENGTH];
        vin.copy_from_slice(&payload[0..17]);
        let logical_address = LogicalAddress::from_bytes([payload[17], payload[18]]);
        let mut eid = [0u8; ENTITY_ID_LENGTH];
        eid.copy_from_slice(&payload[19..25]);
        let mut gid = [0u8; ENTITY_ID_LENGTH];
        gid.copy_from_slice(&payload[25..31]);

        Ok(Self {
            ip_address,
            logical_address,
            vin: Vin(vin),
            eid: EntityId(eid),
            gid: EntityId(gid),
            further_action: payload[31],
            sync_status: payload.get(32).copied(),
        })
    }

    /// Encode as an announcement payload.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = Vec::with_capacity(ANNOUNCEMENT_LENGTH_WITH_SYNC);
        buf.extend_from_slice(self.vin.as_bytes());
        buf.extend_from_slice(&self.logical_address.to_bytes());
        buf.extend_from_slice(&self.eid.0);
        buf.extend_from_slice(&self.gid.0);
        buf.push(self.further_action);
        if let Some(sync) = self.sync_status {
            buf.push(sync);
        }
        Bytes::from(buf)
    }

    /// Check if the entity asks for further action before routing.
    pub fn further_action_required(&self) -> bool {
        self.further_action != 0x00
    }

    /// Deduplication key (VIN + logical address).
    pub fn key(&self) -> VehicleKey {
        VehicleKey {
            vin: self.vin,
            logical_address: self.logical_address,
        }
    }
}
