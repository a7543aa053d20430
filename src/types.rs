//! Core DoIP types and constants.

use crate::error::DoipError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// UDP and TCP port of DoIP entities.
pub const DOIP_PORT: u16 = 13400;

/// TCP port of TLS-secured DoIP entities.
pub const DOIP_TLS_PORT: u16 = 3496;

/// Protocol version of ISO 13400-2:2012.
pub const PROTOCOL_VERSION_2012: u8 = 0x02;

/// Protocol version of ISO 13400-2:2019.
pub const PROTOCOL_VERSION_2019: u8 = 0x03;

/// Default protocol version, only valid for vehicle identification requests.
pub const PROTOCOL_VERSION_DEFAULT: u8 = 0xFF;

/// Protocol version used for outbound frames.
pub const PROTOCOL_VERSION: u8 = PROTOCOL_VERSION_2012;

/// Largest payload length the header can express.
pub const MAX_PAYLOAD_LENGTH: usize = u32::MAX as usize;

/// A_DoIP_Ctrl: time to wait for answers to UDP control requests.
pub const DOIP_CTRL_TIMEOUT: Duration = Duration::from_millis(2000);

/// Time to wait for a routing activation response.
pub const ROUTING_ACTIVATION_TIMEOUT: Duration = Duration::from_millis(1000);

/// Time to wait for a diagnostic message acknowledgement.
pub const DIAGNOSTIC_ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default P2 client maximum.
pub const P2_CLIENT_MAX: Duration = Duration::from_millis(1000);

/// Default P2* client maximum.
pub const P2_STAR_CLIENT_MAX: Duration = Duration::from_millis(5000);

/// DoIP payload types as defined in ISO 13400-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PayloadType {
    /// Generic DoIP header negative acknowledge.
    GenericNack = 0x0000,
    /// Vehicle identification request without filter.
    VehicleIdentificationRequest = 0x0001,
    /// Vehicle identification request filtered by EID.
    VehicleIdentificationRequestWithEid = 0x0002,
    /// Vehicle identification request filtered by VIN.
    VehicleIdentificationRequestWithVin = 0x0003,
    /// Vehicle announcement / identification response.
    VehicleAnnouncementResponse = 0x0004,
    /// Routing activation request.
    RoutingActivationRequest = 0x0005,
    /// Routing activation response.
    RoutingActivationResponse = 0x0006,
    /// Alive check request.
    AliveCheckRequest = 0x0007,
    /// Alive check response.
    AliveCheckResponse = 0x0008,
    /// DoIP entity status request.
    EntityStatusRequest = 0x4001,
    /// DoIP entity status response.
    EntityStatusResponse = 0x4002,
    /// Diagnostic power mode information request.
    PowerModeRequest = 0x4003,
    /// Diagnostic power mode information response.
    PowerModeResponse = 0x4004,
    /// Diagnostic message carrying UDS data.
    DiagnosticMessage = 0x8001,
    /// Diagnostic message positive acknowledgement.
    DiagnosticMessagePositiveAck = 0x8002,
    /// Diagnostic message negative acknowledgement.
    DiagnosticMessageNegativeAck = 0x8003,
}

impl PayloadType {
    /// Create a PayloadType from a raw value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::GenericNack),
            0x0001 => Some(Self::VehicleIdentificationRequest),
            0x0002 => Some(Self::VehicleIdentificationRequestWithEid),
            0x0003 => Some(Self::VehicleIdentificationRequestWithVin),
            0x0004 => Some(Self::VehicleAnnouncementResponse),
            0x0005 => Some(Self::RoutingActivationRequest),
            0x0006 => Some(Self::RoutingActivationResponse),
            0x0007 => Some(Self::AliveCheckRequest),
            0x0008 => Some(Self::AliveCheckResponse),
            0x4001 => Some(Self::EntityStatusRequest),
            0x4002 => Some(Self::EntityStatusResponse),
            0x4003 => Some(Self::PowerModeRequest),
            0x4004 => Some(Self::PowerModeResponse),
            0x8001 => Some(Self::DiagnosticMessage),
            0x8002 => Some(Self::DiagnosticMessagePositiveAck),
            0x8003 => Some(Self::DiagnosticMessageNegativeAck),
            _ => None,
        }
    }

    /// Check if this payload type travels over the UDP discovery channel.
    pub fn is_udp(&self) -> bool {
        matches!(
            self,
            Self::GenericNack
                | Self::VehicleIdentificationRequest
                | Self::VehicleIdentificationRequestWithEid
                | Self::VehicleIdentificationRequestWithVin
                | Self::VehicleAnnouncementResponse
                | Self::EntityStatusRequest
                | Self::EntityStatusResponse
                | Self::PowerModeRequest
                | Self::PowerModeResponse
        )
    }

    /// Check if this is one of the vehicle identification request variants.
    pub fn is_identification_request(&self) -> bool {
        matches!(
            self,
            Self::VehicleIdentificationRequest
                | Self::VehicleIdentificationRequestWithEid
                | Self::VehicleIdentificationRequestWithVin
        )
    }
}

/// Generic header negative acknowledge codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GenericNackCode {
    /// Incorrect pattern format.
    IncorrectPattern = 0x00,
    /// Unknown payload type.
    UnknownPayloadType = 0x01,
    /// Message too large.
    MessageTooLarge = 0x02,
    /// Out of memory.
    OutOfMemory = 0x03,
    /// Invalid payload length.
    InvalidPayloadLength = 0x04,
}

impl GenericNackCode {
    /// Create a GenericNackCode from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::IncorrectPattern),
            0x01 => Some(Self::UnknownPayloadType),
            0x02 => Some(Self::MessageTooLarge),
            0x03 => Some(Self::OutOfMemory),
            0x04 => Some(Self::InvalidPayloadLength),
            _ => None,
        }
    }

    /// Whether the entity closes the socket after sending this code.
    pub fn closes_socket(&self) -> bool {
        matches!(self, Self::IncorrectPattern)
    }
}

/// Routing activation response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingActivationCode {
    /// Unknown source address.
    UnknownSourceAddress,
    /// All sockets are registered and active.
    AllSocketsActive,
    /// Source address differs from the one registered on this socket.
    DifferentSourceAddress,
    /// Source address already active on a different socket.
    SourceAddressInUse,
    /// Missing authentication.
    MissingAuthentication,
    /// Rejected confirmation.
    RejectedConfirmation,
    /// Unsupported routing activation type.
    UnsupportedActivationType,
    /// Secure (TLS) connection required.
    TlsRequired,
    /// Routing successfully activated.
    Success,
    /// Routing will be activated after confirmation.
    ConfirmationRequired,
    /// Reserved or OEM specific code.
    Other(u8),
}

impl RoutingActivationCode {
    /// Create a RoutingActivationCode from a raw byte value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::UnknownSourceAddress,
            0x01 => Self::AllSocketsActive,
            0x02 => Self::DifferentSourceAddress,
            0x03 => Self::SourceAddressInUse,
            0x04 => Self::MissingAuthentication,
            0x05 => Self::RejectedConfirmation,
            0x06 => Self::UnsupportedActivationType,
            0x07 => Self::TlsRequired,
            0x10 => Self::Success,
            0x11 => Self::ConfirmationRequired,
            other => Self::Other(other),
        }
    }

    /// Raw byte value.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::UnknownSourceAddress => 0x00,
            Self::AllSocketsActive => 0x01,
            Self::DifferentSourceAddress => 0x02,
            Self::SourceAddressInUse => 0x03,
            Self::MissingAuthentication => 0x04,
            Self::RejectedConfirmation => 0x05,
            Self::UnsupportedActivationType => 0x06,
            Self::TlsRequired => 0x07,
            Self::Success => 0x10,
            Self::ConfirmationRequired => 0x11,
            Self::Other(value) => *value,
        }
    }

    /// Check if routing is active after this response.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for RoutingActivationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02X})", self, self.as_u8())
    }
}

/// Routing activation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActivationType {
    /// Default activation.
    #[default]
    Default,
    /// WWH-OBD activation.
    WwhObd,
    /// Central security activation.
    CentralSecurity,
}

impl ActivationType {
    /// Raw byte value.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Default => 0x00,
            Self::WwhObd => 0x01,
            Self::CentralSecurity => 0xE0,
        }
    }
}

/// Diagnostic message negative acknowledge codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticNackCode {
    /// Invalid source address.
    InvalidSourceAddress,
    /// Unknown target address.
    UnknownTargetAddress,
    /// Diagnostic message too large.
    MessageTooLarge,
    /// Out of memory.
    OutOfMemory,
    /// Target unreachable.
    TargetUnreachable,
    /// Unknown network.
    UnknownNetwork,
    /// Transport protocol error.
    TransportProtocolError,
    /// Reserved code.
    Other(u8),
}

impl DiagnosticNackCode {
    /// Create a DiagnosticNackCode from a raw byte value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x02 => Self::InvalidSourceAddress,
            0x03 => Self::UnknownTargetAddress,
            0x04 => Self::MessageTooLarge,
            0x05 => Self::OutOfMemory,
            0x06 => Self::TargetUnreachable,
            0x07 => Self::UnknownNetwork,
            0x08 => Self::TransportProtocolError,
            other => Self::Other(other),
        }
    }

    /// Raw byte value.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::InvalidSourceAddress => 0x02,
            Self::UnknownTargetAddress => 0x03,
            Self::MessageTooLarge => 0x04,
            Self::OutOfMemory => 0x05,
            Self::TargetUnreachable => 0x06,
            Self::UnknownNetwork => 0x07,
            Self::TransportProtocolError => 0x08,
            Self::Other(value) => *value,
        }
    }
}

impl fmt::Display for DiagnosticNackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02X})", self, self.as_u8())
    }
}

/// Logical address of a DoIP entity or tester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct LogicalAddress(pub u16);

impl LogicalAddress {
    /// Big-endian wire bytes.
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Read from two big-endian bytes.
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Length of a VIN in bytes.
pub const VIN_LENGTH: usize = 17;

/// Length of an EID or GID in bytes.
pub const ENTITY_ID_LENGTH: usize = 6;

/// Vehicle identification number (17 ASCII bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vin(pub [u8; VIN_LENGTH]);

impl Vin {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; VIN_LENGTH] {
        &self.0
    }
}

impl FromStr for Vin {
    type Err = DoipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != VIN_LENGTH || !s.is_ascii() {
            return Err(DoipError::invalid_parameter(format!(
                "VIN must be {VIN_LENGTH} ASCII characters, got {s:?}"
            )));
        }
        let mut bytes = [0u8; VIN_LENGTH];
        bytes.copy_from_slice(s.as_bytes());
        Ok(Self(bytes))
    }
}

impl fmt::Display for Vin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Entity identifier (EID) or group identifier (GID), usually a MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntityId(pub [u8; ENTITY_ID_LENGTH]);

impl FromStr for EntityId {
    type Err = DoipError;

    /// Parse colon separated hex, e.g. `00:02:36:31:00:1c`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            DoipError::invalid_parameter(format!(
                "EID must be {ENTITY_ID_LENGTH} colon separated hex bytes, got {s:?}"
            ))
        };

        let mut bytes = [0u8; ENTITY_ID_LENGTH];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}
