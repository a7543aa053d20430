//! Typed DoIP payloads.
//!
//! Each payload type knows its own byte layout; the generic header is
//! handled by [`crate::frame`].

mod diagnostic;
mod vehicle;

pub use diagnostic::{
    DIAGNOSTIC_ADDRESS_LENGTH, DiagnosticMessage, DiagnosticMessageAck,
    ROUTING_ACTIVATION_REQUEST_LENGTH, ROUTING_ACTIVATION_RESPONSE_MAX_LENGTH,
    ROUTING_ACTIVATION_RESPONSE_MIN_LENGTH, RoutingActivationRequest, RoutingActivationResponse,
    alive_check_response, decode_generic_nack,
};
pub use vehicle::{
    ANNOUNCEMENT_LENGTH, ANNOUNCEMENT_LENGTH_WITH_SYNC, FURTHER_ACTION_CENTRAL_SECURITY,
    Preselection, VehicleAddrInfoRequest, VehicleAddrInfoResponse, VehicleKey,
};
