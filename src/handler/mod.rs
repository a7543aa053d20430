//! Protocol state machines.
//!
//! Each handler owns one state machine and blocks its caller until the
//! machine reaches a terminal state. Inbound payloads are fed in by the
//! owning conversation from the channel's receive thread, so every handler
//! can also be driven directly in tests without any socket.

pub mod diagnostic;
pub mod discovery;
pub mod identification;
pub mod routing;

pub use diagnostic::{DiagnosticMessageHandler, DiagnosticState, DiagnosticTiming};
pub use discovery::{DiscoveryAction, DiscoveryEvent, DiscoveryState, VehicleDiscoveryHandler};
pub use identification::{
    IdentificationAction, IdentificationEvent, IdentificationOutcome, IdentificationState,
    VehicleIdentificationHandler,
};
pub use routing::{RoutingActivationHandler, RoutingState};
