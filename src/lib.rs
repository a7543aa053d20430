//! DoIP (Diagnostics over Internet Protocol, ISO 13400-2) client built on std::net.
//!
//! This crate provides a synchronous DoIP tester: it discovers vehicles on the
//! local network over UDP, identifies single vehicles by VIN or EID, and
//! exchanges UDS diagnostic requests with diagnostic servers over TCP or TLS.
//!
//! # Features
//!
//! - DoIP generic header and frame codec with stream reassembly
//! - Vehicle discovery with a time-bounded, de-duplicated result collection
//! - Vehicle identification with retries and preselection by VIN or EID
//! - Routing activation and diagnostic requests with ACK, P2 and P2* timing
//! - TLS diagnostic channels with cipher suite negotiation (rustls)
//! - Conversation manager that multiplexes several ECUs per client
//! - Optional tokio-based async channels (`tokio` feature)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use doip_client_rs::{DmConversationConfig, DoipClient, DoipClientConfig, LogicalAddress};
//!
//! let client = DoipClient::new(DoipClientConfig::default());
//! client.initialize()?;
//!
//! let vehicles = client.get_diagnostic_server_list(Duration::from_secs(2))?;
//! let Some(vehicle) = vehicles.first() else {
//!     return Ok(());
//! };
//!
//! let id = client.register_diagnostic_conversation(DmConversationConfig::new("ecu"))?;
//! client.connect_to_diag_server(id, vehicle.logical_address, vehicle.ip_address)?;
//!
//! // ReadDataByIdentifier: VIN
//! let response = client.send_diagnostic_request(id, &[0x22, 0xF1, 0x90])?;
//! println!("Response: {response:02X?}");
//! # Ok::<(), doip_client_rs::DoipError>(())
//! ```
//!
//! # Protocol Overview
//!
//! Every DoIP message starts with an 8-byte generic header:
//!
//! ```text
//! +--------+--------+--------+--------+
//! |Version |~Version|  Payload Type   |  (4 bytes)
//! +--------+--------+--------+--------+
//! |          Payload Length           |  (4 bytes)
//! +--------+--------+--------+--------+
//! |           Payload ...             |  (variable)
//! +--------+--------+--------+--------+
//! ```

pub mod client;
pub mod codec;
pub mod collection;
pub mod config;
pub mod conversation;
pub mod error;
pub mod frame;
pub mod handler;
pub mod header;
pub mod payload;
pub mod tls;
pub mod transport;
pub mod types;

// Async modules (require tokio feature)
#[cfg(feature = "tokio")]
pub mod codec_async;
#[cfg(feature = "tokio")]
pub mod transport_async;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at the crate root
pub use client::{DoipClient, DoipClientConfig};
pub use collection::VehicleInfoCollection;
pub use config::{DmConversationConfig, IdentificationConfig, TcpChannelConfig, VdConversationConfig};
pub use conversation::{
    ActivityStatus, Conversation, ConversationHandlerId, ConversationManager, DmConversation,
    VdConversation,
};
pub use error::{DecodeError, DoipError, ErrorCategory, Result};
pub use frame::{DoipFrame, FrameCodec};
pub use header::{DoipHeader, HEADER_SIZE};
pub use payload::{Preselection, VehicleAddrInfoRequest, VehicleAddrInfoResponse};
pub use tls::{CipherSuite, TlsClientConfig, TlsServerConfig};
pub use types::{
    ActivationType, DOIP_PORT, DOIP_TLS_PORT, EntityId, LogicalAddress, PROTOCOL_VERSION,
    PayloadType, Vin,
};
