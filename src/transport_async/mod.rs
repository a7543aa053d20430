//! Async DoIP transport using Tokio.
//!
//! This module provides async counterparts of the discovery and diagnostic
//! conversations for applications that already run a Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use doip_client_rs::transport_async::AsyncDiagChannel;
//! use doip_client_rs::{DmConversationConfig, LogicalAddress};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DmConversationConfig::new("ecu");
//!     let mut channel = AsyncDiagChannel::connect("192.168.0.10:13400".parse()?, &config).await?;
//!     channel.activate_routing().await?;
//!
//!     let response = channel
//!         .send_diagnostic_request(LogicalAddress(0x1001), &[0x22, 0xF1, 0x90])
//!         .await?;
//!     println!("Response: {:02X?}", response);
//!
//!     Ok(())
//! }
//! ```

mod tcp;
mod udp;

pub use tcp::AsyncDiagChannel;
pub use udp::AsyncVehicleDiscovery;
