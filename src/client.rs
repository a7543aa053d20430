//! Client facade over the conversation manager.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::info;

use crate::config::{DmConversationConfig, VdConversationConfig};
use crate::conversation::{
    ConversationHandlerId, ConversationManager, ConversationParams, DmConversation, VdConversation,
};
use crate::error::{DoipError, Result};
use crate::payload::{VehicleAddrInfoRequest, VehicleAddrInfoResponse};
use crate::types::LogicalAddress;

/// Configuration of a [`DoipClient`].
#[derive(Debug, Clone, Default)]
pub struct DoipClientConfig {
    /// Vehicle discovery conversation created by [`DoipClient::initialize`].
    pub vehicle_discovery: VdConversationConfig,
}

impl DoipClientConfig {
    /// Set the vehicle discovery configuration.
    pub fn with_vehicle_discovery(mut self, config: VdConversationConfig) -> Self {
        self.vehicle_discovery = config;
        self
    }
}

/// Entry point for applications.
///
/// Owns one vehicle discovery conversation plus any number of diagnostic
/// conversations, each addressed by its [`ConversationHandlerId`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use doip_client_rs::{DoipClient, DoipClientConfig, DmConversationConfig, LogicalAddress};
///
/// let client = DoipClient::new(DoipClientConfig::default());
/// client.initialize()?;
///
/// for vehicle in client.get_diagnostic_server_list(Duration::from_secs(2))? {
///     println!("{} at {} ({})", vehicle.vin, vehicle.ip_address, vehicle.logical_address);
/// }
///
/// let id = client.register_diagnostic_conversation(DmConversationConfig::new("engine"))?;
/// client.connect_to_diag_server(id, LogicalAddress(0x1001), "192.168.0.10".parse().unwrap())?;
/// let response = client.send_diagnostic_request(id, &[0x22, 0xF1, 0x90])?;
/// println!("{response:02X?}");
/// client.shutdown();
/// # Ok::<(), doip_client_rs::DoipError>(())
/// ```
#[derive(Debug)]
pub struct DoipClient {
    config: DoipClientConfig,
    manager: ConversationManager,
    vehicle_discovery: Mutex<Option<ConversationHandlerId>>,
}

impl DoipClient {
    /// Create a client; nothing is bound until [`initialize`](Self::initialize).
    pub fn new(config: DoipClientConfig) -> Self {
        Self {
            config,
            manager: ConversationManager::new(),
            vehicle_discovery: Mutex::new(None),
        }
    }

    /// Register and start the vehicle discovery conversation. Idempotent.
    pub fn initialize(&self) -> Result<ConversationHandlerId> {
        let mut slot = self.vehicle_discovery.lock();
        if let Some(id) = *slot {
            return Ok(id);
        }

        let id = self.manager.register(ConversationParams::VehicleDiscovery(
            self.config.vehicle_discovery.clone(),
        ))?;
        if let Err(e) = self.manager.start(id) {
            let _ = self.manager.unregister(id);
            return Err(e);
        }
        *slot = Some(id);
        info!(handler_id = %id, "DoIP client initialized");
        Ok(id)
    }

    /// The underlying conversation manager.
    pub fn manager(&self) -> &ConversationManager {
        &self.manager
    }

    /// The vehicle discovery conversation.
    pub fn vd_conversation(&self) -> Result<Arc<VdConversation>> {
        let id = (*self.vehicle_discovery.lock()).ok_or(DoipError::ConversationInactive)?;
        self.manager.vd_conversation(id)
    }

    /// Discover diagnostic servers for `window`.
    pub fn get_diagnostic_server_list(&self, window: Duration) -> Result<Vec<VehicleAddrInfoResponse>> {
        self.vd_conversation()?.get_diagnostic_server_list(window)
    }

    /// Identify one vehicle.
    pub fn send_vehicle_identification_request(
        &self,
        request: &VehicleAddrInfoRequest,
    ) -> Result<VehicleAddrInfoResponse> {
        self.vd_conversation()?.send_vehicle_identification_request(request)
    }

    /// Register and start a diagnostic conversation.
    pub fn register_diagnostic_conversation(&self, config: DmConversationConfig) -> Result<ConversationHandlerId> {
        let id = self.manager.register(ConversationParams::Diagnostic(config))?;
        self.manager.start(id)?;
        Ok(id)
    }

    /// The diagnostic conversation `id`.
    pub fn dm_conversation(&self, id: ConversationHandlerId) -> Result<Arc<DmConversation>> {
        self.manager.dm_conversation(id)
    }

    /// Connect conversation `id` to the server at `host` and activate routing to `target`.
    pub fn connect_to_diag_server(
        &self,
        id: ConversationHandlerId,
        target: LogicalAddress,
        host: IpAddr,
    ) -> Result<()> {
        self.dm_conversation(id)?.connect_to_diag_server(target, host)
    }

    /// Send a UDS request on conversation `id`.
    pub fn send_diagnostic_request(&self, id: ConversationHandlerId, payload: &[u8]) -> Result<Bytes> {
        self.dm_conversation(id)?.send_diagnostic_request(payload)
    }

    /// Disconnect conversation `id` from its server.
    pub fn disconnect_from_diag_server(&self, id: ConversationHandlerId) -> Result<()> {
        self.dm_conversation(id)?.disconnect_from_diag_server()
    }

    /// Stop and remove conversation `id`.
    pub fn unregister(&self, id: ConversationHandlerId) -> Result<()> {
        self.manager.unregister(id)?;
        let mut slot = self.vehicle_discovery.lock();
        if *slot == Some(id) {
            *slot = None;
        }
        Ok(())
    }

    /// Stop and remove every conversation.
    pub fn shutdown(&self) {
        self.vehicle_discovery.lock().take();
        self.manager.clear();
        info!("DoIP client shut down");
    }
}
