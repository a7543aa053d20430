//! Vehicle discovery conversation.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::collection::VehicleInfoCollection;
use crate::config::VdConversationConfig;
use crate::conversation::{ActivityStatus, Conversation, ConversationHandlerId};
use crate::error::{DoipError, Result};
use crate::handler::{VehicleDiscoveryHandler, VehicleIdentificationHandler};
use crate::payload::{VehicleAddrInfoRequest, VehicleAddrInfoResponse, decode_generic_nack};
use crate::transport::{ChannelEvent, EventSink, UdpChannel};
use crate::types::PayloadType;

/// Discovers and identifies vehicles over UDP.
///
/// Owns the UDP channel, the identification and discovery handlers, and the
/// collection the discovery handler fills.
pub struct VdConversation {
    id: ConversationHandlerId,
    config: VdConversationConfig,
    status: Mutex<ActivityStatus>,
    channel: RwLock<Option<Arc<UdpChannel>>>,
    identification: VehicleIdentificationHandler,
    discovery: VehicleDiscoveryHandler,
}

impl VdConversation {
    /// Create an inactive conversation.
    pub fn new(id: ConversationHandlerId, config: VdConversationConfig) -> Self {
        Self {
            id,
            config,
            status: Mutex::new(ActivityStatus::Inactive),
            channel: RwLock::new(None),
            identification: VehicleIdentificationHandler::new(),
            discovery: VehicleDiscoveryHandler::new(Arc::new(VehicleInfoCollection::new())),
        }
    }

    /// Create and start a conversation that handles its own channel events.
    pub fn start(config: VdConversationConfig) -> Result<Arc<Self>> {
        let conversation = Arc::new(Self::new(ConversationHandlerId(0), config));
        let weak: Weak<Self> = Arc::downgrade(&conversation);
        let sink: EventSink = Arc::new(move |event| {
            if let Some(conversation) = weak.upgrade() {
                conversation.handle_event(event);
            }
        });
        conversation.startup(sink)?;
        Ok(conversation)
    }

    /// Configuration of this conversation.
    pub fn config(&self) -> &VdConversationConfig {
        &self.config
    }

    /// Local address of the UDP channel, if started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.channel.read().as_ref().map(|c| c.local_addr())
    }

    /// Results of the last discovery window.
    pub fn vehicles(&self) -> Vec<VehicleAddrInfoResponse> {
        self.discovery.collection().snapshot()
    }

    /// Broadcast a discovery request and collect the answers for `window`.
    pub fn get_diagnostic_server_list(&self, window: Duration) -> Result<Vec<VehicleAddrInfoResponse>> {
        let channel = self.active_channel()?;
        self.discovery
            .start_discovery(channel.as_ref(), self.config.broadcast_target(), window)
    }

    /// Identify a single vehicle.
    ///
    /// The request goes to `request.host` when set, to the broadcast address
    /// otherwise.
    pub fn send_vehicle_identification_request(
        &self,
        request: &VehicleAddrInfoRequest,
    ) -> Result<VehicleAddrInfoResponse> {
        let channel = self.active_channel()?;
        let target = request
            .host
            .map(|host| SocketAddr::new(host, self.config.port))
            .unwrap_or_else(|| self.config.broadcast_target());
        self.identification.send_identification_request(
            channel.as_ref(),
            target,
            &request.preselection,
            &self.config.identification,
        )
    }

    fn active_channel(&self) -> Result<Arc<UdpChannel>> {
        if *self.status.lock() != ActivityStatus::Active {
            return Err(DoipError::ConversationInactive);
        }
        self.channel.read().clone().ok_or(DoipError::ConversationInactive)
    }
}

impl Conversation for VdConversation {
    fn id(&self) -> ConversationHandlerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn status(&self) -> ActivityStatus {
        *self.status.lock()
    }

    fn startup(&self, sink: EventSink) -> Result<()> {
        let mut status = self.status.lock();
        if *status == ActivityStatus::Active {
            return Ok(());
        }
        let channel = UdpChannel::open(&self.config, sink)?;
        info!(handler_id = %self.id, name = %self.config.name, local_addr = %channel.local_addr(), "Vehicle discovery conversation started");
        *self.channel.write() = Some(Arc::new(channel));
        *status = ActivityStatus::Active;
        Ok(())
    }

    fn shutdown(&self) {
        {
            let mut status = self.status.lock();
            if *status == ActivityStatus::Inactive {
                return;
            }
            *status = ActivityStatus::Inactive;
        }
        self.identification.cancel();
        self.discovery.cancel();
        let channel = self.channel.write().take();
        if let Some(channel) = channel {
            channel.close();
        }
        info!(handler_id = %self.id, name = %self.config.name, "Vehicle discovery conversation stopped");
    }

    fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Frame(inbound) => {
                let ip = inbound.source.ip();
                let frame = inbound.frame;
                match frame.payload_type() {
                    PayloadType::VehicleAnnouncementResponse => {
                        self.identification.process_response(&frame.payload, ip);
                        self.discovery.process_announcement(&frame.payload, ip);
                    }
                    PayloadType::GenericNack => match decode_generic_nack(&frame.payload) {
                        Ok(code) => warn!(source = %inbound.source, ?code, "Generic NACK received"),
                        Err(e) => debug!(source = %inbound.source, error = %e, "Malformed generic NACK"),
                    },
                    other => {
                        debug!(source = %inbound.source, payload_type = ?other, "Ignoring frame on discovery channel")
                    }
                }
            }
            ChannelEvent::Closed => {
                warn!(handler_id = %self.id, "Discovery channel closed");
                self.identification.cancel();
                self.discovery.cancel();
            }
        }
    }
}

impl Drop for VdConversation {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for VdConversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VdConversation")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
