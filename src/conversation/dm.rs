//! Diagnostic message conversation.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_MAX_DATAGRAM_SIZE, DmConversationConfig};
use crate::conversation::{ActivityStatus, Conversation, ConversationHandlerId};
use crate::error::{DoipError, Result};
use crate::frame::DoipFrame;
use crate::handler::{DiagnosticMessageHandler, DiagnosticTiming, RoutingActivationHandler};
use crate::payload::{DIAGNOSTIC_ADDRESS_LENGTH, alive_check_response, decode_generic_nack};
use crate::tls::CipherSuite;
use crate::transport::{ChannelEvent, EventSink, FrameSink, TcpChannel};
use crate::types::{LogicalAddress, PayloadType};

#[derive(Debug, Clone, Copy)]
struct Session {
    target: LogicalAddress,
    peer: SocketAddr,
}

/// Exchanges UDS requests with one diagnostic server over TCP or TLS.
///
/// Connecting runs routing activation; afterwards requests go out one at a
/// time. Alive check requests from the entity are answered automatically.
pub struct DmConversation {
    id: ConversationHandlerId,
    config: DmConversationConfig,
    status: Mutex<ActivityStatus>,
    sink: Mutex<Option<EventSink>>,
    connecting: Mutex<()>,
    channel: RwLock<Option<Arc<TcpChannel>>>,
    session: Mutex<Option<Session>>,
    routing: RoutingActivationHandler,
    diagnostic: DiagnosticMessageHandler,
}

impl DmConversation {
    /// Create an inactive conversation.
    pub fn new(id: ConversationHandlerId, config: DmConversationConfig) -> Self {
        Self {
            id,
            config,
            status: Mutex::new(ActivityStatus::Inactive),
            sink: Mutex::new(None),
            connecting: Mutex::new(()),
            channel: RwLock::new(None),
            session: Mutex::new(None),
            routing: RoutingActivationHandler::new(),
            diagnostic: DiagnosticMessageHandler::new(),
        }
    }

    /// Create and start a conversation that handles its own channel events.
    pub fn start(config: DmConversationConfig) -> Result<Arc<Self>> {
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
    pub fn config(&self) -> &DmConversationConfig {
        &self.config
    }

    /// Check if a server is connected and routing is active.
    pub fn is_connected(&self) -> bool {
        self.channel.read().as_ref().is_some_and(|c| c.is_open()) && self.routing.is_active()
    }

    /// Logical address of the connected server.
    pub fn target_address(&self) -> Option<LogicalAddress> {
        self.session.lock().map(|s| s.target)
    }

    /// Suite negotiated on a TLS connection.
    pub fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        self.channel.read().as_ref().and_then(|c| c.negotiated_cipher_suite())
    }

    /// Connect to the server at `host`, then activate routing towards `target`.
    ///
    /// A failed activation closes the connection again. Fails with
    /// `AlreadyInProgress` while another connect runs or a server is connected.
    pub fn connect_to_diag_server(&self, target: LogicalAddress, host: IpAddr) -> Result<()> {
        if self.status() != ActivityStatus::Active {
            return Err(DoipError::ConversationInactive);
        }
        let Some(sink) = self.sink.lock().clone() else {
            return Err(DoipError::ConversationInactive);
        };
        // held until routing is active or the attempt is torn down
        let Some(_connecting) = self.connecting.try_lock() else {
            return Err(DoipError::AlreadyInProgress);
        };
        if self.channel.read().as_ref().is_some_and(|c| c.is_open()) {
            return Err(DoipError::AlreadyInProgress);
        }

        let peer = SocketAddr::new(host, self.config.port);
        let max_payload =
            DEFAULT_MAX_DATAGRAM_SIZE.max(self.config.rx_buffer_size + DIAGNOSTIC_ADDRESS_LENGTH);
        let channel = Arc::new(TcpChannel::connect(
            peer,
            &self.config.channel,
            self.config.tls.as_ref(),
            max_payload,
            sink,
        )?);
        *self.channel.write() = Some(Arc::clone(&channel));

        let activation = self.routing.activate(
            channel.as_ref(),
            self.config.source_address,
            self.config.activation_type,
            self.config.routing_activation_timeout,
        );
        if let Err(e) = activation {
            let mut current = self.channel.write();
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &channel)) {
                current.take();
            }
            drop(current);
            channel.close();
            return Err(e);
        }

        *self.session.lock() = Some(Session { target, peer });
        info!(handler_id = %self.id, %peer, %target, secure = channel.is_secure(), "Connected to diagnostic server");
        Ok(())
    }

    /// Close the connection to the diagnostic server.
    pub fn disconnect_from_diag_server(&self) -> Result<()> {
        let channel = self.channel.write().take();
        let Some(channel) = channel else {
            return Err(DoipError::NotConnected);
        };
        self.diagnostic.cancel(DoipError::Cancelled);
        self.routing.cancel(DoipError::Cancelled);
        channel.close();
        self.routing.reset();
        let session = self.session.lock().take();
        info!(handler_id = %self.id, peer = ?session.map(|s| s.peer), "Disconnected from diagnostic server");
        Ok(())
    }

    /// Send a UDS request to the connected server and wait for its response.
    pub fn send_diagnostic_request(&self, payload: &[u8]) -> Result<Bytes> {
        if self.status() != ActivityStatus::Active {
            return Err(DoipError::ConversationInactive);
        }
        let channel = self.channel.read().clone().ok_or(DoipError::NotConnected)?;
        let session = (*self.session.lock()).ok_or(DoipError::NotConnected)?;
        if !self.routing.is_active() {
            return Err(DoipError::NotConnected);
        }

        self.diagnostic.send_request(
            channel.as_ref(),
            self.config.source_address,
            session.target,
            Bytes::copy_from_slice(payload),
            DiagnosticTiming::from(&self.config),
        )
    }

    fn answer_alive_check(&self) {
        let channel = self.channel.read().clone();
        let Some(channel) = channel else {
            return;
        };
        let reply = DoipFrame::new(
            PayloadType::AliveCheckResponse,
            alive_check_response(self.config.source_address),
        )
        .and_then(|frame| channel.send_frame(&frame));
        match reply {
            Ok(()) => debug!(handler_id = %self.id, "Answered alive check"),
            Err(e) => warn!(handler_id = %self.id, error = %e, "Alive check response failed"),
        }
    }
}

impl Conversation for DmConversation {
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
        *self.sink.lock() = Some(sink);
        if *status != ActivityStatus::Active {
            *status = ActivityStatus::Active;
            info!(handler_id = %self.id, name = %self.config.name, "Diagnostic conversation started");
        }
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
        self.diagnostic.cancel(DoipError::Cancelled);
        self.routing.cancel(DoipError::Cancelled);
        match self.disconnect_from_diag_server() {
            Ok(()) | Err(DoipError::NotConnected) => {}
            Err(e) => warn!(handler_id = %self.id, error = %e, "Disconnect on shutdown failed"),
        }
        self.sink.lock().take();
        info!(handler_id = %self.id, name = %self.config.name, "Diagnostic conversation stopped");
    }

    fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Frame(inbound) => {
                let frame = inbound.frame;
                match frame.payload_type() {
                    PayloadType::RoutingActivationResponse => self.routing.process_response(&frame.payload),
                    kind @ (PayloadType::DiagnosticMessagePositiveAck
                    | PayloadType::DiagnosticMessageNegativeAck) => {
                        self.diagnostic.process_ack(kind, &frame.payload)
                    }
                    PayloadType::DiagnosticMessage => self.diagnostic.process_message(&frame.payload),
                    PayloadType::AliveCheckRequest => self.answer_alive_check(),
                    PayloadType::GenericNack => match decode_generic_nack(&frame.payload) {
                        Ok(code) => warn!(handler_id = %self.id, ?code, "Generic NACK received"),
                        Err(e) => debug!(handler_id = %self.id, error = %e, "Malformed generic NACK"),
                    },
                    other => debug!(handler_id = %self.id, payload_type = ?other, "Ignoring frame on diagnostic channel"),
                }
            }
            ChannelEvent::Closed => {
                warn!(handler_id = %self.id, "Diagnostic server closed the connection");
                // tear down before waking callers so they observe the disconnect
                self.routing.reset();
                let channel = self.channel.write().take();
                drop(channel);
                self.session.lock().take();
                self.routing.cancel(DoipError::SocketClosed);
                self.diagnostic.cancel(DoipError::SocketClosed);
            }
        }
    }
}

impl Drop for DmConversation {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DmConversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmConversation")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("status", &self.status())
            .field("target", &self.target_address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_errors() {
        let conversation = DmConversation::new(ConversationHandlerId(9), DmConversationConfig::new("dm"));
        assert!(matches!(
            conversation.send_diagnostic_request(&[0x3E, 0x00]),
            Err(DoipError::ConversationInactive)
        ));
        assert!(matches!(
            conversation.connect_to_diag_server(LogicalAddress(0x1001), "127.0.0.1".parse().unwrap()),
            Err(DoipError::ConversationInactive)
        ));

        conversation.startup(Arc::new(|_| {})).unwrap();
        assert_eq!(conversation.status(), ActivityStatus::Active);
        assert!(matches!(
            conversation.send_diagnostic_request(&[0x3E, 0x00]),
            Err(DoipError::NotConnected)
        ));
        assert!(matches!(
            conversation.disconnect_from_diag_server(),
            Err(DoipError::NotConnected)
        ));
        assert!(!conversation.is_connected());

        conversation.shutdown();
        conversation.shutdown();
        assert_eq!(conversation.status(), ActivityStatus::Inactive);
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let conversation = DmConversation::start(DmConversationConfig::new("dm").with_port(port)).unwrap();
        let result = conversation.connect_to_diag_server(LogicalAddress(0x1001), "127.0.0.1".parse().unwrap());
        assert!(matches!(result, Err(DoipError::ConnectionRefused(_))));
        assert!(conversation.target_address().is_none());
    }
}
