//! Conversation registry and event routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::{DmConversationConfig, VdConversationConfig};
use crate::conversation::{
    Conversation, ConversationHandlerId, DmConversation, VdConversation,
};
use crate::error::{DoipError, Result};
use crate::transport::{ChannelEvent, EventSink};

/// Parameters of a conversation to register.
#[derive(Debug, Clone)]
pub enum ConversationParams {
    /// Vehicle discovery and identification over UDP.
    VehicleDiscovery(VdConversationConfig),
    /// Diagnostic requests over TCP or TLS.
    Diagnostic(DmConversationConfig),
}

impl ConversationParams {
    fn name(&self) -> &str {
        match self {
            Self::VehicleDiscovery(config) => &config.name,
            Self::Diagnostic(config) => &config.name,
        }
    }
}

/// A registered conversation.
#[derive(Debug, Clone)]
pub enum RegisteredConversation {
    /// Vehicle discovery conversation.
    Vehicle(Arc<VdConversation>),
    /// Diagnostic conversation.
    Diagnostic(Arc<DmConversation>),
}

impl RegisteredConversation {
    /// Lifecycle view of the conversation.
    pub fn as_conversation(&self) -> &dyn Conversation {
        match self {
            Self::Vehicle(c) => c.as_ref(),
            Self::Diagnostic(c) => c.as_ref(),
        }
    }

    fn collides_with(&self, params: &ConversationParams) -> bool {
        if self.as_conversation().name() == params.name() {
            return true;
        }
        match (self, params) {
            (Self::Vehicle(existing), ConversationParams::VehicleDiscovery(config)) => {
                config.local_addr.port() != 0 && existing.config().local_addr == config.local_addr
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
struct ManagerInner {
    conversations: RwLock<HashMap<ConversationHandlerId, RegisteredConversation>>,
    next_id: AtomicU32,
}

impl ManagerInner {
    fn get(&self, id: ConversationHandlerId) -> Option<RegisteredConversation> {
        self.conversations.read().get(&id).cloned()
    }

    fn route_inbound(&self, id: ConversationHandlerId, event: ChannelEvent) {
        match self.get(id) {
            Some(conversation) => conversation.as_conversation().handle_event(event),
            None => debug!(handler_id = %id, ?event, "Dropping event for unknown conversation"),
        }
    }
}

/// Owns registered conversations and routes channel events to them.
///
/// Lookups clone the conversation handle out of the registry, so no lock
/// is held while a conversation blocks or its channel shuts down.
#[derive(Debug)]
pub struct ConversationManager {
    inner: Arc<ManagerInner>,
}

impl Default for ConversationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                conversations: RwLock::new(HashMap::new()),
                next_id: AtomicU32::new(1),
            }),
        }
    }

    /// Register a conversation and return its identifier.
    ///
    /// Fails with `DuplicateRegistration` if another conversation has the
    /// same name or is bound to the same explicit local address.
    pub fn register(&self, params: ConversationParams) -> Result<ConversationHandlerId> {
        let mut conversations = self.inner.conversations.write();
        if let Some(existing) = conversations.values().find(|c| c.collides_with(&params)) {
            return Err(DoipError::DuplicateRegistration(format!(
                "{} collides with {}",
                params.name(),
                existing.as_conversation().name()
            )));
        }

        let id = ConversationHandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let conversation = match params {
            ConversationParams::VehicleDiscovery(config) => {
                RegisteredConversation::Vehicle(Arc::new(VdConversation::new(id, config)))
            }
            ConversationParams::Diagnostic(config) => {
                RegisteredConversation::Diagnostic(Arc::new(DmConversation::new(id, config)))
            }
        };
        info!(handler_id = %id, name = %conversation.as_conversation().name(), "Conversation registered");
        conversations.insert(id, conversation);
        Ok(id)
    }

    /// Start a registered conversation.
    pub fn start(&self, id: ConversationHandlerId) -> Result<()> {
        let conversation = self.get(id)?;
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let sink: EventSink = Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.route_inbound(id, event);
            }
        });
        conversation.as_conversation().startup(sink)
    }

    /// Stop a registered conversation; it stays registered.
    pub fn stop(&self, id: ConversationHandlerId) -> Result<()> {
        self.get(id)?.as_conversation().shutdown();
        Ok(())
    }

    /// Deliver a channel event to conversation `id`.
    ///
    /// Events for unknown ids are logged and dropped.
    pub fn route_inbound(&self, id: ConversationHandlerId, event: ChannelEvent) {
        self.inner.route_inbound(id, event);
    }

    /// Stop and remove a conversation.
    pub fn unregister(&self, id: ConversationHandlerId) -> Result<()> {
        let conversation = self
            .inner
            .conversations
            .write()
            .remove(&id)
            .ok_or(DoipError::UnknownHandlerId(id))?;
        conversation.as_conversation().shutdown();
        info!(handler_id = %id, "Conversation unregistered");
        Ok(())
    }

    /// Look up any conversation.
    pub fn get(&self, id: ConversationHandlerId) -> Result<RegisteredConversation> {
        self.inner.get(id).ok_or(DoipError::UnknownHandlerId(id))
    }

    /// Look up a vehicle discovery conversation.
    pub fn vd_conversation(&self, id: ConversationHandlerId) -> Result<Arc<VdConversation>> {
        match self.get(id)? {
            RegisteredConversation::Vehicle(c) => Ok(c),
            RegisteredConversation::Diagnostic(_) => {
                Err(DoipError::ConversationKindMismatch(id, "vehicle discovery"))
            }
        }
    }

    /// Look up a diagnostic conversation.
    pub fn dm_conversation(&self, id: ConversationHandlerId) -> Result<Arc<DmConversation>> {
        match self.get(id)? {
            RegisteredConversation::Diagnostic(c) => Ok(c),
            RegisteredConversation::Vehicle(_) => {
                Err(DoipError::ConversationKindMismatch(id, "diagnostic"))
            }
        }
    }

    /// Find a conversation by name.
    pub fn find(&self, name: &str) -> Option<ConversationHandlerId> {
        self.inner
            .conversations
            .read()
            .iter()
            .find(|(_, c)| c.as_conversation().name() == name)
            .map(|(id, _)| *id)
    }

    /// Identifiers of all registered conversations, in registration order.
    pub fn ids(&self) -> Vec<ConversationHandlerId> {
        let mut ids: Vec<_> = self.inner.conversations.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of registered conversations.
    pub fn len(&self) -> usize {
        self.inner.conversations.read().len()
    }

    /// Check if no conversation is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and remove every conversation.
    pub fn clear(&self) {
        let drained: Vec<_> = self.inner.conversations.write().drain().collect();
        for (id, conversation) in drained {
            conversation.as_conversation().shutdown();
            debug!(handler_id = %id, "Conversation removed");
        }
    }
}

impl Drop for ConversationManager {
    fn drop(&mut self) {
        self.clear();
    }
}
