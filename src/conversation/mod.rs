//! Conversations: stateful exchanges bound to a channel.
//!
//! A [`VdConversation`] runs vehicle discovery and identification over UDP.
//! A [`DmConversation`] runs routing activation and diagnostic requests over
//! TCP or TLS. Both are owned by a [`ConversationManager`], which hands out
//! [`ConversationHandlerId`]s and routes channel events back to them.

mod dm;
mod manager;
mod vd;

use std::fmt;

use crate::error::Result;
use crate::transport::{ChannelEvent, EventSink};

pub use dm::DmConversation;
pub use manager::{ConversationManager, ConversationParams, RegisteredConversation};
pub use vd::VdConversation;

/// Identifier assigned to a conversation at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationHandlerId(pub u32);

impl fmt::Display for ConversationHandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a conversation accepts requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityStatus {
    /// Registered but not started, or stopped.
    #[default]
    Inactive,
    /// Started.
    Active,
}

/// Lifecycle shared by every conversation kind.
pub trait Conversation: Send + Sync {
    /// Identifier assigned at registration.
    fn id(&self) -> ConversationHandlerId;

    /// Unique conversation name.
    fn name(&self) -> &str;

    /// Current activity status.
    fn status(&self) -> ActivityStatus;

    /// Start the conversation; channel events go to `sink`.
    fn startup(&self, sink: EventSink) -> Result<()>;

    /// Stop the conversation, cancelling blocked callers. Idempotent.
    fn shutdown(&self);

    /// Handle an event from one of this conversation's channels.
    fn handle_event(&self, event: ChannelEvent);
}
