//! Transport channels for DoIP.
//!
//! A channel owns one socket and one receive thread. The receive thread
//! decodes inbound frames, drops anything undecodable, and hands the rest to
//! an [`EventSink`] supplied by the owner of the channel.

pub mod state;
pub mod tcp;
pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Result;
use crate::frame::DoipFrame;

pub use state::{ChannelState, ChannelStats};
pub use tcp::TcpChannel;
pub use udp::UdpChannel;

/// A frame received by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Decoded frame.
    pub frame: DoipFrame,
    /// Sender address.
    pub source: SocketAddr,
}

/// Event delivered from a channel's receive thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A frame was received.
    Frame(InboundFrame),
    /// The socket was closed by the peer or failed.
    Closed,
}

/// Callback receiving channel events on the receive thread.
pub type EventSink = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Outbound path of a datagram channel.
pub trait DatagramSink: Send + Sync {
    /// Send a frame to `target`.
    fn send_to(&self, frame: &DoipFrame, target: SocketAddr) -> Result<()>;
}

/// Outbound path of a stream channel.
pub trait FrameSink: Send + Sync {
    /// Write a frame to the connected peer.
    fn send_frame(&self, frame: &DoipFrame) -> Result<()>;
}
