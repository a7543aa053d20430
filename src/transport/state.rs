//! Channel state tracking.

use std::time::{Duration, Instant};

/// Lifecycle state of a stream channel.
///
/// A channel only exists once its stream (and TLS session) is up, so it
/// starts `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Connected and ready.
    Connected,
    /// Closed locally, by the peer, or after a socket error.
    Closed,
}

impl ChannelState {
    /// Check if frames can be written.
    pub fn is_connected(&self) -> bool {
        *self == ChannelState::Connected
    }

    /// Check if the channel reached its terminal state.
    pub fn is_closed(&self) -> bool {
        *self == ChannelState::Closed
    }
}

/// Channel traffic statistics.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    /// Number of frames sent.
    pub frames_sent: u64,
    /// Number of frames received and delivered.
    pub frames_received: u64,
    /// Number of inbound frames dropped as undecodable.
    pub frames_discarded: u64,
    /// Total bytes sent.
    pub bytes_sent: u64,
    /// Total bytes received.
    pub bytes_received: u64,
    /// Time the channel became connected.
    pub connected_at: Option<Instant>,
    /// Time the channel closed.
    pub closed_at: Option<Instant>,
}

impl ChannelStats {
    /// Record a successful connection.
    pub fn record_connect(&mut self) {
        self.connected_at = Some(Instant::now());
    }

    /// Record the channel closing.
    pub fn record_close(&mut self) {
        self.closed_at.get_or_insert_with(Instant::now);
    }

    /// Record a sent frame.
    pub fn record_send(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record raw bytes read from the socket.
    pub fn record_bytes(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }

    /// Record a delivered frame.
    pub fn record_receive(&mut self) {
        self.frames_received += 1;
    }

    /// Record a dropped frame.
    pub fn record_discard(&mut self) {
        self.frames_discarded += 1;
    }

    /// Time spent connected.
    pub fn uptime(&self) -> Option<Duration> {
        let connected = self.connected_at?;
        Some(match self.closed_at {
            Some(closed) => closed.duration_since(connected),
            None => connected.elapsed(),
        })
    }
}
