//! Async vehicle discovery and identification over UDP.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, trace};

use crate::collection::VehicleInfoCollection;
use crate::config::VdConversationConfig;
use crate::error::{DoipError, Result};
use crate::frame::FrameCodec;
use crate::payload::{Preselection, VehicleAddrInfoRequest, VehicleAddrInfoResponse};
use crate::types::PayloadType;

/// An async DoIP discovery socket.
///
/// Each call owns the socket for its duration, so discovery and
/// identification never overlap.
#[derive(Debug)]
pub struct AsyncVehicleDiscovery {
    socket: UdpSocket,
    config: VdConversationConfig,
    codec: FrameCodec,
    recv_buffer: Vec<u8>,
    local_addr: SocketAddr,
}

impl AsyncVehicleDiscovery {
    /// Bind the socket described by `config`.
    pub async fn bind(config: VdConversationConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.local_addr).await?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            codec: FrameCodec::new().with_max_payload_size(config.max_datagram_size),
            recv_buffer: vec![0u8; config.max_datagram_size],
            config,
            local_addr,
        })
    }

    /// Get the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Broadcast a discovery request and collect the answers for `window`.
    ///
    /// Duplicate announcements of the same vehicle are dropped.
    pub async fn discover(&mut self, window: Duration) -> Result<Vec<VehicleAddrInfoResponse>> {
        let frame = Preselection::None.to_frame()?;
        let target = self.config.broadcast_target();
        self.socket.send_to(&frame.to_bytes(), target).await?;
        debug!(%target, ?window, "Discovery request sent");

        let collection = VehicleInfoCollection::new();
        let deadline = Instant::now() + window;
        while let Ok(received) = timeout_at(deadline, self.next_announcement()).await {
            if collection.insert_unique(received?) {
                trace!(count = collection.len(), "Vehicle collected");
            }
        }

        let vehicles = collection.take();
        info!(count = vehicles.len(), "Discovery window closed");
        Ok(vehicles)
    }

    /// Identify a single vehicle, resending up to `max_retries` times.
    pub async fn identify(&mut self, request: &VehicleAddrInfoRequest) -> Result<VehicleAddrInfoResponse> {
        let frame = request.preselection.to_frame()?;
        let target = request
            .host
            .map(|host| SocketAddr::new(host, self.config.port))
            .unwrap_or_else(|| self.config.broadcast_target());
        let policy = self.config.identification;

        let mut attempt = 0;
        loop {
            self.socket.send_to(&frame.to_bytes(), target).await?;
            debug!(%target, attempt, "Identification request sent");

            let deadline = Instant::now() + policy.per_attempt_timeout;
            while let Ok(received) = timeout_at(deadline, self.next_announcement()).await {
                let response = received?;
                if request.preselection.matches(&response) {
                    return Ok(response);
                }
                trace!(vin = %response.vin, "Announcement does not match the preselection");
            }

            if !policy.should_retry(attempt) {
                return Err(DoipError::NoResponse {
                    attempts: attempt + 1,
                });
            }
            attempt += 1;
        }
    }

    async fn next_announcement(&mut self) -> Result<VehicleAddrInfoResponse> {
        loop {
            let (len, from) = self.socket.recv_from(&mut self.recv_buffer).await?;
            let frame = match self.codec.decode(&self.recv_buffer[..len]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(%from, error = %e, "Dropping undecodable datagram");
                    continue;
                }
            };
            if frame.payload_type() != PayloadType::VehicleAnnouncementResponse {
                trace!(%from, payload_type = ?frame.payload_type(), "Ignoring datagram");
                continue;
            }
            match VehicleAddrInfoResponse::decode(&frame.payload, from.ip()) {
                Ok(response) => return Ok(response),
                Err(e) => debug!(%from, error = %e, "Dropping malformed announcement"),
            }
        }
    }
}
