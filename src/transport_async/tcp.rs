//! Async diagnostic channel over TCP.

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, trace, warn};

use crate::codec_async::{read_frame_async, write_frame_async};
use crate::config::{DEFAULT_MAX_DATAGRAM_SIZE, DmConversationConfig};
use crate::error::{DecodeError, DoipError, Result};
use crate::frame::{DoipFrame, FrameCodec};
use crate::handler::DiagnosticTiming;
use crate::payload::{
    DIAGNOSTIC_ADDRESS_LENGTH, DiagnosticMessage, DiagnosticMessageAck, RoutingActivationRequest,
    RoutingActivationResponse, alive_check_response,
};
use crate::types::{ActivationType, LogicalAddress, PayloadType};

/// An async DoIP diagnostic channel to one entity.
///
/// Plain TCP only; use [`crate::DmConversation`] for TLS. Requests run one
/// at a time because the channel is borrowed mutably for each exchange.
pub struct AsyncDiagChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    codec: FrameCodec,
    source: LogicalAddress,
    activation_type: ActivationType,
    routing_timeout: std::time::Duration,
    timing: DiagnosticTiming,
    activated: Option<RoutingActivationResponse>,
}

impl AsyncDiagChannel {
    /// Connect to `addr` using the timeouts and addresses of `config`.
    pub async fn connect(addr: SocketAddr, config: &DmConversationConfig) -> Result<Self> {
        let stream = timeout(config.channel.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DoipError::ConnectTimeout(addr))?
            .map_err(|e| DoipError::from_connect(e, addr))?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let max_payload =
            DEFAULT_MAX_DATAGRAM_SIZE.max(config.rx_buffer_size + DIAGNOSTIC_ADDRESS_LENGTH);
        debug!(peer = %addr, "Async diagnostic channel connected");
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            peer_addr: addr,
            codec: FrameCodec::new().with_max_payload_size(max_payload),
            source: config.source_address,
            activation_type: config.activation_type,
            routing_timeout: config.routing_activation_timeout,
            timing: DiagnosticTiming::from(config),
            activated: None,
        })
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Check if routing has been activated.
    pub fn is_activated(&self) -> bool {
        self.activated.is_some()
    }

    /// Request routing activation and wait for the entity's answer.
    pub async fn activate_routing(&mut self) -> Result<RoutingActivationResponse> {
        let request = RoutingActivationRequest {
            source_address: self.source,
            activation_type: self.activation_type,
        };
        let frame = DoipFrame::new(PayloadType::RoutingActivationRequest, request.to_payload())?;
        self.activated = None;
        write_frame_async(&mut self.writer, &frame).await?;

        let deadline = Instant::now() + self.routing_timeout;
        loop {
            let frame = timeout_at(deadline, self.next_frame())
                .await
                .map_err(|_| DoipError::RoutingActivationTimeout)??;
            if frame.payload_type() != PayloadType::RoutingActivationResponse {
                self.handle_unsolicited(&frame).await?;
                continue;
            }

            let response = match RoutingActivationResponse::decode(&frame.payload) {
                Ok(response) => response,
                Err(e) => {
                    debug!(error = %e, "Discarding malformed routing activation response");
                    continue;
                }
            };
            if response.client_address != self.source {
                debug!(client = %response.client_address, "Routing activation response for another tester");
                continue;
            }
            if !response.code.is_success() {
                warn!(code = %response.code, "Routing activation denied");
                return Err(DoipError::RoutingActivationDenied(response.code));
            }
            info!(entity = %response.entity_address, "Routing activated");
            self.activated = Some(response);
            return Ok(response);
        }
    }

    /// Send a UDS request to `target` and wait for its response.
    pub async fn send_diagnostic_request(&mut self, target: LogicalAddress, payload: &[u8]) -> Result<Bytes> {
        let Some(&sid) = payload.first() else {
            return Err(DoipError::invalid_parameter("empty diagnostic request"));
        };
        if self.activated.is_none() {
            return Err(DoipError::NotConnected);
        }

        let message = DiagnosticMessage {
            source_address: self.source,
            target_address: target,
            user_data: Bytes::copy_from_slice(payload),
        };
        let frame = DoipFrame::new(PayloadType::DiagnosticMessage, message.to_payload())?;
        debug!(source = %self.source, %target, sid, "Sending diagnostic request");
        write_frame_async(&mut self.writer, &frame).await?;

        let mut awaiting_ack = true;
        let mut deadline = Instant::now() + self.timing.ack_timeout;
        loop {
            let frame = match timeout_at(deadline, self.next_frame()).await {
                Ok(frame) => frame?,
                Err(_) if awaiting_ack => return Err(DoipError::AckTimeout),
                Err(_) => return Err(DoipError::ResponseTimeout),
            };

            match frame.payload_type() {
                kind @ (PayloadType::DiagnosticMessagePositiveAck
                | PayloadType::DiagnosticMessageNegativeAck) => {
                    let Ok(ack) = DiagnosticMessageAck::decode(kind, &frame.payload) else {
                        continue;
                    };
                    if !awaiting_ack || ack.source_address != target || ack.target_address != self.source {
                        continue;
                    }
                    if kind == PayloadType::DiagnosticMessageNegativeAck {
                        return Err(DoipError::NegativeAck(ack.nack_code()));
                    }
                    trace!("Diagnostic request acknowledged");
                    awaiting_ack = false;
                    deadline = Instant::now() + self.timing.p2;
                }
                PayloadType::DiagnosticMessage => {
                    let Ok(response) = DiagnosticMessage::decode(&frame.payload) else {
                        continue;
                    };
                    if response.source_address != target || response.target_address != self.source {
                        continue;
                    }
                    awaiting_ack = false;
                    if response.response_pending_sid() == Some(sid) {
                        debug!(sid, "Response pending, extending timeout");
                        deadline = Instant::now() + self.timing.p2_star;
                        continue;
                    }
                    if response.user_data.len() > self.timing.rx_buffer_size {
                        return Err(DoipError::ResponseTooLarge {
                            size: response.user_data.len(),
                            max: self.timing.rx_buffer_size,
                        });
                    }
                    return Ok(response.user_data);
                }
                _ => self.handle_unsolicited(&frame).await?,
            }
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }

    async fn next_frame(&mut self) -> Result<DoipFrame> {
        loop {
            match read_frame_async(&mut self.reader, &self.codec).await {
                Ok(frame) => return Ok(frame),
                Err(DoipError::Decode(DecodeError::UnknownPayloadType(code))) => {
                    debug!(code, "Skipping frame with unknown payload type");
                }
                Err(DoipError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(DoipError::SocketClosed);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_unsolicited(&mut self, frame: &DoipFrame) -> Result<()> {
        match frame.payload_type() {
            PayloadType::AliveCheckRequest => {
                let reply = DoipFrame::new(
                    PayloadType::AliveCheckResponse,
                    alive_check_response(self.source),
                )?;
                write_frame_async(&mut self.writer, &reply).await?;
                debug!("Answered alive check");
            }
            other => trace!(payload_type = ?other, "Ignoring frame on async diagnostic channel"),
        }
        Ok(())
    }
}

impl std::fmt::Debug for AsyncDiagChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDiagChannel")
            .field("peer_addr", &self.peer_addr)
            .field("source", &self.source)
            .field("activated", &self.activated.is_some())
            .finish_non_exhaustive()
    }
}
