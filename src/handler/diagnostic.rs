//! Diagnostic message handler.

use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::config::DmConversationConfig;
use crate::error::{DoipError, Result};
use crate::frame::DoipFrame;
use crate::payload::{DiagnosticMessage, DiagnosticMessageAck};
use crate::transport::FrameSink;
use crate::types::{LogicalAddress, PayloadType};

/// Timers and limits of one diagnostic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticTiming {
    /// Time to wait for the acknowledgement.
    pub ack_timeout: Duration,
    /// Time to wait for the response after the acknowledgement.
    pub p2: Duration,
    /// Time to wait after each response-pending answer.
    pub p2_star: Duration,
    /// Largest response accepted.
    pub rx_buffer_size: usize,
}

impl From<&DmConversationConfig> for DiagnosticTiming {
    fn from(config: &DmConversationConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout,
            p2: config.p2_client_max,
            p2_star: config.p2_star_client_max,
            rx_buffer_size: config.rx_buffer_size,
        }
    }
}

/// State of the diagnostic message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticState {
    /// No request sent yet.
    #[default]
    Idle,
    /// Request sent, waiting for the entity to acknowledge it.
    AwaitingAck,
    /// Acknowledged, waiting for the ECU's response.
    AwaitingResponse,
    /// The last request finished.
    Completed,
}

impl DiagnosticState {
    /// Check if a request is in flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::AwaitingAck | Self::AwaitingResponse)
    }
}

#[derive(Debug)]
struct Inner {
    state: DiagnosticState,
    source: LogicalAddress,
    target: LogicalAddress,
    sid: u8,
    timing: DiagnosticTiming,
    deadline: Instant,
    outcome: Option<Result<Bytes>>,
}

/// Sends one UDS request at a time and waits for its response.
///
/// The exchange is acknowledgement first, then the response; UDS
/// response-pending answers push the deadline out by P2*.
#[derive(Debug)]
pub struct DiagnosticMessageHandler {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Default for DiagnosticMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticMessageHandler {
    /// Create an idle handler.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: DiagnosticState::Idle,
                source: LogicalAddress::default(),
                target: LogicalAddress::default(),
                sid: 0,
                timing: DiagnosticTiming::from(&DmConversationConfig::default()),
                deadline: Instant::now(),
                outcome: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> DiagnosticState {
        self.inner.lock().state
    }

    /// Send `payload` from `source` to `target` and wait for the response.
    pub fn send_request(
        &self,
        writer: &dyn FrameSink,
        source: LogicalAddress,
        target: LogicalAddress,
        payload: Bytes,
        timing: DiagnosticTiming,
    ) -> Result<Bytes> {
        let Some(&sid) = payload.first() else {
            return Err(DoipError::invalid_parameter("empty diagnostic request"));
        };
        let message = DiagnosticMessage {
            source_address: source,
            target_address: target,
            user_data: payload,
        };
        let frame = DoipFrame::new(PayloadType::DiagnosticMessage, message.to_payload())?;

        let mut inner = self.inner.lock();
        if inner.state.is_in_flight() {
            return Err(DoipError::AlreadyInProgress);
        }
        inner.state = DiagnosticState::AwaitingAck;
        inner.source = source;
        inner.target = target;
        inner.sid = sid;
        inner.timing = timing;
        inner.deadline = Instant::now() + timing.ack_timeout;
        inner.outcome = None;

        debug!(%source, %target, sid, len = message.user_data.len(), "Sending diagnostic request");
        if let Err(e) = MutexGuard::unlocked(&mut inner, || writer.send_frame(&frame)) {
            inner.state = DiagnosticState::Completed;
            return Err(e);
        }

        loop {
            if let Some(outcome) = inner.outcome.take() {
                inner.state = DiagnosticState::Completed;
                return outcome;
            }
            let deadline = inner.deadline;
            if Instant::now() >= deadline {
                let error = match inner.state {
                    DiagnosticState::AwaitingAck => DoipError::AckTimeout,
                    _ => DoipError::ResponseTimeout,
                };
                warn!(%target, sid, error = %error, "Diagnostic request timed out");
                inner.state = DiagnosticState::Completed;
                return Err(error);
            }
            self.cond.wait_until(&mut inner, deadline);
        }
    }

    /// Feed a positive (0x8002) or negative (0x8003) acknowledgement.
    pub fn process_ack(&self, payload_type: PayloadType, payload: &Bytes) {
        let ack = match DiagnosticMessageAck::decode(payload_type, payload) {
            Ok(ack) => ack,
            Err(e) => {
                debug!(error = %e, "Discarding malformed diagnostic acknowledgement");
                return;
            }
        };

        let mut inner = self.inner.lock();
        if inner.state != DiagnosticState::AwaitingAck || inner.outcome.is_some() {
            debug!(?payload_type, "Acknowledgement without a pending request");
            return;
        }
        if ack.source_address != inner.target || ack.target_address != inner.source {
            debug!(from = %ack.source_address, to = %ack.target_address, "Acknowledgement for another exchange");
            return;
        }

        if payload_type == PayloadType::DiagnosticMessageNegativeAck {
            let code = ack.nack_code();
            warn!(%code, "Diagnostic request rejected");
            inner.outcome = Some(Err(DoipError::NegativeAck(code)));
        } else {
            trace!("Diagnostic request acknowledged");
            inner.state = DiagnosticState::AwaitingResponse;
            inner.deadline = Instant::now() + inner.timing.p2;
        }
        self.cond.notify_all();
    }

    /// Feed a diagnostic message (0x8001) received from the entity.
    pub fn process_message(&self, payload: &Bytes) {
        let message = match DiagnosticMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Discarding malformed diagnostic message");
                return;
            }
        };

        let mut inner = self.inner.lock();
        if !inner.state.is_in_flight() || inner.outcome.is_some() {
            debug!(from = %message.source_address, "Diagnostic message without a pending request");
            return;
        }
        if message.source_address != inner.target || message.target_address != inner.source {
            debug!(from = %message.source_address, to = %message.target_address, "Diagnostic message for another exchange");
            return;
        }

        // a response implies the acknowledgement
        inner.state = DiagnosticState::AwaitingResponse;

        if message.response_pending_sid() == Some(inner.sid) {
            debug!(sid = inner.sid, "Response pending, extending timeout");
            inner.deadline = Instant::now() + inner.timing.p2_star;
        } else if message.user_data.len() > inner.timing.rx_buffer_size {
            inner.outcome = Some(Err(DoipError::ResponseTooLarge {
                size: message.user_data.len(),
                max: inner.timing.rx_buffer_size,
            }));
        } else {
            inner.outcome = Some(Ok(message.user_data));
        }
        self.cond.notify_all();
    }

    /// Abort an in-flight request with `error`.
    pub fn cancel(&self, error: DoipError) {
        let mut inner = self.inner.lock();
        if inner.state.is_in_flight() && inner.outcome.is_none() {
            inner.outcome = Some(Err(error));
            self.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;
    use crate::types::DiagnosticNackCode;
    use std::sync::Arc;
    use std::thread;

    const TESTER: LogicalAddress = LogicalAddress(0x0E80);
    const ECU: LogicalAddress = LogicalAddress(0x1001);

    fn timing() -> DiagnosticTiming {
        DiagnosticTiming {
            ack_timeout: Duration::from_millis(200),
            p2: Duration::from_millis(100),
            p2_star: Duration::from_millis(500),
            rx_buffer_size: 64,
        }
    }

    fn ack(code: u8) -> Bytes {
        DiagnosticMessageAck {
            source_address: ECU,
            target_address: TESTER,
            code,
            previous_message: Bytes::new(),
        }
        .to_payload()
    }

    fn reply(data: &[u8]) -> Bytes {
        DiagnosticMessage {
            source_address: ECU,
            target_address: TESTER,
            user_data: Bytes::copy_from_slice(data),
        }
        .to_payload()
    }

    enum Step {
        Ack(PayloadType, u8),
        Message(Vec<u8>),
    }

    fn script(handler: &Arc<DiagnosticMessageHandler>, steps: Vec<(u64, Step)>) -> thread::JoinHandle<()> {
        let handler = Arc::clone(handler);
        thread::spawn(move || {
            let start = Instant::now();
            for (at, step) in steps {
                thread::sleep(Duration::from_millis(at).saturating_sub(start.elapsed()));
                match step {
                    Step::Ack(kind, code) => handler.process_ack(kind, &ack(code)),
                    Step::Message(data) => handler.process_message(&reply(&data)),
                }
            }
        })
    }

    #[test]
    fn test_request_response() {
        let handler = Arc::new(DiagnosticMessageHandler::new());
        let sink = RecordingSink::default();
        let peer = script(
            &handler,
            vec![
                (20, Step::Ack(PayloadType::DiagnosticMessagePositiveAck, 0x00)),
                (40, Step::Message(vec![0x50, 0x03])),
            ],
        );

        let response = handler
            .send_request(&sink, TESTER, ECU, Bytes::from_static(&[0x10, 0x03]), timing())
            .unwrap();
        peer.join().unwrap();

        assert_eq!(response.as_ref(), &[0x50, 0x03]);
        assert_eq!(handler.state(), DiagnosticState::Completed);
        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), &[0x0E, 0x80, 0x10, 0x01, 0x10, 0x03]);
    }

    #[test]
    fn test_ack_timeout() {
        let handler = DiagnosticMessageHandler::new();
        let sink = RecordingSink::default();
        let start = Instant::now();
        let result = handler.send_request(&sink, TESTER, ECU, Bytes::from_static(&[0x3E, 0x00]), timing());
        assert!(matches!(result, Err(DoipError::AckTimeout)));
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_response_timeout_after_ack() {
        let handler = Arc::new(DiagnosticMessageHandler::new());
        let sink = RecordingSink::default();
        let peer = script(
            &handler,
            vec![(10, Step::Ack(PayloadType::DiagnosticMessagePositiveAck, 0x00))],
        );
        let start = Instant::now();
        let result = handler.send_request(&sink, TESTER, ECU, Bytes::from_static(&[0x22, 0xF1, 0x90]), timing());
        peer.join().unwrap();
        assert!(matches!(result, Err(DoipError::ResponseTimeout)));
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_response_pending_extends_deadline() {
        let handler = Arc::new(DiagnosticMessageHandler::new());
        let sink = RecordingSink::default();
        let peer = script(
            &handler,
            vec![
                (10, Step::Ack(PayloadType::DiagnosticMessagePositiveAck, 0x00)),
                (50, Step::Message(vec![0x7F, 0x31, 0x78])),
                (300, Step::Message(vec![0x71, 0x01, 0xFF, 0x00])),
            ],
        );

        let response = handler
            .send_request(&sink, TESTER, ECU, Bytes::from_static(&[0x31, 0x01, 0xFF, 0x00]), timing())
            .unwrap();
        peer.join().unwrap();
        assert_eq!(response.as_ref(), &[0x71, 0x01, 0xFF, 0x00]);
    }

    #[test]
    fn test_negative_ack() {
        let handler = Arc::new(DiagnosticMessageHandler::new());
        let sink = RecordingSink::default();
        let peer = script(
            &handler,
            vec![(10, Step::Ack(PayloadType::DiagnosticMessageNegativeAck, 0x03))],
        );
        let result = handler.send_request(&sink, TESTER, ECU, Bytes::from_static(&[0x10, 0x01]), timing());
        peer.join().unwrap();
        assert!(matches!(
            result,
            Err(DoipError::NegativeAck(DiagnosticNackCode::UnknownTargetAddress))
        ));
    }

    #[test]
    fn test_response_too_large() {
        let handler = Arc::new(DiagnosticMessageHandler::new());
        let sink = RecordingSink::default();
        let peer = script(
            &handler,
            vec![
                (10, Step::Ack(PayloadType::DiagnosticMessagePositiveAck, 0x00)),
                (20, Step::Message(vec![0x62; 65])),
            ],
        );
        let result = handler.send_request(&sink, TESTER, ECU, Bytes::from_static(&[0x22, 0xF1, 0x90]), timing());
        peer.join().unwrap();
        assert!(matches!(result, Err(DoipError::ResponseTooLarge { size: 65, max: 64 })));
    }

    #[test]
    fn test_one_in_flight_and_cancel() {
        let handler = Arc::new(DiagnosticMessageHandler::new());
        let first = {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                let sink = RecordingSink::default();
                handler.send_request(&sink, TESTER, ECU, Bytes::from_static(&[0x10, 0x01]), timing())
            })
        };
        thread::sleep(Duration::from_millis(30));

        let sink = RecordingSink::default();
        let second = handler.send_request(&sink, TESTER, ECU, Bytes::from_static(&[0x10, 0x02]), timing());
        assert!(matches!(second, Err(DoipError::AlreadyInProgress)));

        handler.cancel(DoipError::SocketClosed);
        assert!(matches!(first.join().unwrap(), Err(DoipError::SocketClosed)));
        assert_eq!(handler.state(), DiagnosticState::Completed);
    }

    #[test]
    fn test_foreign_messages_ignored() {
        let handler = Arc::new(DiagnosticMessageHandler::new());
        let sink = RecordingSink::default();
        let foreign = DiagnosticMessage {
            source_address: LogicalAddress(0x2002),
            target_address: TESTER,
            user_data: Bytes::from_static(&[0x50, 0x01]),
        }
        .to_payload();

        let peer = {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                handler.process_message(&foreign);
                handler.process_message(&Bytes::from_static(&[0x10]));
                handler.process_message(&reply(&[0x50, 0x01]));
            })
        };
        let response = handler
            .send_request(&sink, TESTER, ECU, Bytes::from_static(&[0x10, 0x01]), timing())
            .unwrap();
        peer.join().unwrap();
        assert_eq!(response.as_ref(), &[0x50, 0x01]);
    }

    #[test]
    fn test_empty_request_rejected() {
        let handler = DiagnosticMessageHandler::new();
        let sink = RecordingSink::default();
        let result = handler.send_request(&sink, TESTER, ECU, Bytes::new(), timing());
        assert!(matches!(result, Err(DoipError::InvalidParameter(_))));
        assert_eq!(handler.state(), DiagnosticState::Idle);
    }
}
