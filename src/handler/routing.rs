//! Routing activation handler.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{DoipError, Result};
use crate::frame::DoipFrame;
use crate::payload::{RoutingActivationRequest, RoutingActivationResponse};
use crate::transport::FrameSink;
use crate::types::{ActivationType, LogicalAddress, PayloadType};

/// State of the routing activation handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingState {
    /// No activation requested on this connection.
    #[default]
    Idle,
    /// Request sent, waiting for the entity.
    AwaitingResponse,
    /// Routing is active.
    Activated,
    /// Activation was denied, timed out or aborted.
    Failed,
}

#[derive(Debug, Default)]
struct Inner {
    state: RoutingState,
    source: LogicalAddress,
    outcome: Option<Result<RoutingActivationResponse>>,
    response: Option<RoutingActivationResponse>,
}

/// Activates routing on a freshly connected diagnostic channel.
#[derive(Debug, Default)]
pub struct RoutingActivationHandler {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl RoutingActivationHandler {
    /// Create an idle handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> RoutingState {
        self.inner.lock().state
    }

    /// Check if routing is active.
    pub fn is_active(&self) -> bool {
        self.state() == RoutingState::Activated
    }

    /// Response of the last successful activation.
    pub fn response(&self) -> Option<RoutingActivationResponse> {
        self.inner.lock().response
    }

    /// Request routing for `source` and wait up to `timeout` for the answer.
    pub fn activate(
        &self,
        writer: &dyn FrameSink,
        source: LogicalAddress,
        activation_type: ActivationType,
        timeout: Duration,
    ) -> Result<RoutingActivationResponse> {
        let request = RoutingActivationRequest {
            source_address: source,
            activation_type,
        };
        let frame = DoipFrame::new(PayloadType::RoutingActivationRequest, request.to_payload())?;

        let mut inner = self.inner.lock();
        if inner.state == RoutingState::AwaitingResponse {
            return Err(DoipError::AlreadyInProgress);
        }
        inner.state = RoutingState::AwaitingResponse;
        inner.source = source;
        inner.outcome = None;
        inner.response = None;

        debug!(%source, ?activation_type, "Requesting routing activation");
        if let Err(e) = MutexGuard::unlocked(&mut inner, || writer.send_frame(&frame)) {
            inner.state = RoutingState::Failed;
            return Err(e);
        }

        let deadline = Instant::now() + timeout;
        self.cond
            .wait_while_until(&mut inner, |i| i.outcome.is_none(), deadline);

        match inner.outcome.take() {
            Some(Ok(response)) => {
                inner.state = RoutingState::Activated;
                inner.response = Some(response);
                info!(entity = %response.entity_address, "Routing activated");
                Ok(response)
            }
            Some(Err(e)) => {
                inner.state = RoutingState::Failed;
                Err(e)
            }
            None => {
                inner.state = RoutingState::Failed;
                warn!(?timeout, "Routing activation timed out");
                Err(DoipError::RoutingActivationTimeout)
            }
        }
    }

    /// Feed a routing activation response payload.
    pub fn process_response(&self, payload: &[u8]) {
        let response = match RoutingActivationResponse::decode(payload) {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Discarding malformed routing activation response");
                return;
            }
        };

        let mut inner = self.inner.lock();
        if inner.state != RoutingState::AwaitingResponse || inner.outcome.is_some() {
            debug!(code = %response.code, "Unexpected routing activation response");
            return;
        }
        if response.client_address != inner.source {
            debug!(
                client = %response.client_address,
                expected = %inner.source,
                "Routing activation response for another tester"
            );
            return;
        }

        inner.outcome = Some(if response.code.is_success() {
            Ok(response)
        } else {
            warn!(code = %response.code, "Routing activation denied");
            Err(DoipError::RoutingActivationDenied(response.code))
        });
        self.cond.notify_all();
    }

    /// Abort a pending activation with `error`.
    pub fn cancel(&self, error: DoipError) {
        let mut inner = self.inner.lock();
        if inner.state == RoutingState::AwaitingResponse && inner.outcome.is_none() {
            inner.outcome = Some(Err(error));
            self.cond.notify_all();
        }
    }

    /// Forget the activation, e.g. after the connection closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != RoutingState::AwaitingResponse {
            inner.state = RoutingState::Idle;
            inner.response = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;
    use crate::types::RoutingActivationCode;
    use std::sync::Arc;
    use std::thread;

    const TESTER: LogicalAddress = LogicalAddress(0x0E80);

    fn response(client: LogicalAddress, code: u8) -> Vec<u8> {
        RoutingActivationResponse {
            client_address: client,
            entity_address: LogicalAddress(0x1001),
            code: RoutingActivationCode::from_u8(code),
            oem: None,
        }
        .to_payload()
        .to_vec()
    }

    fn respond_after(handler: &Arc<RoutingActivationHandler>, payloads: Vec<Vec<u8>>) -> thread::JoinHandle<()> {
        let handler = Arc::clone(handler);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            for payload in payloads {
                handler.process_response(&payload);
            }
        })
    }

    #[test]
    fn test_activation_success() {
        let handler = Arc::new(RoutingActivationHandler::new());
        let sink = RecordingSink::default();
        let responder = respond_after(
            &handler,
            vec![response(LogicalAddress(0x0E81), 0x10), response(TESTER, 0x10)],
        );

        let result = handler
            .activate(&sink, TESTER, ActivationType::Default, Duration::from_secs(1))
            .unwrap();
        responder.join().unwrap();

        assert_eq!(result.entity_address, LogicalAddress(0x1001));
        assert!(handler.is_active());

        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload_type(), PayloadType::RoutingActivationRequest);
        assert_eq!(frames[0].payload.as_ref(), &[0x0E, 0x80, 0x00, 0, 0, 0, 0]);

        handler.reset();
        assert_eq!(handler.state(), RoutingState::Idle);
    }

    #[test]
    fn test_activation_denied() {
        let handler = Arc::new(RoutingActivationHandler::new());
        let sink = RecordingSink::default();
        let responder = respond_after(&handler, vec![response(TESTER, 0x03)]);

        let result = handler.activate(&sink, TESTER, ActivationType::Default, Duration::from_secs(1));
        responder.join().unwrap();

        assert!(matches!(
            result,
            Err(DoipError::RoutingActivationDenied(RoutingActivationCode::SourceAddressInUse))
        ));
        assert_eq!(handler.state(), RoutingState::Failed);
    }

    #[test]
    fn test_activation_timeout() {
        let handler = RoutingActivationHandler::new();
        let sink = RecordingSink::default();
        let start = Instant::now();
        let result = handler.activate(&sink, TESTER, ActivationType::Default, Duration::from_millis(100));
        assert!(matches!(result, Err(DoipError::RoutingActivationTimeout)));
        assert!(start.elapsed() >= Duration::from_millis(100));

        // a late answer does not revive the activation
        handler.process_response(&response(TESTER, 0x10));
        assert!(!handler.is_active());
    }

    #[test]
    fn test_activation_cancelled_on_close() {
        let handler = Arc::new(RoutingActivationHandler::new());
        let canceller = {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                handler.cancel(DoipError::SocketClosed);
            })
        };

        let sink = RecordingSink::default();
        let result = handler.activate(&sink, TESTER, ActivationType::Default, Duration::from_secs(2));
        canceller.join().unwrap();
        assert!(matches!(result, Err(DoipError::SocketClosed)));
    }
}
