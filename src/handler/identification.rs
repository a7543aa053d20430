//! Vehicle identification handler.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::config::IdentificationConfig;
use crate::error::{DoipError, Result};
use crate::payload::{Preselection, VehicleAddrInfoResponse};
use crate::transport::DatagramSink;

/// How an identification exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentificationOutcome {
    /// A matching response arrived.
    Success,
    /// Every attempt timed out.
    Timeout,
    /// The exchange was cancelled.
    Cancelled,
}

/// State of the identification handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentificationState {
    /// No exchange has been started.
    #[default]
    Idle,
    /// A request is out; `attempt` counts resends.
    AwaitingResponse {
        /// Zero for the first request.
        attempt: u32,
    },
    /// The last exchange finished.
    Completed(IdentificationOutcome),
}

/// Inputs to the identification state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentificationEvent {
    /// The caller asks for an identification.
    Send,
    /// A matching response was received.
    Response,
    /// The per-attempt timer fired.
    TimerExpired,
    /// The owning conversation is stopping.
    Cancel,
}

/// What the handler does after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentificationAction {
    /// Send the request (first attempt or retry) and arm the timer.
    SendRequest,
    /// Hand the response to the caller.
    Deliver,
    /// Report `NoResponse`.
    GiveUp,
    /// Report `Cancelled`.
    Abort,
    /// Reject the call with `AlreadyInProgress`.
    Reject,
    /// Nothing to do.
    Ignore,
}

impl IdentificationState {
    /// Transition table.
    pub fn on_event(
        self,
        event: IdentificationEvent,
        config: &IdentificationConfig,
    ) -> (Self, IdentificationAction) {
        use IdentificationAction as A;
        use IdentificationEvent as E;

        match (self, event) {
            (Self::Idle | Self::Completed(_), E::Send) => {
                (Self::AwaitingResponse { attempt: 0 }, A::SendRequest)
            }
            (Self::AwaitingResponse { .. }, E::Send) => (self, A::Reject),
            (Self::AwaitingResponse { .. }, E::Response) => {
                (Self::Completed(IdentificationOutcome::Success), A::Deliver)
            }
            (Self::AwaitingResponse { attempt }, E::TimerExpired) => {
                if config.should_retry(attempt) {
                    (Self::AwaitingResponse { attempt: attempt + 1 }, A::SendRequest)
                } else {
                    (Self::Completed(IdentificationOutcome::Timeout), A::GiveUp)
                }
            }
            (Self::AwaitingResponse { .. }, E::Cancel) => {
                (Self::Completed(IdentificationOutcome::Cancelled), A::Abort)
            }
            (state, _) => (state, A::Ignore),
        }
    }

    /// Check if a request is outstanding.
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingResponse { .. })
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: IdentificationState,
    preselection: Preselection,
    config: IdentificationConfig,
    response: Option<VehicleAddrInfoResponse>,
}

impl Inner {
    fn apply(&mut self, event: IdentificationEvent) -> IdentificationAction {
        let (next, action) = self.state.on_event(event, &self.config);
        if next != self.state {
            trace!(from = ?self.state, to = ?next, ?event, "Identification transition");
        }
        self.state = next;
        action
    }
}

/// Runs one targeted identification exchange at a time.
///
/// The caller blocks in [`send_identification_request`] while the receive
/// path feeds responses through [`process_response`].
///
/// [`send_identification_request`]: Self::send_identification_request
/// [`process_response`]: Self::process_response
#[derive(Debug, Default)]
pub struct VehicleIdentificationHandler {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl VehicleIdentificationHandler {
    /// Create an idle handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> IdentificationState {
        self.inner.lock().state
    }

    /// Send an identification request to `target` and wait for the answer.
    ///
    /// Each attempt waits `per_attempt_timeout`; after `max_retries`
    /// resends without an answer the call fails with `NoResponse`.
    pub fn send_identification_request(
        &self,
        sink: &dyn DatagramSink,
        target: SocketAddr,
        preselection: &Preselection,
        config: &IdentificationConfig,
    ) -> Result<VehicleAddrInfoResponse> {
        let frame = preselection.to_frame()?;

        let mut inner = self.inner.lock();
        if inner.apply(IdentificationEvent::Send) == IdentificationAction::Reject {
            return Err(DoipError::AlreadyInProgress);
        }
        // retry policy of the exchange now in flight
        inner.config = *config;
        inner.preselection = *preselection;
        inner.response = None;

        loop {
            let IdentificationState::AwaitingResponse { attempt } = inner.state else {
                break;
            };
            debug!(%target, attempt, ?preselection, "Sending vehicle identification request");
            if let Err(e) = MutexGuard::unlocked(&mut inner, || sink.send_to(&frame, target)) {
                inner.state = IdentificationState::Idle;
                return Err(e);
            }

            let deadline = Instant::now() + config.per_attempt_timeout;
            let timed_out = self
                .cond
                .wait_while_until(
                    &mut inner,
                    |i| i.state == IdentificationState::AwaitingResponse { attempt },
                    deadline,
                )
                .timed_out();

            if timed_out {
                inner.apply(IdentificationEvent::TimerExpired);
            }
        }

        match inner.state {
            IdentificationState::Completed(IdentificationOutcome::Success) => inner
                .response
                .take()
                .ok_or(DoipError::NoResponse { attempts: 0 }),
            IdentificationState::Completed(IdentificationOutcome::Cancelled) => {
                Err(DoipError::Cancelled)
            }
            _ => Err(DoipError::NoResponse {
                attempts: config.max_retries + 1,
            }),
        }
    }

    /// Feed an announcement payload received from `source`.
    ///
    /// Returns `true` if it completed the outstanding exchange.
    pub fn process_response(&self, payload: &[u8], source: IpAddr) -> bool {
        let response = match VehicleAddrInfoResponse::decode(payload, source) {
            Ok(response) => response,
            Err(e) => {
                debug!(%source, error = %e, "Discarding malformed identification response");
                return false;
            }
        };

        let mut inner = self.inner.lock();
        if !inner.state.is_awaiting() || !inner.preselection.matches(&response) {
            return false;
        }
        if inner.apply(IdentificationEvent::Response) != IdentificationAction::Deliver {
            return false;
        }
        debug!(vin = %response.vin, address = %response.logical_address, "Vehicle identified");
        inner.response = Some(response);
        self.cond.notify_all();
        true
    }

    /// Abort an outstanding exchange with `Cancelled`.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.apply(IdentificationEvent::Cancel) == IdentificationAction::Abort {
            self.cond.notify_all();
        }
    }
}
