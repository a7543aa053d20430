//! Vehicle discovery handler.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::collection::VehicleInfoCollection;
use crate::error::{DoipError, Result};
use crate::payload::{Preselection, VehicleAddrInfoResponse};
use crate::transport::DatagramSink;

/// State of the discovery handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryState {
    /// No window has been opened yet.
    #[default]
    Idle,
    /// A window is open and announcements are collected.
    Collecting,
    /// The last window closed; the collection no longer changes.
    Closed,
}

/// Inputs to the discovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// The caller opens a window.
    Start,
    /// An announcement was decoded.
    Announcement,
    /// The window timer fired.
    WindowExpired,
    /// The owning conversation is stopping.
    Cancel,
}

/// What the handler does after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryAction {
    /// Clear the collection, broadcast the request and arm the window timer.
    Broadcast,
    /// Add the announcement to the collection.
    Collect,
    /// Return the collection to the caller.
    Deliver,
    /// Return `Cancelled` to the caller.
    Abort,
    /// Reject the call with `AlreadyInProgress`.
    Reject,
    /// Drop the input.
    Discard,
}

impl DiscoveryState {
    /// Transition table.
    pub fn on_event(self, event: DiscoveryEvent) -> (Self, DiscoveryAction) {
        use DiscoveryAction as A;
        use DiscoveryEvent as E;

        match (self, event) {
            (Self::Idle | Self::Closed, E::Start) => (Self::Collecting, A::Broadcast),
            (Self::Collecting, E::Start) => (self, A::Reject),
            (Self::Collecting, E::Announcement) => (self, A::Collect),
            (Self::Collecting, E::WindowExpired) => (Self::Closed, A::Deliver),
            (Self::Collecting, E::Cancel) => (Self::Closed, A::Abort),
            (state, _) => (state, A::Discard),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: DiscoveryState,
    cancelled: bool,
}

impl Inner {
    fn apply(&mut self, event: DiscoveryEvent) -> DiscoveryAction {
        let (next, action) = self.state.on_event(event);
        if next != self.state {
            trace!(from = ?self.state, to = ?next, ?event, "Discovery transition");
        }
        self.state = next;
        action
    }
}

/// Collects vehicle announcements for the length of one discovery window.
///
/// Announcements are only appended while the state lock is held and the
/// state is `Collecting`, so nothing lands in the collection after the
/// window closed.
#[derive(Debug)]
pub struct VehicleDiscoveryHandler {
    inner: Mutex<Inner>,
    cond: Condvar,
    collection: Arc<VehicleInfoCollection>,
}

impl VehicleDiscoveryHandler {
    /// Create a handler appending to `collection`.
    pub fn new(collection: Arc<VehicleInfoCollection>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cond: Condvar::new(),
            collection,
        }
    }

    /// Current state.
    pub fn state(&self) -> DiscoveryState {
        self.inner.lock().state
    }

    /// The collection this handler appends to.
    pub fn collection(&self) -> &Arc<VehicleInfoCollection> {
        &self.collection
    }

    /// Broadcast a discovery request to `target` and collect answers for `window`.
    ///
    /// An empty result is not an error.
    pub fn start_discovery(
        &self,
        sink: &dyn DatagramSink,
        target: SocketAddr,
        window: Duration,
    ) -> Result<Vec<VehicleAddrInfoResponse>> {
        let frame = Preselection::None.to_frame()?;

        let mut inner = self.inner.lock();
        if inner.apply(DiscoveryEvent::Start) == DiscoveryAction::Reject {
            return Err(DoipError::AlreadyInProgress);
        }
        inner.cancelled = false;
        self.collection.clear();

        debug!(%target, ?window, "Starting vehicle discovery");
        if let Err(e) = MutexGuard::unlocked(&mut inner, || sink.send_to(&frame, target)) {
            inner.state = DiscoveryState::Idle;
            return Err(e);
        }

        let deadline = Instant::now() + window;
        self.cond
            .wait_while_until(&mut inner, |i| i.state == DiscoveryState::Collecting, deadline);

        if inner.cancelled {
            return Err(DoipError::Cancelled);
        }
        inner.apply(DiscoveryEvent::WindowExpired);

        let vehicles = self.collection.snapshot();
        debug!(count = vehicles.len(), "Vehicle discovery window closed");
        Ok(vehicles)
    }

    /// Feed an announcement payload received from `source`.
    ///
    /// Returns `true` if a new vehicle was added.
    pub fn process_announcement(&self, payload: &[u8], source: IpAddr) -> bool {
        let response = match VehicleAddrInfoResponse::decode(payload, source) {
            Ok(response) => response,
            Err(e) => {
                debug!(%source, error = %e, "Discarding malformed announcement");
                return false;
            }
        };

        let mut inner = self.inner.lock();
        match inner.apply(DiscoveryEvent::Announcement) {
            DiscoveryAction::Collect => {
                let key = response.key();
                let added = self.collection.insert_unique(response);
                trace!(vin = %key.vin, address = %key.logical_address, added, "Announcement collected");
                added
            }
            _ => {
                trace!(%source, "Announcement outside a discovery window");
                false
            }
        }
    }

    /// Close an open window early; the waiting caller gets `Cancelled`.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.apply(DiscoveryEvent::Cancel) == DiscoveryAction::Abort {
            inner.cancelled = true;
            self.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, announcement};
    use crate::types::PayloadType;
    use std::thread;

    fn target() -> SocketAddr {
        "255.255.255.255:13400".parse().unwrap()
    }

    fn handler() -> Arc<VehicleDiscoveryHandler> {
        Arc::new(VehicleDiscoveryHandler::new(Arc::new(VehicleInfoCollection::new())))
    }

    #[test]
    fn test_transition_table() {
        let (state, action) = DiscoveryState::Idle.on_event(DiscoveryEvent::Announcement);
        assert_eq!((state, action), (DiscoveryState::Idle, DiscoveryAction::Discard));

        let (state, action) = state.on_event(DiscoveryEvent::Start);
        assert_eq!((state, action), (DiscoveryState::Collecting, DiscoveryAction::Broadcast));
        assert_eq!(state.on_event(DiscoveryEvent::Start).1, DiscoveryAction::Reject);
        assert_eq!(state.on_event(DiscoveryEvent::Announcement).1, DiscoveryAction::Collect);

        let (closed, action) = state.on_event(DiscoveryEvent::WindowExpired);
        assert_eq!((closed, action), (DiscoveryState::Closed, DiscoveryAction::Deliver));
        assert_eq!(closed.on_event(DiscoveryEvent::Announcement).1, DiscoveryAction::Discard);
        assert_eq!(closed.on_event(DiscoveryEvent::Start).0, DiscoveryState::Collecting);

        assert_eq!(
            state.on_event(DiscoveryEvent::Cancel),
            (DiscoveryState::Closed, DiscoveryAction::Abort)
        );
    }

    #[test]
    fn test_window_with_duplicates() {
        let handler = handler();
        let sink = RecordingSink::default();

        let responder = {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                let start = Instant::now();
                let ip: IpAddr = "10.0.0.7".parse().unwrap();
                for (at, vin) in [(50, "AAA"), (100, "BBB"), (480, "AAA")] {
                    let at = Duration::from_millis(at);
                    thread::sleep(at.saturating_sub(start.elapsed()));
                    handler.process_announcement(&announcement(vin, 0x1001), ip);
                }
            })
        };

        let vehicles = handler
            .start_discovery(&sink, target(), Duration::from_millis(500))
            .unwrap();
        responder.join().unwrap();

        let vins: Vec<String> = vehicles.iter().map(|v| v.vin.to_string()).collect();
        assert_eq!(vins, vec!["AAA00000000000000", "BBB00000000000000"]);
        assert_eq!(handler.state(), DiscoveryState::Closed);

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.payload_type(), PayloadType::VehicleIdentificationRequest);
        assert_eq!(sent[0].1, target());
    }

    #[test]
    fn test_empty_window() {
        let handler = handler();
        let sink = RecordingSink::default();
        let start = Instant::now();
        let vehicles = handler
            .start_discovery(&sink, target(), Duration::from_millis(100))
            .unwrap();
        assert!(vehicles.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_late_and_malformed_discarded() {
        let handler = handler();
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        assert!(!handler.process_announcement(&announcement("AAA", 1), ip));

        let sink = RecordingSink::default();
        let responder = {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                assert!(!handler.process_announcement(&[0u8; 12], ip));
                assert!(handler.process_announcement(&announcement("CCC", 1), ip));
            })
        };
        let vehicles = handler
            .start_discovery(&sink, target(), Duration::from_millis(100))
            .unwrap();
        responder.join().unwrap();
        assert_eq!(vehicles.len(), 1);

        assert!(!handler.process_announcement(&announcement("DDD", 1), ip));
        assert_eq!(handler.collection().len(), 1);
    }

    #[test]
    fn test_many_responses_unique_keys() {
        let handler = handler();
        let sink = RecordingSink::default();

        let responders: Vec<_> = (0..4)
            .map(|t| {
                let handler = Arc::clone(&handler);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(50));
                    let ip: IpAddr = "10.0.0.9".parse().unwrap();
                    for i in 0..25u16 {
                        let vin = format!("VIN{}", (i + t) % 10);
                        handler.process_announcement(&announcement(&vin, 0x2000), ip);
                    }
                })
            })
            .collect();

        let vehicles = handler
            .start_discovery(&sink, target(), Duration::from_millis(300))
            .unwrap();
        for r in responders {
            r.join().unwrap();
        }
        assert_eq!(vehicles.len(), 10);
    }

    #[test]
    fn test_restart_clears_and_cancel() {
        let handler = handler();
        let sink = RecordingSink::default();
        let ip: IpAddr = "10.0.0.7".parse().unwrap();

        let responder = {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                handler.process_announcement(&announcement("AAA", 1), ip);
            })
        };
        let first = handler
            .start_discovery(&sink, target(), Duration::from_millis(80))
            .unwrap();
        responder.join().unwrap();
        assert_eq!(first.len(), 1);

        let canceller = {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                handler.cancel();
            })
        };
        let start = Instant::now();
        let second = handler.start_discovery(&sink, target(), Duration::from_secs(5));
        canceller.join().unwrap();
        assert!(matches!(second, Err(DoipError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(handler.collection().is_empty());
    }
}
