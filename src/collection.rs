//! Synchronised collection of discovered vehicles.

use parking_lot::Mutex;

use crate::payload::VehicleAddrInfoResponse;

/// Ordered, deduplicated list of discovery results.
///
/// Written by the receive path and drained by callers. Every operation takes
/// the same lock, so a reader observes a list either before or after an
/// append, never in between.
#[derive(Debug, Default)]
pub struct VehicleInfoCollection {
    entries: Mutex<Vec<VehicleAddrInfoResponse>>,
}

impl VehicleInfoCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `response` unless an entry with the same key is present.
    ///
    /// Returns `true` if the entry was appended.
    pub fn insert_unique(&self, response: VehicleAddrInfoResponse) -> bool {
        let mut entries = self.entries.lock();
        let key = response.key();
        if entries.iter().any(|e| e.key() == key) {
            return false;
        }
        entries.push(response);
        true
    }

    /// Copy of the current entries.
    pub fn snapshot(&self) -> Vec<VehicleAddrInfoResponse> {
        self.entries.lock().clone()
    }

    /// Take all entries, leaving the collection empty.
    pub fn take(&self) -> Vec<VehicleAddrInfoResponse> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
