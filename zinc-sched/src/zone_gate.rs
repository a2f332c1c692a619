//! Per-zone write locks.
//!
//! A zone may have at most one write in flight. The gate has its own mutex,
//! separate from the scheduler lock, so a completion can release a zone
//! while another context scans for dispatchable writes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use zinc_core::{RequestId, ZoneId};

/// Read-only view of the lock table, valid while the gate lock is held.
#[derive(Debug)]
pub struct ZoneView<'a> {
    holders: &'a HashMap<ZoneId, RequestId>,
}

impl ZoneView<'_> {
    /// Whether `zone` has a write in flight.
    #[must_use]
    pub fn is_locked(&self, zone: ZoneId) -> bool {
        self.holders.contains_key(&zone)
    }

    /// Whether a write to `zone` may be dispatched. `None` means the target
    /// needs no lock.
    #[must_use]
    pub fn can_dispatch(&self, zone: Option<ZoneId>) -> bool {
        zone.map_or(true, |zone| !self.is_locked(zone))
    }
}

/// Zone lock table.
#[derive(Debug, Default)]
pub struct ZoneGate {
    holders: Mutex<HashMap<ZoneId, RequestId>>,
}

impl ZoneGate {
    /// Creates a gate with every zone unlocked.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ZoneId, RequestId>> {
        self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks `zone` on behalf of `holder`. Returns false if another request
    /// already holds it.
    pub fn try_lock(&self, zone: ZoneId, holder: RequestId) -> bool {
        let mut holders = self.lock();
        match holders.get(&zone) {
            Some(&current) => current == holder,
            None => {
                holders.insert(zone, holder);
                true
            }
        }
    }

    /// Releases `zone` if `holder` owns it. Returns whether anything was
    /// released, so a repeated unlock is a no-op.
    pub fn unlock(&self, zone: ZoneId, holder: RequestId) -> bool {
        let mut holders = self.lock();
        if holders.get(&zone) == Some(&holder) {
            holders.remove(&zone);
            true
        } else {
            false
        }
    }

    /// Whether `zone` is locked.
    #[must_use]
    pub fn is_locked(&self, zone: ZoneId) -> bool {
        self.lock().contains_key(&zone)
    }

    /// Current holder of `zone`.
    #[must_use]
    pub fn holder(&self, zone: ZoneId) -> Option<RequestId> {
        self.lock().get(&zone).copied()
    }

    /// Runs `f` with the lock table held, so that no zone is unlocked
    /// part-way through a candidate scan.
    pub fn with_view<R>(&self, f: impl FnOnce(&ZoneView<'_>) -> R) -> R {
        let holders = self.lock();
        f(&ZoneView { holders: &holders })
    }

    /// Number of locked zones.
    #[must_use]
    pub fn locked_count(&self) -> usize {
        self.lock().len()
    }
}
