//! History recording for simulation verification.
//!
//! The driver appends one event per observable step. Verification replays
//! the events afterwards, so checks never depend on scheduler internals.

use std::collections::BTreeMap;

use zinc_core::{Request, RequestId};

/// What happened to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The host inserted the request.
    Submitted {
        /// The request as inserted.
        request: Request,
        /// Inserted at the head of its tier.
        at_head: bool,
    },
    /// The scheduler absorbed the request into another one.
    Merged {
        /// The request that was absorbed.
        id: RequestId,
        /// The request that now covers it.
        into: RequestId,
    },
    /// The scheduler handed the request to the device.
    Dispatched {
        /// The request as dispatched, extent possibly grown by merges.
        request: Request,
    },
    /// The device bounced the request and the host inserted it again.
    Requeued {
        /// The bounced request.
        id: RequestId,
    },
    /// The device finished the request.
    Completed {
        /// The finished request.
        id: RequestId,
    },
}

/// A timestamped event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Simulated time.
    pub at_us: u64,
    /// What happened.
    pub kind: EventKind,
}

/// Complete history of a simulation run.
#[derive(Debug, Default)]
pub struct History {
    events: Vec<Event>,
    submitted_at: BTreeMap<RequestId, u64>,
}

impl History {
    /// Creates a new empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&mut self, at_us: u64, kind: EventKind) {
        if let EventKind::Submitted { request, .. } = kind {
            self.submitted_at.insert(request.id, at_us);
        }
        self.events.push(Event { at_us, kind });
    }

    /// All events in recording order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// When `id` was submitted.
    #[must_use]
    pub fn submitted_at(&self, id: RequestId) -> Option<u64> {
        self.submitted_at.get(&id).copied()
    }

    /// Number of events of each kind: submitted, merged, dispatched,
    /// requeued, completed.
    #[must_use]
    pub fn counts(&self) -> HistoryCounts {
        let mut counts = HistoryCounts::default();
        for event in &self.events {
            match event.kind {
                EventKind::Submitted { .. } => counts.submitted += 1,
                EventKind::Merged { .. } => counts.merged += 1,
                EventKind::Dispatched { .. } => counts.dispatched += 1,
                EventKind::Requeued { .. } => counts.requeued += 1,
                EventKind::Completed { .. } => counts.completed += 1,
            }
        }
        counts
    }
}

/// Event totals of a history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryCounts {
    /// Requests submitted.
    pub submitted: u64,
    /// Requests merged away on insert.
    pub merged: u64,
    /// Dispatches, requeued ones included.
    pub dispatched: u64,
    /// Device bounces.
    pub requeued: u64,
    /// Device completions.
    pub completed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let mut history = History::new();
        let request = Request::write(1, 0, 8);
        history.record(5, EventKind::Submitted { request, at_head: false });
        history.record(6, EventKind::Dispatched { request });
        history.record(7, EventKind::Requeued { id: request.id });
        history.record(8, EventKind::Dispatched { request });
        history.record(90, EventKind::Completed { id: request.id });

        assert_eq!(history.events().len(), 5);
        assert_eq!(history.submitted_at(request.id), Some(5));
        assert_eq!(history.submitted_at(RequestId::new(2)), None);

        let counts = history.counts();
        assert_eq!(counts.submitted, 1);
        assert_eq!(counts.dispatched, 2);
        assert_eq!(counts.requeued, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.merged, 0);
    }
}
