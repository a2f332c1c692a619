//! Request table.
//!
//! Every request the scheduler knows about lives here exactly once. The
//! queue structures hold only [`RequestId`]s; where a request currently sits
//! is recorded in its [`Location`].

use std::collections::HashMap;

use zinc_core::{ChannelKind, Direction, Priority, Request, RequestId, ZoneId};

/// Where a tracked request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// In a tier's sector index and fifo.
    Sorted {
        /// Owning tier.
        tier: Priority,
        /// Queue direction.
        dir: Direction,
        /// Fifo position.
        seq: u64,
    },
    /// On a tier's override list.
    Override {
        /// Owning tier.
        tier: Priority,
    },
    /// Pending in a throttled channel.
    Channel(ChannelKind),
    /// Handed to the device and not yet completed.
    Dispatched(Dispatched),
}

/// Bookkeeping kept for an in-flight request until it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    /// Tier charged with the completion. `None` for channel commands.
    pub tier: Option<Priority>,
    /// Write units added to the channel in-flight counters.
    pub write_units: u64,
    /// Zone locked by this request.
    pub zone: Option<ZoneId>,
}

/// One tracked request.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    /// The request as last reported by the host.
    pub request: Request,
    /// Current location.
    pub location: Location,
    /// Deadline, microseconds. For override entries this is the insert time.
    pub expires_us: u64,
}

impl Entry {
    /// Whether the request is queued (not in flight).
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        !matches!(self.location, Location::Dispatched(_))
    }
}

/// Arena of tracked requests keyed by id.
#[derive(Debug, Default)]
pub struct RequestTable {
    entries: HashMap<RequestId, Entry>,
}

impl RequestTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a request.
    ///
    /// # Panics
    ///
    /// Panics if the id is already tracked.
    pub fn insert(&mut self, request: Request, location: Location, expires_us: u64) {
        let previous = self.entries.insert(
            request.id,
            Entry {
                request,
                location,
                expires_us,
            },
        );
        assert!(previous.is_none(), "{} tracked twice", request.id);
    }

    /// Looks up a request.
    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    /// Looks up a request for update.
    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut Entry> {
        self.entries.get_mut(&id)
    }

    /// Stops tracking a request.
    pub fn remove(&mut self, id: RequestId) -> Option<Entry> {
        self.entries.remove(&id)
    }

    /// Returns the request of a tracked id.
    ///
    /// # Panics
    ///
    /// Panics if the id is not tracked. Queue structures only ever hold
    /// tracked ids, so a miss means the two have diverged.
    #[must_use]
    pub fn request(&self, id: RequestId) -> &Request {
        match self.entries.get(&id) {
            Some(entry) => &entry.request,
            None => panic!("{id} is queued but not tracked"),
        }
    }

    /// Number of tracked requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of tracked requests in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.entries.values().filter(|e| !e.is_queued()).count()
    }
}
