//! Arrival-ordered request queue with per-entry expiry.
//!
//! Entries are keyed by a monotonically increasing sequence number, so an
//! entry can be removed from the middle in `O(log n)` and a merged request
//! can take over the queue position of the one it absorbed.

use std::collections::BTreeMap;

use zinc_core::RequestId;

/// One queued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoEntry {
    /// Queue position. Lower is older.
    pub seq: u64,
    /// The queued request.
    pub id: RequestId,
    /// Time at which the request is overdue, microseconds.
    pub expires_us: u64,
}

impl FifoEntry {
    /// Whether the entry is overdue at `current_time_us`.
    #[must_use]
    pub const fn is_expired(&self, current_time_us: u64) -> bool {
        current_time_us >= self.expires_us
    }
}

/// Arrival-ordered queue.
#[derive(Debug, Default)]
pub struct FifoQueue {
    entries: BTreeMap<u64, (RequestId, u64)>,
    next_seq: u64,
}

impl FifoQueue {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Appends a request and returns its queue position.
    pub fn push_back(&mut self, id: RequestId, expires_us: u64) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(seq, (id, expires_us));
        seq
    }

    /// Places a request at an existing position, typically one vacated by
    /// [`FifoQueue::remove`].
    ///
    /// # Panics
    ///
    /// Panics if the position is occupied or was never handed out.
    pub fn insert_at(&mut self, seq: u64, id: RequestId, expires_us: u64) {
        assert!(seq < self.next_seq, "fifo position {seq} was never allocated");
        let previous = self.entries.insert(seq, (id, expires_us));
        assert!(previous.is_none(), "fifo position {seq} already occupied");
    }

    /// Removes the entry at `seq`.
    pub fn remove(&mut self, seq: u64) -> Option<FifoEntry> {
        self.entries
            .remove(&seq)
            .map(|(id, expires_us)| FifoEntry { seq, id, expires_us })
    }

    /// Oldest entry.
    #[must_use]
    pub fn front(&self) -> Option<FifoEntry> {
        self.entries
            .first_key_value()
            .map(|(&seq, &(id, expires_us))| FifoEntry { seq, id, expires_us })
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = FifoEntry> + '_ {
        self.entries
            .iter()
            .map(|(&seq, &(id, expires_us))| FifoEntry { seq, id, expires_us })
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
