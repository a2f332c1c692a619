//! Per-priority queue structures.
//!
//! Each tier owns, per direction, a sector index and a fifo, plus an
//! override list for requests that must go out before any ordinary
//! selection. Selection itself lives in the selector; this module only keeps
//! the structures and counters consistent.

use std::collections::VecDeque;

use zinc_core::{Direction, Priority, RequestId, Sector};

use crate::fifo::{FifoEntry, FifoQueue};
use crate::sector_index::{SectorIndex, SectorKey};

/// Per-tier request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Requests accepted into the tier.
    pub inserted: u64,
    /// Requests absorbed by another request of this tier.
    pub merged: u64,
    /// Requests handed to the device.
    pub dispatched: u64,
    /// Requests that left the scheduler (completed or merged away).
    pub completed: u64,
}

impl TierStats {
    /// Requests currently owned by the tier, queued or in flight.
    #[must_use]
    pub const fn queued(&self) -> u64 {
        self.inserted - self.completed
    }

    /// Requests the device currently owns on behalf of the tier.
    #[must_use]
    pub const fn owned_by_driver(&self) -> u64 {
        (self.dispatched + self.merged).saturating_sub(self.completed)
    }
}

/// Queue structures of one priority tier.
#[derive(Debug)]
pub struct PriorityTierQueue {
    tier: Priority,
    sort: [SectorIndex; 2],
    fifo: [FifoQueue; 2],
    next: [Option<SectorKey>; 2],
    overrides: VecDeque<RequestId>,
    stats: TierStats,
}

impl PriorityTierQueue {
    /// Creates an empty tier.
    #[must_use]
    pub const fn new(tier: Priority) -> Self {
        Self {
            tier,
            sort: [SectorIndex::new(), SectorIndex::new()],
            fifo: [FifoQueue::new(), FifoQueue::new()],
            next: [None, None],
            overrides: VecDeque::new(),
            stats: TierStats {
                inserted: 0,
                merged: 0,
                dispatched: 0,
                completed: 0,
            },
        }
    }

    /// The tier this queue serves.
    #[must_use]
    pub const fn tier(&self) -> Priority {
        self.tier
    }

    /// Adds a request to the sector index and fifo of `dir`.
    ///
    /// Returns the fifo position.
    pub fn add(&mut self, dir: Direction, sector: Sector, id: RequestId, expires_us: u64) -> u64 {
        self.sort[dir.index()].insert(sector, id);
        self.fifo[dir.index()].push_back(id, expires_us)
    }

    /// Removes a request from the sector index and fifo of `dir`.
    ///
    /// If it was the next sector-ordered candidate, its successor takes
    /// over.
    pub fn remove(&mut self, dir: Direction, sector: Sector, id: RequestId, seq: u64) {
        let d = dir.index();
        let key = (sector, id);
        if self.next[d] == Some(key) {
            self.next[d] = self.sort[d].successor(key);
        }
        let indexed = self.sort[d].remove(sector, id);
        let queued = self.fifo[d].remove(seq).is_some();
        assert!(indexed && queued, "{id} missing from {} {dir} queues", self.tier);
    }

    /// Removes a request selected for dispatch. Its sector successor becomes
    /// the next candidate for batching.
    pub fn take(&mut self, dir: Direction, sector: Sector, id: RequestId, seq: u64) {
        let successor = self.sort[dir.index()].successor((sector, id));
        self.remove(dir, sector, id, seq);
        self.next[dir.index()] = successor;
    }

    /// Moves a request within the sector index after its start changed.
    pub fn reposition(&mut self, dir: Direction, old_sector: Sector, new_sector: Sector, id: RequestId) {
        let d = dir.index();
        if self.sort[d].remove(old_sector, id) {
            self.sort[d].insert(new_sector, id);
            if self.next[d] == Some((old_sector, id)) {
                self.next[d] = Some((new_sector, id));
            }
        }
    }

    /// Moves `id` to fifo position `seq` with deadline `expires_us`,
    /// vacating its current position `from_seq`.
    pub fn move_in_fifo(&mut self, dir: Direction, id: RequestId, from_seq: u64, seq: u64, expires_us: u64) {
        let fifo = &mut self.fifo[dir.index()];
        fifo.remove(from_seq);
        fifo.insert_at(seq, id, expires_us);
    }

    /// Request starting exactly at `sector`, a front-merge candidate.
    #[must_use]
    pub fn find_at(&self, dir: Direction, sector: Sector) -> Option<RequestId> {
        self.sort[dir.index()].find_at(sector)
    }

    /// Next sector-ordered candidate in `dir`.
    #[must_use]
    pub const fn next(&self, dir: Direction) -> Option<SectorKey> {
        self.next[dir.index()]
    }

    /// Sector-order successor of `key` in `dir`.
    #[must_use]
    pub fn successor(&self, dir: Direction, key: SectorKey) -> Option<SectorKey> {
        self.sort[dir.index()].successor(key)
    }

    /// Sector-order predecessor of `key` in `dir`.
    #[must_use]
    pub fn predecessor(&self, dir: Direction, key: SectorKey) -> Option<SectorKey> {
        self.sort[dir.index()].predecessor(key)
    }

    /// Oldest fifo entry in `dir`.
    #[must_use]
    pub fn fifo_front(&self, dir: Direction) -> Option<FifoEntry> {
        self.fifo[dir.index()].front()
    }

    /// Fifo entries of `dir` from oldest to newest.
    pub fn fifo_iter(&self, dir: Direction) -> impl Iterator<Item = FifoEntry> + '_ {
        self.fifo[dir.index()].iter()
    }

    /// Whether `dir` has queued requests.
    #[must_use]
    pub fn has_queued(&self, dir: Direction) -> bool {
        !self.fifo[dir.index()].is_empty()
    }

    /// Number of requests queued in `dir`, overrides excluded.
    #[must_use]
    pub fn len(&self, dir: Direction) -> usize {
        self.fifo[dir.index()].len()
    }

    /// Puts a request at the head of the override list.
    pub fn push_override(&mut self, id: RequestId) {
        self.overrides.push_front(id);
    }

    /// Head of the override list.
    #[must_use]
    pub fn override_front(&self) -> Option<RequestId> {
        self.overrides.front().copied()
    }

    /// Removes the head of the override list.
    pub fn pop_override(&mut self) -> Option<RequestId> {
        self.overrides.pop_front()
    }

    /// Removes `id` from the override list.
    pub fn remove_override(&mut self, id: RequestId) -> bool {
        match self.overrides.iter().position(|&o| o == id) {
            Some(pos) => {
                self.overrides.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of override entries.
    #[must_use]
    pub fn overrides_len(&self) -> usize {
        self.overrides.len()
    }

    /// Override entries, head first.
    pub fn overrides(&self) -> impl Iterator<Item = RequestId> + '_ {
        self.overrides.iter().copied()
    }

    /// Whether anything is waiting to be dispatched.
    #[must_use]
    pub fn has_work(&self) -> bool {
        !self.overrides.is_empty() || Direction::ALL.iter().any(|&d| self.has_queued(d))
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> TierStats {
        self.stats
    }

    /// Requests owned by the tier, queued or in flight.
    #[must_use]
    pub const fn queued(&self) -> u64 {
        self.stats.queued()
    }

    /// Counts a newly accepted request.
    pub fn note_inserted(&mut self) {
        self.stats.inserted += 1;
    }

    /// Counts a merge.
    pub fn note_merged(&mut self) {
        self.stats.merged += 1;
    }

    /// Counts a dispatch.
    pub fn note_dispatched(&mut self) {
        self.stats.dispatched += 1;
    }

    /// Counts a request leaving the scheduler.
    ///
    /// # Panics
    ///
    /// Panics if more requests completed than were inserted.
    pub fn note_completed(&mut self) {
        assert!(
            self.stats.completed < self.stats.inserted,
            "{} tier completed more requests than inserted: {:?}",
            self.tier,
            self.stats
        );
        self.stats.completed += 1;
    }
}
