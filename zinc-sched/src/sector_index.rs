//! Sector-ordered request index.
//!
//! Requests are keyed by `(start sector, request id)` so that several
//! requests may start at the same sector and still have a total order.

use std::collections::BTreeSet;
use std::ops::Bound;

use zinc_core::{RequestId, Sector};

/// Key of one indexed request.
pub type SectorKey = (Sector, RequestId);

/// Ordered index of queued requests by starting sector.
#[derive(Debug, Default)]
pub struct SectorIndex {
    tree: BTreeSet<SectorKey>,
}

impl SectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tree: BTreeSet::new(),
        }
    }

    /// Adds a request.
    ///
    /// # Panics
    ///
    /// Panics if the request is already indexed at this sector.
    pub fn insert(&mut self, sector: Sector, id: RequestId) {
        let fresh = self.tree.insert((sector, id));
        assert!(fresh, "{id} indexed twice at sector {sector}");
    }

    /// Removes a request. Returns false if it was not indexed.
    pub fn remove(&mut self, sector: Sector, id: RequestId) -> bool {
        self.tree.remove(&(sector, id))
    }

    /// First request starting exactly at `sector`.
    #[must_use]
    pub fn find_at(&self, sector: Sector) -> Option<RequestId> {
        self.tree
            .range((sector, RequestId::MIN)..=(sector, RequestId::MAX))
            .next()
            .map(|&(_, id)| id)
    }

    /// Request following `key` in sector order.
    #[must_use]
    pub fn successor(&self, key: SectorKey) -> Option<SectorKey> {
        self.tree
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .copied()
    }

    /// Request preceding `key` in sector order.
    #[must_use]
    pub fn predecessor(&self, key: SectorKey) -> Option<SectorKey> {
        self.tree.range(..key).next_back().copied()
    }

    /// Lowest-sector request.
    #[must_use]
    pub fn first(&self) -> Option<SectorKey> {
        self.tree.first().copied()
    }

    /// Number of indexed requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Iterates in sector order.
    pub fn iter(&self) -> impl Iterator<Item = SectorKey> + '_ {
        self.tree.iter().copied()
    }
}
