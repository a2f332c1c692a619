//! Device callbacks injected into the scheduler.
//!
//! The scheduler does not know what a zone is or when two extents may be
//! merged; the host supplies that knowledge through [`DeviceHooks`].

use zinc_core::{Request, Sector, ZoneId};

/// Outcome of a merge classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// The extents must stay separate.
    NoMerge,
    /// The incoming extent can be prepended to the existing request.
    FrontMerge,
    /// Both are discards and can be combined as such.
    DiscardMerge,
}

/// Host-provided knowledge about the managed device.
pub trait DeviceHooks: Send + Sync {
    /// Whether the device has sequential-write zones.
    fn is_zoned(&self) -> bool {
        false
    }

    /// Whether the device is non-rotational. Rotational zoned devices keep
    /// sequential write streams together even when one zone is busy.
    fn is_nonrot(&self) -> bool {
        true
    }

    /// Zone that a write starting at `sector` must lock, or `None` when the
    /// target needs no write lock (conventional zones, non-zoned devices).
    fn zone_of(&self, sector: Sector) -> Option<ZoneId> {
        let _ = sector;
        None
    }

    /// Whether `incoming` may be merged into the front of `existing`.
    ///
    /// Called only when `incoming` ends exactly where `existing` starts.
    fn classify_merge(&self, existing: &Request, incoming: &Request) -> MergeKind {
        same_class_merge(existing, incoming)
    }
}

/// Front merge of two requests with the same op and tier.
#[must_use]
pub fn same_class_merge(existing: &Request, incoming: &Request) -> MergeKind {
    if existing.op == incoming.op && existing.priority == incoming.priority {
        MergeKind::FrontMerge
    } else {
        MergeKind::NoMerge
    }
}

/// A device without zones.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConventionalDevice {
    /// Rotational media.
    pub rotational: bool,
}

impl DeviceHooks for ConventionalDevice {
    fn is_nonrot(&self) -> bool {
        !self.rotational
    }
}

/// A device split into equally sized sequential-write zones.
#[derive(Debug, Clone, Copy)]
pub struct ZonedDevice {
    /// Zone size in sectors. Never zero.
    pub zone_sectors: u64,
    /// Leading zones that accept random writes and need no lock.
    pub conventional_zones: u64,
    /// Rotational media (SMR disks) rather than flash.
    pub rotational: bool,
}

impl ZonedDevice {
    /// Creates a flash device with `zone_sectors` per zone.
    ///
    /// # Panics
    ///
    /// Panics if `zone_sectors` is zero.
    #[must_use]
    pub const fn new(zone_sectors: u64) -> Self {
        assert!(zone_sectors > 0, "zone size must be positive");
        Self {
            zone_sectors,
            conventional_zones: 0,
            rotational: false,
        }
    }

    /// Marks the device as rotational.
    #[must_use]
    pub const fn rotational(mut self) -> Self {
        self.rotational = true;
        self
    }

    /// Sets the number of leading conventional zones.
    #[must_use]
    pub const fn with_conventional_zones(mut self, zones: u64) -> Self {
        self.conventional_zones = zones;
        self
    }

    /// Zone index containing `sector`, lock or not.
    #[must_use]
    pub const fn zone_index(&self, sector: Sector) -> u64 {
        sector / self.zone_sectors
    }
}

impl DeviceHooks for ZonedDevice {
    fn is_zoned(&self) -> bool {
        true
    }

    fn is_nonrot(&self) -> bool {
        !self.rotational
    }

    fn zone_of(&self, sector: Sector) -> Option<ZoneId> {
        let zone = self.zone_index(sector);
        (zone >= self.conventional_zones).then(|| ZoneId::new(zone))
    }

    /// A merged request must stay inside one zone: it is locked under the
    /// zone of its start sector only.
    fn classify_merge(&self, existing: &Request, incoming: &Request) -> MergeKind {
        if self.zone_index(incoming.sector) != self.zone_index(existing.sector) {
            return MergeKind::NoMerge;
        }
        same_class_merge(existing, incoming)
    }
}
