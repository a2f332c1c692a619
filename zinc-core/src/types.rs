//! Strongly-typed identifiers and request classification.
//!
//! Following `TigerStyle`: explicit types prevent bugs from mixing up a
//! request identifier with a zone number or a raw sector.

use std::fmt;

/// A 512-byte sector address on the device.
pub type Sector = u64;

/// Write traffic is accounted in 8 KiB units (16 sectors).
pub const IO_UNIT_SECTOR_SHIFT: u32 = 4;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `RequestId` with `ZoneId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Smallest representable ID.
            pub const MIN: Self = Self(0);
            /// Largest representable ID.
            pub const MAX: Self = Self(u64::MAX);

            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next ID in sequence.
            ///
            /// # Panics
            /// Panics if the ID would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "ID overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

define_id!(RequestId, "rq", "Host-assigned identifier of a block request.");
define_id!(ZoneId, "zone", "Index of a sequential-write zone on the device.");

/// Operation carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Data read.
    Read,
    /// Data write.
    Write,
    /// Zone reset management command.
    Reset,
    /// Zone finish management command.
    Finish,
    /// Anything else (flush, discard, driver-private commands).
    Other,
}

impl Op {
    /// Returns the deadline-scheduled direction, or `None` for throttled
    /// zone management commands.
    ///
    /// `Other` commands carry no write payload and are queued with reads, so
    /// they never take a zone lock.
    #[must_use]
    pub const fn direction(self) -> Option<Direction> {
        match self {
            Self::Read | Self::Other => Some(Direction::Read),
            Self::Write => Some(Direction::Write),
            Self::Reset | Self::Finish => None,
        }
    }

    /// Returns the throttled channel serving this operation, if any.
    #[must_use]
    pub const fn channel(self) -> Option<ChannelKind> {
        match self {
            Self::Reset => Some(ChannelKind::Reset),
            Self::Finish => Some(ChannelKind::Finish),
            Self::Read | Self::Write | Self::Other => None,
        }
    }

    /// Returns where the scheduler queues this operation.
    #[must_use]
    pub const fn route(self) -> Route {
        match self {
            Self::Read | Self::Other => Route::Queue(Direction::Read),
            Self::Write => Route::Queue(Direction::Write),
            Self::Reset => Route::Channel(ChannelKind::Reset),
            Self::Finish => Route::Channel(ChannelKind::Finish),
        }
    }

    /// Returns true for data writes.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

/// Destination of an inserted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// A priority tier queue for the given direction.
    Queue(Direction),
    /// A throttled command channel.
    Channel(ChannelKind),
}

/// Direction subject to deadline / sector-order scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Reads (and other non-write commands).
    Read,
    /// Writes.
    Write,
}

impl Direction {
    /// Both directions, reads first.
    pub const ALL: [Self; 2] = [Self::Read, Self::Write];

    /// Array index for per-direction tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Strict priority tier. Declaration order is dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Highest priority.
    Realtime,
    /// Normal priority.
    #[default]
    BestEffort,
    /// Served only when nothing else is queued (or when aged).
    Idle,
}

impl Priority {
    /// All tiers in dispatch order.
    pub const ALL: [Self; 3] = [Self::Realtime, Self::BestEffort, Self::Idle];

    /// Tiers that take part in priority aging.
    pub const AGED: [Self; 2] = [Self::BestEffort, Self::Idle];

    /// Array index for per-tier tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Realtime => 0,
            Self::BestEffort => 1,
            Self::Idle => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Realtime => write!(f, "rt"),
            Self::BestEffort => write!(f, "be"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Out-of-band command class with its own admission channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Zone reset commands.
    Reset,
    /// Zone finish commands.
    Finish,
}

impl ChannelKind {
    /// Both channels in evaluation order.
    pub const ALL: [Self; 2] = [Self::Reset, Self::Finish];

    /// Array index for per-channel tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Reset => 0,
            Self::Finish => 1,
        }
    }

    /// Attribute-name prefix (`reset`, `finish`).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Finish => "finish",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A block request as handed to the scheduler by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Host identifier, unique among live requests.
    pub id: RequestId,
    /// Operation.
    pub op: Op,
    /// First sector.
    pub sector: Sector,
    /// Length in sectors.
    pub sectors: u32,
    /// Priority tier.
    pub priority: Priority,
    /// Synchronous submission (a caller is waiting on it).
    pub sync: bool,
}

impl Request {
    /// Creates a best-effort request.
    #[must_use]
    pub const fn new(id: RequestId, op: Op, sector: Sector, sectors: u32) -> Self {
        Self {
            id,
            op,
            sector,
            sectors,
            priority: Priority::BestEffort,
            sync: matches!(op, Op::Read),
        }
    }

    /// Creates a read.
    #[must_use]
    pub const fn read(id: u64, sector: Sector, sectors: u32) -> Self {
        Self::new(RequestId::new(id), Op::Read, sector, sectors)
    }

    /// Creates a write.
    #[must_use]
    pub const fn write(id: u64, sector: Sector, sectors: u32) -> Self {
        Self::new(RequestId::new(id), Op::Write, sector, sectors)
    }

    /// Creates a zone reset for the zone starting at `sector`.
    #[must_use]
    pub const fn reset(id: u64, sector: Sector) -> Self {
        Self::new(RequestId::new(id), Op::Reset, sector, 0)
    }

    /// Creates a zone finish for the zone starting at `sector`.
    #[must_use]
    pub const fn finish(id: u64, sector: Sector) -> Self {
        Self::new(RequestId::new(id), Op::Finish, sector, 0)
    }

    /// Sets the priority tier.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the synchronous flag.
    #[must_use]
    pub const fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// First sector past the end of the request.
    #[must_use]
    pub const fn end_sector(&self) -> Sector {
        self.sector + self.sectors as u64
    }

    /// Size in 8 KiB accounting units, never less than one.
    #[must_use]
    pub const fn io_units(&self) -> u64 {
        let units = (self.sectors >> IO_UNIT_SECTOR_SHIFT) as u64;
        if units == 0 {
            1
        } else {
            units
        }
    }
}
