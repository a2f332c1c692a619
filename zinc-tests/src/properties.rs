//! Property definitions and checkers for scheduler tests.
//!
//! Properties are invariants that must hold after every scheduler call.
//! Each checker compares what the host observed (requests it holds in
//! flight) with what the scheduler reports about itself.

use std::collections::{BTreeMap, BTreeSet};

use zinc_core::{ChannelKind, Request, RequestId, SchedulerConfig, ZoneId};
use zinc_sched::{ChannelStats, DeviceHooks, SchedulerStats};

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violation of a scheduler property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    /// More than one in-flight write targets a sequential zone.
    ZoneShared {
        /// The zone.
        zone: ZoneId,
        /// The writes in flight to it.
        writers: Vec<RequestId>,
    },
    /// The scheduler reports a different number of locked zones than there
    /// are zones with a write in flight.
    LockCountMismatch {
        /// Zones with a write in flight, as seen by the host.
        expected: usize,
        /// Locked zones reported by the scheduler.
        reported: usize,
    },
    /// The scheduler reports a different number of in-flight requests than
    /// the host holds.
    InFlightMismatch {
        /// Requests the host holds.
        expected: usize,
        /// Requests the scheduler reports.
        reported: usize,
    },
    /// More read selections happened while a write waited than allowed.
    StarvationExceeded {
        /// Current starvation counter.
        starved: i64,
        /// Configured limit.
        limit: i32,
    },
    /// A channel admitted or held more often than it evaluated.
    CaseAccounting {
        /// The channel.
        channel: ChannelKind,
        /// Its counters.
        stats: ChannelStats,
    },
}

impl std::fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZoneShared { zone, writers } => {
                write!(f, "{zone} has {} writes in flight: {writers:?}", writers.len())
            }
            Self::LockCountMismatch { expected, reported } => {
                write!(f, "{reported} zones locked, {expected} expected")
            }
            Self::InFlightMismatch { expected, reported } => {
                write!(f, "{reported} requests reported in flight, host holds {expected}")
            }
            Self::StarvationExceeded { starved, limit } => {
                write!(f, "starvation counter {starved} above limit {limit}")
            }
            Self::CaseAccounting { channel, stats } => {
                write!(f, "{channel} channel counters inconsistent: {stats:?}")
            }
        }
    }
}

// ============================================================================
// Property Checkers
// ============================================================================

/// Zones locked by the given in-flight requests, with their writers.
fn zone_writers<'a>(
    in_flight: impl IntoIterator<Item = &'a Request>,
    hooks: &dyn DeviceHooks,
) -> BTreeMap<ZoneId, Vec<RequestId>> {
    let mut writers: BTreeMap<ZoneId, Vec<RequestId>> = BTreeMap::new();
    if !hooks.is_zoned() {
        return writers;
    }
    for request in in_flight {
        if !request.op.is_write() {
            continue;
        }
        if let Some(zone) = hooks.zone_of(request.sector) {
            writers.entry(zone).or_default().push(request.id);
        }
    }
    writers
}

/// At most one write is in flight per sequential zone, and the scheduler's
/// lock count agrees.
#[must_use]
pub fn check_zone_exclusive<'a>(
    in_flight: impl IntoIterator<Item = &'a Request>,
    hooks: &dyn DeviceHooks,
    stats: &SchedulerStats,
) -> Vec<PropertyViolation> {
    let writers = zone_writers(in_flight, hooks);
    let mut violations: Vec<PropertyViolation> = writers
        .iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(&zone, ids)| PropertyViolation::ZoneShared {
            zone,
            writers: ids.clone(),
        })
        .collect();

    let locked: BTreeSet<ZoneId> = writers.keys().copied().collect();
    if locked.len() != stats.locked_zones {
        violations.push(PropertyViolation::LockCountMismatch {
            expected: locked.len(),
            reported: stats.locked_zones,
        });
    }
    violations
}

/// The scheduler's in-flight count matches the host's.
#[must_use]
pub fn check_in_flight(host_in_flight: usize, stats: &SchedulerStats) -> Vec<PropertyViolation> {
    if host_in_flight == stats.in_flight {
        Vec::new()
    } else {
        vec![PropertyViolation::InFlightMismatch {
            expected: host_in_flight,
            reported: stats.in_flight,
        }]
    }
}

/// A write waits for at most `writes_starved` read selections.
#[must_use]
pub fn check_starvation_bound(stats: &SchedulerStats, config: &SchedulerConfig) -> Vec<PropertyViolation> {
    let limit = config.writes_starved;
    if stats.starved > i64::from(limit).max(0) {
        vec![PropertyViolation::StarvationExceeded {
            starved: stats.starved,
            limit,
        }]
    } else {
        Vec::new()
    }
}

/// Every evaluation ends in at most one of admit or hold.
#[must_use]
pub fn check_channel_accounting(stats: &SchedulerStats) -> Vec<PropertyViolation> {
    ChannelKind::ALL
        .iter()
        .filter_map(|&channel| {
            let s = stats.channel(channel).stats;
            (s.admitted() + s.holds > s.evaluations)
                .then_some(PropertyViolation::CaseAccounting { channel, stats: s })
        })
        .collect()
}

/// Runs every checker.
#[must_use]
pub fn check_all<'a>(
    in_flight: impl IntoIterator<Item = &'a Request> + Clone,
    hooks: &dyn DeviceHooks,
    stats: &SchedulerStats,
    config: &SchedulerConfig,
) -> Vec<PropertyViolation> {
    let mut violations = check_zone_exclusive(in_flight.clone(), hooks, stats);
    violations.extend(check_in_flight(in_flight.into_iter().count(), stats));
    violations.extend(check_starvation_bound(stats, config));
    violations.extend(check_channel_accounting(stats));
    violations
}
