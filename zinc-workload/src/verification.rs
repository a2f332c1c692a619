//! Verification logic for detecting scheduler violations.
//!
//! Checks run over a recorded [`History`] and the final scheduler counters:
//! - Zone conflicts (two writes in flight to one sequential zone)
//! - Lifecycle errors (double dispatch, completion of a request not in flight)
//! - Lost requests (submitted but never completed)
//! - Counter imbalance and leaked write units after the run drained

use std::collections::BTreeMap;

use zinc_core::{ChannelKind, Priority, RequestId, ZoneId};
use zinc_sched::{DeviceHooks, SchedulerStats, TierStats};

use crate::history::{EventKind, History};

/// A violation of an expected property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A write was dispatched to a zone that already had one in flight.
    ZoneConflict {
        /// The zone.
        zone: ZoneId,
        /// Write already in flight.
        holder: RequestId,
        /// Write dispatched on top of it.
        intruder: RequestId,
        /// When the second write was dispatched.
        at_us: u64,
    },
    /// A request was dispatched while already in flight.
    DoubleDispatch {
        /// The request.
        id: RequestId,
        /// When.
        at_us: u64,
    },
    /// The device completed a request the history never saw dispatched.
    CompletionWithoutDispatch {
        /// The request.
        id: RequestId,
        /// When.
        at_us: u64,
    },
    /// The scheduler ignored the completion of an in-flight request.
    IgnoredCompletion {
        /// The request.
        id: RequestId,
    },
    /// A submitted request never completed.
    LostRequest {
        /// The request.
        id: RequestId,
    },
    /// A tier's counters do not balance after the run.
    CounterImbalance {
        /// The tier.
        tier: Priority,
        /// Its counters.
        stats: TierStats,
    },
    /// Write units still accounted in flight after the run.
    UnitLeak {
        /// The channel.
        channel: ChannelKind,
        /// Units left.
        units: u64,
    },
    /// Nothing was dispatched or completed for too long while work remained.
    Stalled {
        /// When the run gave up.
        at_us: u64,
        /// Requests not yet completed.
        outstanding: usize,
    },
    /// The scheduler refused to detach.
    DetachFailed {
        /// The reported error.
        message: String,
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZoneConflict {
                zone,
                holder,
                intruder,
                at_us,
            } => write!(
                f,
                "Zone conflict: {intruder} dispatched to {zone} at {at_us}us while {holder} in flight"
            ),
            Self::DoubleDispatch { id, at_us } => {
                write!(f, "Double dispatch: {id} dispatched at {at_us}us while in flight")
            }
            Self::CompletionWithoutDispatch { id, at_us } => {
                write!(f, "Completion without dispatch: {id} at {at_us}us")
            }
            Self::IgnoredCompletion { id } => {
                write!(f, "Ignored completion: scheduler did not retire {id}")
            }
            Self::LostRequest { id } => write!(f, "Lost request: {id} never completed"),
            Self::CounterImbalance { tier, stats } => {
                write!(f, "Counter imbalance: {tier} tier ended with {stats:?}")
            }
            Self::UnitLeak { channel, units } => {
                write!(f, "Unit leak: {channel} channel still counts {units} units in flight")
            }
            Self::Stalled { at_us, outstanding } => {
                write!(f, "Stalled: no progress by {at_us}us with {outstanding} requests outstanding")
            }
            Self::DetachFailed { message } => write!(f, "Detach failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Queued,
    InFlight,
    Done,
    Absorbed(RequestId),
}

/// Verification runner that checks all properties.
pub struct Verification;

impl Verification {
    /// Runs all history checks.
    #[must_use]
    pub fn verify(history: &History, hooks: &dyn DeviceHooks) -> Vec<Violation> {
        let mut violations = Vec::new();
        violations.extend(Self::check_zone_exclusivity(history, hooks));
        violations.extend(Self::check_lifecycle(history));
        violations
    }

    /// Checks that no two writes to one sequential zone overlap in flight.
    #[must_use]
    pub fn check_zone_exclusivity(history: &History, hooks: &dyn DeviceHooks) -> Vec<Violation> {
        let mut violations = Vec::new();
        if !hooks.is_zoned() {
            return violations;
        }

        let mut holders: BTreeMap<ZoneId, RequestId> = BTreeMap::new();
        let mut zone_of: BTreeMap<RequestId, ZoneId> = BTreeMap::new();

        for event in history.events() {
            match event.kind {
                EventKind::Dispatched { request } if request.op.is_write() => {
                    let Some(zone) = hooks.zone_of(request.sector) else {
                        continue;
                    };
                    match holders.get(&zone) {
                        Some(&holder) if holder != request.id => {
                            violations.push(Violation::ZoneConflict {
                                zone,
                                holder,
                                intruder: request.id,
                                at_us: event.at_us,
                            });
                        }
                        _ => {
                            holders.insert(zone, request.id);
                            zone_of.insert(request.id, zone);
                        }
                    }
                }
                EventKind::Requeued { id } | EventKind::Completed { id } => {
                    if let Some(zone) = zone_of.remove(&id) {
                        if holders.get(&zone) == Some(&id) {
                            holders.remove(&zone);
                        }
                    }
                }
                EventKind::Submitted { .. } | EventKind::Merged { .. } | EventKind::Dispatched { .. } => {}
            }
        }
        violations
    }

    /// Checks that every request goes submitted, dispatched, completed, with
    /// requeues allowed in between, and that nothing is left behind.
    #[must_use]
    pub fn check_lifecycle(history: &History) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut states: BTreeMap<RequestId, Lifecycle> = BTreeMap::new();

        for event in history.events() {
            let at_us = event.at_us;
            match event.kind {
                EventKind::Submitted { request, .. } => {
                    states.insert(request.id, Lifecycle::Queued);
                }
                EventKind::Merged { id, into } => {
                    states.insert(id, Lifecycle::Absorbed(into));
                }
                EventKind::Dispatched { request } => {
                    let state = states.entry(request.id).or_insert(Lifecycle::Queued);
                    if *state == Lifecycle::InFlight {
                        violations.push(Violation::DoubleDispatch { id: request.id, at_us });
                    }
                    *state = Lifecycle::InFlight;
                }
                EventKind::Requeued { id } => {
                    states.insert(id, Lifecycle::Queued);
                }
                EventKind::Completed { id } => {
                    let state = states.entry(id).or_insert(Lifecycle::Queued);
                    if *state != Lifecycle::InFlight {
                        violations.push(Violation::CompletionWithoutDispatch { id, at_us });
                    }
                    *state = Lifecycle::Done;
                }
            }
        }

        for (&id, &state) in &states {
            let done = match state {
                Lifecycle::Done => true,
                Lifecycle::Absorbed(into) => states.get(&into) == Some(&Lifecycle::Done),
                Lifecycle::Queued | Lifecycle::InFlight => false,
            };
            if !done {
                violations.push(Violation::LostRequest { id });
            }
        }
        violations
    }

    /// Checks the scheduler's counters once every request completed.
    #[must_use]
    pub fn check_drained(stats: &SchedulerStats) -> Vec<Violation> {
        let mut violations = Vec::new();
        for tier in Priority::ALL {
            let tier_stats = *stats.tier(tier);
            // Requeued requests count as dispatched twice, so only the
            // inserted and completed counters must balance.
            if tier_stats.queued() != 0 {
                violations.push(Violation::CounterImbalance {
                    tier,
                    stats: tier_stats,
                });
            }
        }
        for channel in ChannelKind::ALL {
            let units = stats.channel(channel).in_flight_units;
            if units != 0 {
                violations.push(Violation::UnitLeak { channel, units });
            }
        }
        violations
    }
}
