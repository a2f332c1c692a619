//! Throttled admission of zone management commands.
//!
//! Zone resets and finishes are expensive for the device and interfere with
//! ongoing writes. Each command class waits in its own [`ThrottledChannel`]
//! and is only considered when the channel's epoch fires. At that point:
//!
//! | Case | Condition | Effect |
//! |------|-----------|--------|
//! | A | in-flight write units below the concurrency threshold | admit head |
//! | B | write units dispatched this epoch above the token budget | admit head |
//! | C | head deferred `maximum_epoch_holds` times | admit head |
//! | D | otherwise | every pending command is deferred once more |
//!
//! The fired flag and the unit counters live in a shared [`ChannelSignal`]
//! so that timers and completions can update them without the scheduler
//! lock. A fire that races with a dispatch already past its flag check is
//! seen by the next dispatch, so at most one opportunity is lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;
use zinc_core::{ChannelConfig, ChannelKind, RequestId};

/// Lock-free state shared between a channel, its epoch timer and the
/// completion path.
#[derive(Debug)]
pub struct ChannelSignal {
    fired: AtomicBool,
    dispatched_units: AtomicU64,
    in_flight_units: AtomicU64,
    interval_us: AtomicU64,
}

impl ChannelSignal {
    /// Creates an unfired signal with zeroed counters.
    #[must_use]
    pub const fn new(interval_us: u64) -> Self {
        Self {
            fired: AtomicBool::new(false),
            dispatched_units: AtomicU64::new(0),
            in_flight_units: AtomicU64::new(0),
            interval_us: AtomicU64::new(interval_us),
        }
    }

    /// Sets the fired flag.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);
    }

    /// Consumes the fired flag. Returns true for exactly one caller per fire.
    pub fn take_fired(&self) -> bool {
        self.fired
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the flag is set and not yet consumed.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Write units dispatched since the last admission.
    #[must_use]
    pub fn dispatched_units(&self) -> u64 {
        self.dispatched_units.load(Ordering::Acquire)
    }

    /// Write units dispatched and not yet completed.
    #[must_use]
    pub fn in_flight_units(&self) -> u64 {
        self.in_flight_units.load(Ordering::Acquire)
    }

    /// Current epoch length in microseconds.
    #[must_use]
    pub fn interval_us(&self) -> u64 {
        self.interval_us.load(Ordering::Acquire)
    }

    /// Changes the epoch length; the timer picks it up when it next re-arms.
    pub fn set_interval_us(&self, interval_us: u64) {
        self.interval_us.store(interval_us.max(1), Ordering::Release);
    }

    /// Accounts a dispatched write.
    pub fn add_write(&self, units: u64) {
        self.dispatched_units.fetch_add(units, Ordering::AcqRel);
        self.in_flight_units.fetch_add(units, Ordering::AcqRel);
    }

    /// Accounts a completed (or requeued) write.
    ///
    /// Saturates at zero: a release can never drive the counter negative.
    pub fn release_write(&self, units: u64) {
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .in_flight_units
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(units))
            });
    }

    fn reset_dispatched(&self) {
        self.dispatched_units.store(0, Ordering::Release);
    }
}

/// Why a command was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitCase {
    /// Case A: the device is nearly idle.
    LowPressure,
    /// Case B: enough writes passed during this epoch.
    TokensSpent,
    /// Case C: the head was deferred too many times.
    Starved,
}

/// Outcome of one channel evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPoll {
    /// The epoch has not fired; nothing was evaluated.
    NotFired,
    /// The fire was consumed with no command pending.
    Empty,
    /// The head command was admitted and removed.
    Admit {
        /// The admitted command.
        id: RequestId,
        /// Which case admitted it.
        case: AdmitCase,
    },
    /// Case D: every pending command was deferred.
    Hold {
        /// Commands deferred.
        pending: usize,
    },
}

/// A command waiting for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    /// The command.
    pub id: RequestId,
    /// Failed admission attempts so far.
    pub deferrals: u32,
}

/// Admission counters of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Fires consumed by an evaluation.
    pub evaluations: u64,
    /// Admissions under case A.
    pub low_pressure: u64,
    /// Admissions under case B.
    pub tokens_spent: u64,
    /// Admissions under case C.
    pub starved: u64,
    /// Evaluations that ended in case D.
    pub holds: u64,
}

impl ChannelStats {
    /// Total admissions.
    #[must_use]
    pub const fn admitted(&self) -> u64 {
        self.low_pressure + self.tokens_spent + self.starved
    }
}

/// Arrival-ordered queue of one command class with epoch admission.
#[derive(Debug)]
pub struct ThrottledChannel {
    kind: ChannelKind,
    pending: VecDeque<PendingCommand>,
    config: ChannelConfig,
    signal: Arc<ChannelSignal>,
    next_epoch_us: u64,
    stats: ChannelStats,
}

impl ThrottledChannel {
    /// Creates an empty channel whose first epoch ends one interval after
    /// `current_time_us`.
    #[must_use]
    pub fn new(kind: ChannelKind, config: ChannelConfig, current_time_us: u64) -> Self {
        let interval_us = config.epoch_interval_us.max(1);
        Self {
            kind,
            pending: VecDeque::new(),
            config,
            signal: Arc::new(ChannelSignal::new(interval_us)),
            next_epoch_us: current_time_us.saturating_add(interval_us),
            stats: ChannelStats::default(),
        }
    }

    /// Command class served.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Shared signal for timers and completions.
    #[must_use]
    pub const fn signal(&self) -> &Arc<ChannelSignal> {
        &self.signal
    }

    /// Current admission parameters.
    #[must_use]
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Replaces the admission parameters. A new epoch interval takes effect
    /// at the next re-arm.
    pub fn set_config(&mut self, config: ChannelConfig) {
        self.signal.set_interval_us(config.epoch_interval_us);
        self.config = config;
    }

    /// Appends a command with no deferrals.
    pub fn push(&mut self, id: RequestId) {
        self.pending.push_back(PendingCommand { id, deferrals: 0 });
    }

    /// Removes a pending command. Returns false if it is not pending.
    pub fn remove(&mut self, id: RequestId) -> bool {
        match self.pending.iter().position(|p| p.id == id) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Pending commands from head to tail.
    pub fn pending(&self) -> impl Iterator<Item = &PendingCommand> + '_ {
        self.pending.iter()
    }

    /// Number of pending commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Admission counters.
    #[must_use]
    pub const fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Time at which the next epoch fires when driven by [`Self::advance`].
    #[must_use]
    pub const fn next_epoch_us(&self) -> u64 {
        self.next_epoch_us
    }

    /// Consumes a pending fire, if any, and evaluates the admission cases.
    pub fn poll(&mut self) -> ChannelPoll {
        if !self.signal.take_fired() {
            return ChannelPoll::NotFired;
        }
        self.stats.evaluations += 1;

        let Some(head) = self.pending.front().copied() else {
            return ChannelPoll::Empty;
        };

        let in_flight = self.signal.in_flight_units();
        let dispatched = self.signal.dispatched_units();

        let case = if in_flight < self.config.minimum_concurrency {
            AdmitCase::LowPressure
        } else if dispatched > self.config.command_tokens {
            AdmitCase::TokensSpent
        } else if head.deferrals >= self.config.maximum_epoch_holds {
            AdmitCase::Starved
        } else {
            for command in &mut self.pending {
                command.deferrals = command.deferrals.saturating_add(1);
            }
            self.stats.holds += 1;
            debug!(
                channel = %self.kind,
                pending = self.pending.len(),
                in_flight,
                dispatched,
                head_deferrals = head.deferrals + 1,
                "Holding zone commands"
            );
            return ChannelPoll::Hold {
                pending: self.pending.len(),
            };
        };

        self.pending.pop_front();
        self.signal.reset_dispatched();
        match case {
            AdmitCase::LowPressure => self.stats.low_pressure += 1,
            AdmitCase::TokensSpent => self.stats.tokens_spent += 1,
            AdmitCase::Starved => self.stats.starved += 1,
        }
        debug!(
            channel = %self.kind,
            id = %head.id,
            ?case,
            deferrals = head.deferrals,
            in_flight,
            dispatched,
            "Admitted zone command"
        );
        ChannelPoll::Admit { id: head.id, case }
    }

    /// Fires early if in-flight write units are below the concurrency
    /// threshold. Returns whether it fired.
    pub fn maybe_fire_early(&self) -> bool {
        if self.signal.in_flight_units() < self.config.minimum_concurrency {
            self.signal.fire();
            true
        } else {
            false
        }
    }

    /// Fires if the epoch deadline has passed and re-arms one interval after
    /// `current_time_us`. Returns whether it fired.
    pub fn advance(&mut self, current_time_us: u64) -> bool {
        if current_time_us < self.next_epoch_us {
            return false;
        }
        self.signal.fire();
        self.next_epoch_us = current_time_us.saturating_add(self.signal.interval_us());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(tokens: u64, threshold: u64, holds: u32) -> ThrottledChannel {
        let config = ChannelConfig::new(1_000, tokens, threshold, holds);
        ThrottledChannel::new(ChannelKind::Reset, config, 0)
    }

    fn id(raw: u64) -> RequestId {
        RequestId::new(raw)
    }

    #[test]
    fn test_nothing_happens_until_fired() {
        let mut ch = channel(10, 3, 3);
        ch.push(id(1));
        assert_eq!(ch.poll(), ChannelPoll::NotFired);
        assert_eq!(ch.len(), 1);
    }

    #[test]
    fn test_fire_is_consumed_even_when_empty() {
        let mut ch = channel(10, 3, 3);
        ch.signal().fire();
        assert_eq!(ch.poll(), ChannelPoll::Empty);
        assert_eq!(ch.poll(), ChannelPoll::NotFired);
    }

    #[test]
    fn test_case_a_low_pressure() {
        let mut ch = channel(10, 3, 3);
        ch.push(id(1));
        ch.signal().add_write(2);
        ch.signal().fire();

        assert_eq!(
            ch.poll(),
            ChannelPoll::Admit {
                id: id(1),
                case: AdmitCase::LowPressure
            }
        );
        assert_eq!(ch.signal().dispatched_units(), 0);
        assert_eq!(ch.signal().in_flight_units(), 2);
    }

    #[test]
    fn test_case_b_tokens_spent() {
        let mut ch = channel(10, 3, 3);
        ch.push(id(1));
        ch.signal().add_write(11);
        ch.signal().fire();

        assert_eq!(
            ch.poll(),
            ChannelPoll::Admit {
                id: id(1),
                case: AdmitCase::TokensSpent
            }
        );
        assert_eq!(ch.signal().dispatched_units(), 0);
    }

    #[test]
    fn test_token_budget_is_strictly_exceeded() {
        let mut ch = channel(10, 3, 3);
        ch.push(id(1));
        ch.signal().add_write(10);
        ch.signal().fire();
        assert_eq!(ch.poll(), ChannelPoll::Hold { pending: 1 });
    }

    #[test]
    fn test_case_d_defers_every_pending_command() {
        let mut ch = channel(100, 3, 5);
        for raw in 1..=3 {
            ch.push(id(raw));
        }
        ch.signal().add_write(5);

        ch.signal().fire();
        assert_eq!(ch.poll(), ChannelPoll::Hold { pending: 3 });
        ch.signal().fire();
        assert_eq!(ch.poll(), ChannelPoll::Hold { pending: 3 });

        let deferrals: Vec<u32> = ch.pending().map(|p| p.deferrals).collect();
        assert_eq!(deferrals, vec![2, 2, 2]);
        assert_eq!(ch.stats().holds, 2);
    }

    #[test]
    fn test_case_c_after_maximum_holds() {
        let mut ch = channel(100, 3, 3);
        ch.push(id(1));
        ch.signal().add_write(5);

        for _ in 0..3 {
            ch.signal().fire();
            assert!(matches!(ch.poll(), ChannelPoll::Hold { .. }));
        }
        ch.signal().fire();
        assert_eq!(
            ch.poll(),
            ChannelPoll::Admit {
                id: id(1),
                case: AdmitCase::Starved
            }
        );
        assert_eq!(ch.stats().starved, 1);
        assert_eq!(ch.stats().admitted(), 1);
    }

    #[test]
    fn test_later_arrival_starts_at_zero_deferrals() {
        let mut ch = channel(100, 3, 3);
        ch.push(id(1));
        ch.signal().add_write(5);
        ch.signal().fire();
        ch.poll();
        ch.push(id(2));

        let deferrals: Vec<(u64, u32)> = ch.pending().map(|p| (p.id.get(), p.deferrals)).collect();
        assert_eq!(deferrals, vec![(1, 1), (2, 0)]);
    }

    #[test]
    fn test_admission_takes_the_head() {
        let mut ch = channel(100, 3, 3);
        for raw in [7, 3, 5] {
            ch.push(id(raw));
        }
        let mut order = Vec::new();
        while !ch.is_empty() {
            ch.signal().fire();
            if let ChannelPoll::Admit { id, .. } = ch.poll() {
                order.push(id.get());
            }
        }
        assert_eq!(order, vec![7, 3, 5]);
    }

    #[test]
    fn test_early_fire_below_threshold() {
        let ch = channel(100, 3, 3);
        ch.signal().add_write(3);
        assert!(!ch.maybe_fire_early());
        assert!(!ch.signal().is_fired());

        ch.signal().release_write(1);
        assert!(ch.maybe_fire_early());
        assert!(ch.signal().is_fired());
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let signal = ChannelSignal::new(1);
        signal.add_write(2);
        signal.release_write(5);
        assert_eq!(signal.in_flight_units(), 0);
        assert_eq!(signal.dispatched_units(), 2);
    }

    #[test]
    fn test_advance_rearms_from_fire_time() {
        let mut ch = channel(100, 3, 3);
        assert_eq!(ch.next_epoch_us(), 1_000);
        assert!(!ch.advance(999));
        assert!(ch.advance(1_500));
        assert_eq!(ch.next_epoch_us(), 2_500);
        assert!(ch.signal().take_fired());
        assert!(!ch.signal().take_fired());
    }

    #[test]
    fn test_set_config_updates_interval() {
        let mut ch = channel(100, 3, 3);
        let config = ch.config().with_epoch_interval_us(0);
        ch.set_config(config);
        assert_eq!(ch.signal().interval_us(), 1);
        ch.advance(1_000);
        assert_eq!(ch.next_epoch_us(), 1_001);
    }

    #[test]
    fn test_remove_pending() {
        let mut ch = channel(100, 3, 3);
        ch.push(id(1));
        ch.push(id(2));
        assert!(ch.remove(id(1)));
        assert!(!ch.remove(id(1)));
        assert_eq!(ch.pending().next().map(|p| p.id), Some(id(2)));
    }
}
