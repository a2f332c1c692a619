//! The scheduler instance a host attaches to one device.
//!
//! All queue structures and both throttled channels sit behind a single
//! mutex. The zone gate has its own lock and the channel signals are atomic,
//! so epoch timers never contend for the scheduler lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, trace, warn};
use zinc_core::{
    async_depth_for, ChannelKind, Direction, Priority, Request, RequestId, Route, Sector,
    SchedulerConfig, Tunable,
};

use crate::error::{SchedError, SchedResult};
use crate::hooks::{DeviceHooks, MergeKind};
use crate::request::{Dispatched, Entry, Location, RequestTable};
use crate::selector::Device;
use crate::throttle::{ChannelSignal, ChannelStats, ThrottledChannel};
use crate::tier_queue::{PriorityTierQueue, TierStats};
use crate::zone_gate::ZoneGate;

/// What [`Scheduler::insert`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Queued in its priority tier.
    Queued,
    /// Absorbed into the front of an already queued request. The host
    /// should retire the inserted request.
    Merged {
        /// The request that now covers both extents.
        into: RequestId,
    },
    /// Queued in a throttled channel.
    Throttled(ChannelKind),
}

/// What [`Scheduler::complete`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The request was in flight and is now retired.
    Retired {
        /// Writes are still queued that may have been waiting for the zone
        /// just released; the host should run dispatch again.
        restart_dispatch: bool,
    },
    /// The request was not in flight (unknown, queued, or already
    /// completed). Nothing changed.
    Ignored,
}

/// Snapshot of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    /// Admission counters.
    pub stats: ChannelStats,
    /// Commands waiting.
    pub pending: usize,
    /// Write units dispatched since the last admission.
    pub dispatched_units: u64,
    /// Write units in flight.
    pub in_flight_units: u64,
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Per-tier counters, indexed by [`Priority::index`].
    pub tiers: [TierStats; 3],
    /// Per-channel state, indexed by [`ChannelKind::index`].
    pub channels: [ChannelSnapshot; 2],
    /// Direction of the current batch.
    pub last_dir: Direction,
    /// Dispatches in the current batch.
    pub batching: u32,
    /// Read selections made while a write was waiting.
    pub starved: i64,
    /// Zones with a write in flight.
    pub locked_zones: usize,
    /// Requests handed to the device and not completed.
    pub in_flight: usize,
}

impl SchedulerStats {
    /// Counters of one tier.
    #[must_use]
    pub const fn tier(&self, tier: Priority) -> &TierStats {
        &self.tiers[tier.index()]
    }

    /// State of one channel.
    #[must_use]
    pub const fn channel(&self, kind: ChannelKind) -> &ChannelSnapshot {
        &self.channels[kind.index()]
    }
}

/// State guarded by the scheduler lock.
#[derive(Debug)]
pub(crate) struct SchedulerState {
    pub(crate) config: SchedulerConfig,
    pub(crate) table: RequestTable,
    pub(crate) tiers: [PriorityTierQueue; 3],
    pub(crate) channels: [ThrottledChannel; 2],
    pub(crate) last_dir: Direction,
    pub(crate) batching: u32,
    pub(crate) starved: i64,
}

impl SchedulerState {
    fn new(config: SchedulerConfig, current_time_us: u64) -> Self {
        Self {
            config,
            table: RequestTable::new(),
            tiers: Priority::ALL.map(PriorityTierQueue::new),
            channels: ChannelKind::ALL
                .map(|kind| ThrottledChannel::new(kind, *config.channel(kind), current_time_us)),
            last_dir: Direction::Write,
            batching: 0,
            starved: 0,
        }
    }

    /// Whether any write waits in a tier, sorted or on an override list.
    fn has_write_work(&self) -> bool {
        self.tiers.iter().any(|t| {
            t.has_queued(Direction::Write)
                || t.overrides().any(|id| self.table.request(id).op.is_write())
        })
    }

    fn sync_channels(&mut self) {
        for channel in &mut self.channels {
            let config = *self.config.channel(channel.kind());
            channel.set_config(config);
        }
    }

    /// Releases the resources of an in-flight request and stops tracking it.
    fn retire(&mut self, id: RequestId) -> Option<Dispatched> {
        let entry = self.table.get(id).copied()?;
        let Location::Dispatched(dispatched) = entry.location else {
            return None;
        };
        self.table.remove(id);
        if dispatched.write_units > 0 {
            for channel in &self.channels {
                channel.signal().release_write(dispatched.write_units);
            }
        }
        Some(dispatched)
    }
}

/// A ZINC scheduler attached to one device.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    gate: ZoneGate,
    signals: [Arc<ChannelSignal>; 2],
    hooks: Arc<dyn DeviceHooks>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("zoned", &self.hooks.is_zoned())
            .field("locked_zones", &self.gate.locked_count())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Attaches a scheduler to a device. Out-of-range settings in `config`
    /// are clamped.
    #[must_use]
    pub fn new(config: SchedulerConfig, hooks: Arc<dyn DeviceHooks>, current_time_us: u64) -> Self {
        let state = SchedulerState::new(config.clamped(), current_time_us);
        let signals = ChannelKind::ALL.map(|kind| Arc::clone(state.channels[kind.index()].signal()));
        debug!(
            zoned = hooks.is_zoned(),
            nonrot = hooks.is_nonrot(),
            "Scheduler attached"
        );
        Self {
            state: Mutex::new(state),
            gate: ZoneGate::new(),
            signals,
            hooks,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device(&self) -> Device<'_> {
        Device {
            gate: &self.gate,
            hooks: self.hooks.as_ref(),
        }
    }

    /// Queues a request.
    ///
    /// Reads, writes and other commands go to their priority tier: at the
    /// head of its override list if `at_head`, otherwise into the sector
    /// index and fifo with a deadline one expiry budget from now. Zone resets
    /// and finishes go to their throttled channel.
    ///
    /// Inserting a request that is in flight requeues it: its zone lock and
    /// write units are released first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::DuplicateRequest`] if the id is already queued.
    pub fn insert(&self, request: Request, at_head: bool, current_time_us: u64) -> SchedResult<InsertOutcome> {
        let mut state = self.lock();

        let requeued = match state.table.get(request.id).map(Entry::is_queued) {
            Some(true) => {
                return Err(SchedError::DuplicateRequest { id: request.id });
            }
            Some(false) => {
                let dispatched = state.retire(request.id);
                if let Some(zone) = dispatched.and_then(|d| d.zone) {
                    self.gate.unlock(zone, request.id);
                }
                debug!(id = %request.id, "Requeued in-flight request");
                true
            }
            None => false,
        };

        let dir = match request.op.route() {
            Route::Channel(kind) => {
                state.table.insert(request, Location::Channel(kind), current_time_us);
                let channel = &mut state.channels[kind.index()];
                channel.push(request.id);
                if channel.maybe_fire_early() {
                    trace!(channel = %kind, id = %request.id, "Channel fired on insert");
                }
                return Ok(InsertOutcome::Throttled(kind));
            }
            Route::Queue(dir) => dir,
        };

        let tier = request.priority;
        let t = tier.index();
        if !requeued {
            state.tiers[t].note_inserted();
        }

        if !requeued && !at_head && state.config.front_merges {
            if let Some(into) = self.front_merge_target(&state, &request, dir) {
                Self::absorb_front(&mut state, into, &request, dir);
                state.tiers[t].note_merged();
                state.tiers[t].note_completed();
                trace!(id = %request.id, %into, "Front-merged on insert");
                return Ok(InsertOutcome::Merged { into });
            }
        }

        if at_head {
            state.tiers[t].push_override(request.id);
            state
                .table
                .insert(request, Location::Override { tier }, current_time_us);
        } else {
            let expires_us = current_time_us.saturating_add(state.config.expire_us(dir));
            let seq = state.tiers[t].add(dir, request.sector, request.id, expires_us);
            state
                .table
                .insert(request, Location::Sorted { tier, dir, seq }, expires_us);
        }
        trace!(id = %request.id, %tier, %dir, sector = request.sector, at_head, "Inserted");
        Ok(InsertOutcome::Queued)
    }

    fn front_merge_target(&self, state: &SchedulerState, request: &Request, dir: Direction) -> Option<RequestId> {
        let existing = state.tiers[request.priority.index()].find_at(dir, request.end_sector())?;
        let kind = self
            .hooks
            .classify_merge(state.table.request(existing), request);
        (kind != MergeKind::NoMerge).then_some(existing)
    }

    /// Extends `into` downwards to cover `incoming`.
    fn absorb_front(state: &mut SchedulerState, into: RequestId, incoming: &Request, dir: Direction) {
        let Some(entry) = state.table.get_mut(into) else {
            return;
        };
        let old_sector = entry.request.sector;
        entry.request.sector = incoming.sector;
        entry.request.sectors = entry.request.sectors.saturating_add(incoming.sectors);
        let tier = entry.request.priority;
        state.tiers[tier.index()].reposition(dir, old_sector, incoming.sector, into);
    }

    /// Selects the next request for the device, if any.
    ///
    /// `None` is a normal outcome. On zoned devices it is also returned while
    /// writes are queued but all their zones are locked; dispatch again once
    /// [`Scheduler::complete`] asks for a restart.
    pub fn dispatch(&self, current_time_us: u64) -> Option<Request> {
        let dev = self.device();
        let mut state = self.lock();

        let id = state
            .dispatch_channels()
            .or_else(|| state.dispatch_aged(current_time_us, dev))
            .or_else(|| state.dispatch_tiers(current_time_us, dev))?;

        let request = *state.table.request(id);
        trace!(
            %id,
            op = ?request.op,
            tier = %request.priority,
            sector = request.sector,
            batching = state.batching,
            starved = state.starved,
            "Dispatched"
        );
        Some(request)
    }

    /// Retires an in-flight request.
    ///
    /// Releases its zone and write units and may fire a throttled channel
    /// early. Completing a request that is not in flight, including a second
    /// completion of the same request, is ignored.
    pub fn complete(&self, id: RequestId) -> Completion {
        let restart_dispatch = {
            let mut state = self.lock();
            let Some(entry) = state.table.get(id).copied() else {
                warn!(%id, "Completion for unknown request ignored");
                return Completion::Ignored;
            };
            let Some(dispatched) = state.retire(id) else {
                warn!(%id, location = ?entry.location, "Completion for queued request ignored");
                return Completion::Ignored;
            };
            if let Some(tier) = dispatched.tier {
                state.tiers[tier.index()].note_completed();
            }

            match entry.request.op.route() {
                Route::Channel(kind) => {
                    if state.channels[kind.index()].maybe_fire_early() {
                        trace!(channel = %kind, "Channel fired on command completion");
                    }
                }
                Route::Queue(Direction::Write) => {
                    for channel in state.channels.iter().filter(|c| !c.is_empty()) {
                        if channel.maybe_fire_early() {
                            trace!(channel = %channel.kind(), "Channel fired on write completion");
                        }
                    }
                }
                Route::Queue(Direction::Read) => {}
            }

            // Unlock before sampling write work, under the state lock.
            if let Some(zone) = dispatched.zone {
                self.gate.unlock(zone, id);
            }
            self.hooks.is_zoned() && state.has_write_work()
        };

        Completion::Retired { restart_dispatch }
    }

    /// Withdraws a request wherever it is. Queued requests leave their
    /// structures; in-flight requests are completed. Returns false if the
    /// request is unknown, so repeated aborts are harmless.
    pub fn abort(&self, id: RequestId) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.table.get(id).copied() else {
            return false;
        };
        match entry.location {
            Location::Sorted { tier, dir, seq } => {
                state.tiers[tier.index()].remove(dir, entry.request.sector, id, seq);
                state.tiers[tier.index()].note_completed();
            }
            Location::Override { tier } => {
                state.tiers[tier.index()].remove_override(id);
                state.tiers[tier.index()].note_completed();
            }
            Location::Channel(kind) => {
                state.channels[kind.index()].remove(id);
            }
            Location::Dispatched(_) => {
                drop(state);
                return matches!(self.complete(id), Completion::Retired { .. });
            }
        }
        state.table.remove(id);
        debug!(%id, location = ?entry.location, "Aborted queued request");
        true
    }

    /// Whether any tier or channel has a request waiting.
    #[must_use]
    pub fn has_work(&self) -> bool {
        let state = self.lock();
        state.tiers.iter().any(PriorityTierQueue::has_work)
            || state.channels.iter().any(|c| !c.is_empty())
    }

    /// Finds a queued request that `candidate` could be prepended to.
    #[must_use]
    pub fn merge_front(&self, candidate: &Request) -> Option<(RequestId, MergeKind)> {
        let state = self.lock();
        if !state.config.front_merges {
            return None;
        }
        let Route::Queue(dir) = candidate.op.route() else {
            return None;
        };
        let existing = state.tiers[candidate.priority.index()].find_at(dir, candidate.end_sector())?;
        match self
            .hooks
            .classify_merge(state.table.request(existing), candidate)
        {
            MergeKind::NoMerge => None,
            kind => Some((existing, kind)),
        }
    }

    /// Records that the host extended a queued request. A changed start
    /// sector repositions it in the sector index.
    pub fn request_merged(&self, id: RequestId, sector: Sector, sectors: u32) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.table.get_mut(id) else {
            return false;
        };
        let old_sector = entry.request.sector;
        entry.request.sector = sector;
        entry.request.sectors = sectors;
        if let Location::Sorted { tier, dir, .. } = entry.location {
            state.tiers[tier.index()].reposition(dir, old_sector, sector, id);
        }
        true
    }

    /// Records that the host merged queued request `absorbed` into `into`.
    ///
    /// `absorbed` leaves the scheduler. If it was due earlier, `into` takes
    /// over its fifo position and deadline.
    pub fn requests_merged(&self, into: RequestId, absorbed: RequestId) -> bool {
        let mut state = self.lock();
        let (Some(into_entry), Some(gone)) = (
            state.table.get(into).copied(),
            state.table.get(absorbed).copied(),
        ) else {
            return false;
        };
        if !into_entry.is_queued() || !gone.is_queued() || into == absorbed {
            return false;
        }

        match gone.location {
            Location::Sorted { tier, dir, seq } => {
                state.tiers[tier.index()].remove(dir, gone.request.sector, absorbed, seq);
                if let Location::Sorted {
                    tier: into_tier,
                    dir: into_dir,
                    seq: into_seq,
                } = into_entry.location
                {
                    if into_tier == tier && into_dir == dir && gone.expires_us < into_entry.expires_us {
                        state.tiers[tier.index()].move_in_fifo(dir, into, into_seq, seq, gone.expires_us);
                        if let Some(entry) = state.table.get_mut(into) {
                            entry.location = Location::Sorted { tier, dir, seq };
                            entry.expires_us = gone.expires_us;
                        }
                    }
                }
                state.tiers[tier.index()].note_merged();
                state.tiers[tier.index()].note_completed();
            }
            Location::Override { tier } => {
                state.tiers[tier.index()].remove_override(absorbed);
                state.tiers[tier.index()].note_merged();
                state.tiers[tier.index()].note_completed();
            }
            Location::Channel(kind) => {
                state.channels[kind.index()].remove(absorbed);
            }
            Location::Dispatched(_) => return false,
        }
        state.table.remove(absorbed);
        trace!(%into, %absorbed, "Requests merged");
        true
    }

    /// Admission depth for a new request: `None` (unlimited) for synchronous
    /// reads, `async_depth` for everything else.
    #[must_use]
    pub fn set_depth_limit(&self, sync: bool, write: bool) -> Option<u32> {
        if sync && !write {
            return None;
        }
        Some(self.lock().config.async_depth)
    }

    /// Recomputes `async_depth` after the host changed its request count.
    pub fn depth_updated(&self, nr_requests: u32) -> u32 {
        let depth = async_depth_for(nr_requests);
        self.lock().config.async_depth = depth;
        depth
    }

    /// Sets a tunable, clamping it into range. Returns the stored value.
    pub fn set_tunable(&self, tunable: Tunable, value: i64) -> i64 {
        let mut state = self.lock();
        let stored = state.config.set(tunable, value);
        state.sync_channels();
        debug!(%tunable, requested = value, stored, "Tunable updated");
        stored
    }

    /// Reads a tunable in host units.
    #[must_use]
    pub fn tunable(&self, tunable: Tunable) -> i64 {
        self.lock().config.get(tunable)
    }

    /// Sets a tunable by attribute name from its textual value.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::Config`] if the name is unknown or the value is
    /// not an integer.
    pub fn set_attribute(&self, name: &str, value: &str) -> SchedResult<i64> {
        let mut state = self.lock();
        let stored = state.config.set_attribute(name, value)?;
        state.sync_channels();
        debug!(name, stored, "Attribute updated");
        Ok(stored)
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> SchedulerConfig {
        self.lock().config
    }

    /// Sets a channel's fired flag, as its epoch timer would.
    pub fn fire_epoch(&self, kind: ChannelKind) {
        self.signals[kind.index()].fire();
    }

    /// Fires every channel whose epoch ended by `current_time_us` and
    /// re-arms it. Returns the channels that fired.
    pub fn advance_clock(&self, current_time_us: u64) -> Vec<ChannelKind> {
        let mut state = self.lock();
        state
            .channels
            .iter_mut()
            .filter_map(|channel| channel.advance(current_time_us).then_some(channel.kind()))
            .collect()
    }

    /// Shared signal of one channel, for an external epoch timer.
    #[must_use]
    pub fn epoch_signal(&self, kind: ChannelKind) -> Arc<ChannelSignal> {
        Arc::clone(&self.signals[kind.index()])
    }

    /// Whether the scheduler is running on a zoned device.
    #[must_use]
    pub fn is_zoned(&self) -> bool {
        self.hooks.is_zoned()
    }

    /// Commands pending in a channel, head first, with their deferral
    /// counts.
    #[must_use]
    pub fn pending_commands(&self, kind: ChannelKind) -> Vec<(RequestId, u32)> {
        self.lock().channels[kind.index()]
            .pending()
            .map(|p| (p.id, p.deferrals))
            .collect()
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let state = self.lock();
        SchedulerStats {
            tiers: std::array::from_fn(|i| state.tiers[i].stats()),
            channels: std::array::from_fn(|i| {
                let channel = &state.channels[i];
                ChannelSnapshot {
                    stats: channel.stats(),
                    pending: channel.len(),
                    dispatched_units: channel.signal().dispatched_units(),
                    in_flight_units: channel.signal().in_flight_units(),
                }
            }),
            last_dir: state.last_dir,
            batching: state.batching,
            starved: state.starved,
            locked_zones: self.gate.locked_count(),
            in_flight: state.table.in_flight(),
        }
    }

    /// Detaches the scheduler from its device.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::NotDrained`] if any request is still queued,
    /// throttled or in flight. Nothing is cleaned up.
    pub fn detach(self) -> SchedResult<()> {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let throttled: usize = state.channels.iter().map(ThrottledChannel::len).sum();
        let in_flight = state.table.in_flight();
        let queued = state.table.len() - in_flight - throttled;

        if queued + throttled + in_flight == 0 {
            debug!("Scheduler detached");
            return Ok(());
        }
        for tier in &state.tiers {
            if tier.queued() > 0 {
                error!(tier = %tier.tier(), stats = ?tier.stats(), "Tier not empty at detach");
            }
        }
        error!(queued, throttled, in_flight, "Scheduler detached with outstanding requests");
        Err(SchedError::NotDrained {
            queued,
            throttled,
            in_flight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{ConventionalDevice, ZonedDevice};
    use zinc_core::ChannelConfig;

    fn conventional(config: SchedulerConfig) -> Scheduler {
        Scheduler::new(config, Arc::new(ConventionalDevice::default()), 0)
    }

    fn zoned(config: SchedulerConfig) -> Scheduler {
        Scheduler::new(config, Arc::new(ZonedDevice::new(1024)), 0)
    }

    fn drain(scheduler: &Scheduler, now: u64) -> Vec<u64> {
        std::iter::from_fn(|| scheduler.dispatch(now))
            .map(|rq| rq.id.get())
            .collect()
    }

    #[test]
    fn test_sector_order_within_batch() {
        let s = conventional(SchedulerConfig::new());
        for (id, sector) in [(1, 100), (2, 200), (3, 150)] {
            s.insert(Request::read(id, sector, 8), false, 0).unwrap();
        }
        let sectors: Vec<u64> = std::iter::from_fn(|| s.dispatch(0))
            .map(|rq| rq.sector)
            .collect();
        assert_eq!(sectors, vec![100, 150, 200]);
    }

    #[test]
    fn test_write_dispatched_after_starvation() {
        let config = SchedulerConfig::new().with_fifo_batch(1).with_writes_starved(2);
        let s = conventional(config);
        for (id, sector) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
            s.insert(Request::read(id, sector, 8), false, 0).unwrap();
        }
        s.insert(Request::write(5, 500, 8), false, 0).unwrap();

        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(1));
        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(2));
        assert_eq!(s.stats().starved, 2);
        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(5));
        assert_eq!(s.stats().starved, 0);
        assert_eq!(drain(&s, 0), vec![3, 4]);
    }

    #[test]
    fn test_expired_request_beats_sector_order() {
        let config = SchedulerConfig::new()
            .with_fifo_batch(1)
            .with_read_expire_us(1_000);
        let s = conventional(config);
        for (id, sector) in [(1, 500), (2, 100), (3, 200), (4, 600)] {
            s.insert(Request::read(id, sector, 8), false, 0).unwrap();
        }

        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(1));
        // Request 4 follows in sector order, but request 2 is overdue.
        assert_eq!(s.dispatch(2_000).map(|r| r.id.get()), Some(2));
    }

    #[test]
    fn test_sector_order_until_expiry() {
        let config = SchedulerConfig::new()
            .with_fifo_batch(1)
            .with_read_expire_us(1_000);
        let s = conventional(config);
        for (id, sector) in [(1, 500), (2, 100), (3, 600)] {
            s.insert(Request::read(id, sector, 8), false, 0).unwrap();
        }

        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(1));
        assert_eq!(s.dispatch(10).map(|r| r.id.get()), Some(3));
        assert_eq!(s.dispatch(10).map(|r| r.id.get()), Some(2));
    }

    #[test]
    fn test_override_goes_first() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::read(1, 100, 8), false, 0).unwrap();
        s.insert(Request::read(2, 999, 8), true, 0).unwrap();
        assert_eq!(drain(&s, 0), vec![2, 1]);
    }

    #[test]
    fn test_priority_tiers_are_strict() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::read(1, 0, 8).with_priority(Priority::Idle), false, 0)
            .unwrap();
        s.insert(Request::read(2, 100, 8), false, 0).unwrap();

        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(2));
        // BestEffort still owns an in-flight request.
        assert_eq!(s.dispatch(0), None);
        s.complete(RequestId::new(2));
        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(1));
    }

    #[test]
    fn test_priority_aging() {
        let s = conventional(SchedulerConfig::new());
        let aging = s.config().prio_aging_expire_us;
        s.insert(Request::read(1, 5_000, 8).with_priority(Priority::Idle), false, 0)
            .unwrap();
        s.insert(Request::read(2, 0, 8), false, aging).unwrap();

        assert_eq!(s.dispatch(aging).map(|r| r.id.get()), Some(1));
        assert_eq!(s.dispatch(aging).map(|r| r.id.get()), Some(2));
    }

    #[test]
    fn test_locked_zone_is_skipped() {
        let s = zoned(SchedulerConfig::new());
        s.insert(Request::write(1, 0, 8), false, 0).unwrap();
        s.insert(Request::write(2, 8, 8), false, 0).unwrap();
        s.insert(Request::write(3, 2048, 8), false, 0).unwrap();

        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(1));
        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(3));
        assert_eq!(s.dispatch(0), None);
        assert_eq!(s.stats().locked_zones, 2);

        assert_eq!(
            s.complete(RequestId::new(1)),
            Completion::Retired {
                restart_dispatch: true
            }
        );
        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(2));
    }

    #[test]
    fn test_duplicate_completion_is_ignored() {
        let s = zoned(SchedulerConfig::new());
        s.insert(Request::write(1, 0, 16), false, 0).unwrap();
        s.insert(Request::write(2, 16, 16), false, 0).unwrap();

        s.dispatch(0);
        assert!(matches!(s.complete(RequestId::new(1)), Completion::Retired { .. }));
        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(2));

        // A late duplicate must not release the zone now held by request 2.
        assert_eq!(s.complete(RequestId::new(1)), Completion::Ignored);
        let stats = s.stats();
        assert_eq!(stats.locked_zones, 1);
        assert_eq!(stats.channel(ChannelKind::Reset).in_flight_units, 1);
        assert_eq!(stats.tier(Priority::BestEffort).completed, 1);
    }

    #[test]
    fn test_write_units_accounting() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::write(1, 0, 2048), false, 0).unwrap();
        s.dispatch(0);

        let stats = s.stats();
        for kind in ChannelKind::ALL {
            assert_eq!(stats.channel(kind).in_flight_units, 128);
            assert_eq!(stats.channel(kind).dispatched_units, 128);
        }

        s.complete(RequestId::new(1));
        let stats = s.stats();
        assert_eq!(stats.channel(ChannelKind::Finish).in_flight_units, 0);
        assert_eq!(stats.channel(ChannelKind::Finish).dispatched_units, 128);
    }

    #[test]
    fn test_finish_admitted_under_low_pressure() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::write(1, 0, 16), false, 0).unwrap();
        s.dispatch(0);

        for id in 10..15 {
            assert_eq!(
                s.insert(Request::finish(id, id * 1024), false, 0).unwrap(),
                InsertOutcome::Throttled(ChannelKind::Finish)
            );
        }
        let rq = s.dispatch(0).unwrap();
        assert_eq!(rq.id, RequestId::new(10));
        assert_eq!(s.stats().channel(ChannelKind::Finish).stats.low_pressure, 1);
        assert_eq!(s.stats().channel(ChannelKind::Finish).pending, 4);
    }

    #[test]
    fn test_reset_forced_after_maximum_holds() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::write(1, 0, 2048), false, 0).unwrap();
        s.dispatch(0);
        s.insert(Request::reset(2, 4096), false, 0).unwrap();

        for round in 1..=3 {
            s.fire_epoch(ChannelKind::Reset);
            assert_eq!(s.dispatch(0), None);
            assert_eq!(s.pending_commands(ChannelKind::Reset), vec![(RequestId::new(2), round)]);
        }
        s.fire_epoch(ChannelKind::Reset);
        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(2));
        assert_eq!(s.stats().channel(ChannelKind::Reset).stats.starved, 1);
    }

    #[test]
    fn test_command_completion_fires_early() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::reset(1, 0), false, 0).unwrap();
        s.insert(Request::reset(2, 1024), false, 0).unwrap();

        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(1));
        assert!(!s.epoch_signal(ChannelKind::Reset).is_fired());
        s.complete(RequestId::new(1));
        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(2));
    }

    #[test]
    fn test_requeue_releases_zone_and_units() {
        let s = zoned(SchedulerConfig::new());
        s.insert(Request::write(1, 0, 16), false, 0).unwrap();
        let rq = s.dispatch(0).unwrap();
        assert_eq!(s.stats().locked_zones, 1);

        assert_eq!(s.insert(rq, true, 5).unwrap(), InsertOutcome::Queued);
        let stats = s.stats();
        assert_eq!(stats.locked_zones, 0);
        assert_eq!(stats.channel(ChannelKind::Reset).in_flight_units, 0);
        assert_eq!(stats.tier(Priority::BestEffort).inserted, 1);

        assert_eq!(s.dispatch(5).map(|r| r.id), Some(rq.id));
        s.complete(rq.id);
        assert!(s.detach().is_ok());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::read(1, 0, 8), false, 0).unwrap();
        let err = s.insert(Request::read(1, 64, 8), false, 0).unwrap_err();
        assert!(matches!(err, SchedError::DuplicateRequest { id } if id == RequestId::new(1)));
    }

    #[test]
    fn test_front_merge_on_insert() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::write(1, 100, 8), false, 0).unwrap();
        assert_eq!(
            s.insert(Request::write(2, 92, 8), false, 0).unwrap(),
            InsertOutcome::Merged {
                into: RequestId::new(1)
            }
        );

        let stats = s.stats().tiers[Priority::BestEffort.index()];
        assert_eq!((stats.inserted, stats.merged, stats.completed), (2, 1, 1));

        let rq = s.dispatch(0).unwrap();
        assert_eq!((rq.sector, rq.sectors), (92, 16));
    }

    #[test]
    fn test_merge_front_query() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::read(1, 100, 8), false, 0).unwrap();

        let candidate = Request::read(9, 92, 8);
        assert_eq!(
            s.merge_front(&candidate),
            Some((RequestId::new(1), MergeKind::FrontMerge))
        );
        assert_eq!(s.merge_front(&Request::read(9, 90, 8)), None);
        assert_eq!(s.merge_front(&Request::write(9, 92, 8)), None);

        s.set_tunable(Tunable::FrontMerges, 0);
        assert_eq!(s.merge_front(&candidate), None);
    }

    #[test]
    fn test_request_merged_repositions() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::read(1, 100, 8), false, 0).unwrap();
        assert!(s.request_merged(RequestId::new(1), 84, 24));
        assert!(!s.request_merged(RequestId::new(7), 0, 8));

        assert_eq!(
            s.merge_front(&Request::read(9, 76, 8)).map(|(id, _)| id),
            Some(RequestId::new(1))
        );
    }

    #[test]
    fn test_requests_merged_inherits_fifo_position() {
        let config = SchedulerConfig::new().with_fifo_batch(1);
        let s = conventional(config);
        s.insert(Request::read(1, 0, 8), false, 0).unwrap();
        s.insert(Request::read(2, 500, 8), false, 0).unwrap();
        s.insert(Request::read(3, 100, 8), false, 100).unwrap();

        // Request 3 absorbs request 1 and becomes the oldest read.
        assert!(s.requests_merged(RequestId::new(3), RequestId::new(1)));
        assert!(!s.requests_merged(RequestId::new(3), RequestId::new(1)));
        assert!(!s.abort(RequestId::new(1)));

        let stats = s.stats().tiers[Priority::BestEffort.index()];
        assert_eq!((stats.merged, stats.completed), (1, 1));
        assert_eq!(s.dispatch(0).map(|r| r.id.get()), Some(3));
    }

    #[test]
    fn test_abort_is_idempotent() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::read(1, 0, 8), false, 0).unwrap();
        s.insert(Request::reset(2, 0), false, 0).unwrap();
        s.insert(Request::read(3, 64, 8), true, 0).unwrap();
        assert!(s.has_work());

        for raw in 1..=3 {
            assert!(s.abort(RequestId::new(raw)));
            assert!(!s.abort(RequestId::new(raw)));
        }
        assert!(!s.has_work());
        assert!(s.detach().is_ok());
    }

    #[test]
    fn test_abort_in_flight_completes_it() {
        let s = zoned(SchedulerConfig::new());
        s.insert(Request::write(1, 0, 8), false, 0).unwrap();
        s.dispatch(0);
        assert!(s.abort(RequestId::new(1)));
        assert!(!s.abort(RequestId::new(1)));
        assert_eq!(s.stats().locked_zones, 0);
    }

    #[test]
    fn test_detach_reports_outstanding_work() {
        let s = conventional(SchedulerConfig::new());
        s.insert(Request::read(1, 0, 8), false, 0).unwrap();
        s.insert(Request::read(2, 64, 8), false, 0).unwrap();
        s.dispatch(0);
        s.insert(Request::finish(3, 0), false, 0).unwrap();

        match s.detach() {
            Err(SchedError::NotDrained {
                queued,
                throttled,
                in_flight,
            }) => assert_eq!((queued, throttled, in_flight), (1, 1, 1)),
            other => panic!("unexpected detach result: {other:?}"),
        }
    }

    #[test]
    fn test_depth_limit() {
        let s = conventional(SchedulerConfig::new());
        assert_eq!(s.set_depth_limit(true, false), None);
        assert_eq!(s.set_depth_limit(false, false), Some(192));
        assert_eq!(s.set_depth_limit(true, true), Some(192));

        assert_eq!(s.depth_updated(64), 48);
        assert_eq!(s.set_depth_limit(false, true), Some(48));
        assert_eq!(s.depth_updated(1), 1);
    }

    #[test]
    fn test_attributes_reach_channels() {
        let s = conventional(SchedulerConfig::new());
        assert_eq!(s.set_attribute("reset_epoch_interval", "0").unwrap(), 1);
        assert_eq!(s.epoch_signal(ChannelKind::Reset).interval_us(), 1_000);
        assert_eq!(s.epoch_signal(ChannelKind::Finish).interval_us(), 64_000);
        assert_eq!(s.tunable(Tunable::EpochInterval(ChannelKind::Reset)), 1);

        let err = s.set_attribute("no_such_knob", "1").unwrap_err();
        assert!(matches!(err, SchedError::Config(_)));
    }

    #[test]
    fn test_advance_clock() {
        let finish = ChannelConfig::default().with_epoch_interval_us(10_000);
        let config = SchedulerConfig::new().with_channel(ChannelKind::Finish, finish);
        let s = conventional(config);

        assert_eq!(s.advance_clock(9_999), vec![]);
        assert_eq!(s.advance_clock(10_000), vec![ChannelKind::Finish]);
        assert_eq!(s.advance_clock(19_999), vec![]);
        assert_eq!(
            s.advance_clock(64_000),
            vec![ChannelKind::Reset, ChannelKind::Finish]
        );
        assert_eq!(s.advance_clock(100_000), vec![ChannelKind::Finish]);
        assert!(s.epoch_signal(ChannelKind::Reset).is_fired());
    }
}
