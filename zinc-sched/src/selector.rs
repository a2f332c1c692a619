//! Dispatch selection.
//!
//! Picks at most one request per call:
//!
//! 1. Throttled channels, Reset then Finish, if their epoch fired.
//! 2. Priority aging: when two or more tiers own requests, BestEffort and
//!    Idle may each dispatch work older than `prio_aging_expire`.
//! 3. Tiers in priority order. The first tier that yields a request or still
//!    owns requests ends the walk, so lower tiers never overtake it.
//!
//! Within a tier, the override list goes first. Otherwise the sector-ordered
//! successor of the last dispatch continues the batch while the batch is
//! shorter than `fifo_batch`; when it is not, a direction is chosen (reads
//! unless writes have been starved `writes_starved` times) and the oldest
//! request is taken if it expired, else the next one in sector order.
//!
//! On zoned devices a write whose zone is locked is never selected. Scans
//! skip such writes, and on rotational media they skip the whole sequential
//! run behind them so that a stream is not split.

use tracing::trace;
use zinc_core::{ChannelKind, Direction, Priority, Request, RequestId, ZoneId};

use crate::hooks::DeviceHooks;
use crate::request::{Dispatched, Location};
use crate::scheduler::SchedulerState;
use crate::sector_index::SectorKey;
use crate::throttle::ChannelPoll;
use crate::zone_gate::{ZoneGate, ZoneView};

/// Device-side collaborators consulted during selection.
#[derive(Clone, Copy)]
pub(crate) struct Device<'a> {
    pub(crate) gate: &'a ZoneGate,
    pub(crate) hooks: &'a dyn DeviceHooks,
}

impl Device<'_> {
    /// Zone a request must lock before it may be dispatched.
    pub(crate) fn write_zone(&self, request: &Request) -> Option<ZoneId> {
        if request.op.is_write() && self.hooks.is_zoned() {
            self.hooks.zone_of(request.sector)
        } else {
            None
        }
    }

    /// Whether selection in `dir` needs zone checks at all.
    fn gated(&self, dir: Direction) -> bool {
        dir == Direction::Write && self.hooks.is_zoned()
    }
}

impl SchedulerState {
    /// Admits at most one throttled command.
    pub(crate) fn dispatch_channels(&mut self) -> Option<RequestId> {
        for kind in ChannelKind::ALL {
            match self.channels[kind.index()].poll() {
                ChannelPoll::Admit { id, .. } => {
                    if let Some(entry) = self.table.get_mut(id) {
                        entry.location = Location::Dispatched(Dispatched {
                            tier: None,
                            write_units: 0,
                            zone: None,
                        });
                    }
                    return Some(id);
                }
                ChannelPoll::NotFired | ChannelPoll::Empty | ChannelPoll::Hold { .. } => {}
            }
        }
        None
    }

    /// Gives lower tiers a chance to dispatch requests that have waited
    /// longer than the aging limit.
    pub(crate) fn dispatch_aged(&mut self, current_time_us: u64, dev: Device<'_>) -> Option<RequestId> {
        let busy = self.tiers.iter().filter(|t| t.queued() > 0).count();
        if busy < 2 {
            return None;
        }
        // Nothing can have started before time zero.
        let latest_start = current_time_us.checked_sub(self.config.prio_aging_expire_us)?;

        for tier in Priority::AGED {
            if let Some(id) = self.dispatch_from_tier(tier, latest_start, current_time_us, dev) {
                trace!(%id, %tier, "Dispatching aged request");
                return Some(id);
            }
        }
        None
    }

    /// Walks the tiers in priority order.
    pub(crate) fn dispatch_tiers(&mut self, current_time_us: u64, dev: Device<'_>) -> Option<RequestId> {
        for tier in Priority::ALL {
            let id = self.dispatch_from_tier(tier, current_time_us, current_time_us, dev);
            if id.is_some() || self.tiers[tier.index()].queued() > 0 {
                return id;
            }
        }
        None
    }

    /// Selects one request of `tier` that started no later than
    /// `latest_start` and marks it dispatched.
    pub(crate) fn dispatch_from_tier(
        &mut self,
        tier: Priority,
        latest_start: u64,
        current_time_us: u64,
        dev: Device<'_>,
    ) -> Option<RequestId> {
        let t = tier.index();

        if let Some(id) = self.tiers[t].override_front() {
            let request = *self.table.request(id);
            if self.started_after(id, latest_start) {
                return None;
            }
            let zone = dev.write_zone(&request);
            if !dev.gate.with_view(|view| view.can_dispatch(zone)) {
                return None;
            }
            self.tiers[t].pop_override();
            self.mark_dispatched(tier, id, zone, dev);
            return Some(id);
        }

        let batched = self
            .next_request(tier, self.last_dir, dev)
            .filter(|_| self.batching < self.config.fifo_batch)
            .map(|id| (id, self.last_dir));

        let (id, dir) = match batched {
            Some(selected) => selected,
            None => {
                let dir = self.choose_direction(tier, dev)?;
                let next = self.next_request(tier, dir, dev);
                let expired = self.tiers[t]
                    .fifo_front(dir)
                    .is_some_and(|front| front.is_expired(current_time_us));
                let id = if expired || next.is_none() {
                    self.fifo_request(tier, dir, dev)
                } else {
                    next
                }?;
                self.last_dir = dir;
                self.batching = 0;
                (id, dir)
            }
        };

        if self.started_after(id, latest_start) {
            return None;
        }

        self.batching += 1;
        let entry = *self.table.get(id)?;
        if let Location::Sorted { seq, .. } = entry.location {
            self.tiers[t].take(dir, entry.request.sector, id, seq);
        }
        let zone = dev.write_zone(&entry.request);
        self.mark_dispatched(tier, id, zone, dev);
        Some(id)
    }

    /// Picks the direction to serve when not continuing a batch.
    fn choose_direction(&mut self, tier: Priority, dev: Device<'_>) -> Option<Direction> {
        let queue = &self.tiers[tier.index()];
        let has_reads = queue.has_queued(Direction::Read);
        let has_writes = queue.has_queued(Direction::Write);

        if has_reads {
            let write_ready = self.fifo_request(tier, Direction::Write, dev).is_some();
            if write_ready {
                let starved = self.starved;
                self.starved = starved.saturating_add(1);
                if starved >= i64::from(self.config.writes_starved) {
                    self.starved = 0;
                    return Some(Direction::Write);
                }
            }
            return Some(Direction::Read);
        }
        if has_writes {
            self.starved = 0;
            return Some(Direction::Write);
        }
        None
    }

    /// Effective start of a queued request is its deadline minus the
    /// direction's expiry budget.
    fn started_after(&self, id: RequestId, latest_start: u64) -> bool {
        self.table.get(id).is_some_and(|entry| {
            let dir = entry.request.op.direction().unwrap_or(Direction::Read);
            let start = entry.expires_us.saturating_sub(self.config.expire_us(dir));
            start > latest_start
        })
    }

    /// Next sector-ordered candidate in `dir`, skipping writes to locked
    /// zones.
    fn next_request(&self, tier: Priority, dir: Direction, dev: Device<'_>) -> Option<RequestId> {
        let queue = &self.tiers[tier.index()];
        let key = queue.next(dir)?;
        if !dev.gated(dir) {
            return Some(key.1);
        }

        dev.gate.with_view(|view| {
            let mut cursor = Some(key);
            while let Some(current) = cursor {
                if self.dispatchable(view, dev, current.1) {
                    return Some(current.1);
                }
                cursor = if dev.hooks.is_nonrot() {
                    queue.successor(dir, current)
                } else {
                    self.skip_seq_writes(tier, dir, current)
                };
            }
            None
        })
    }

    /// Oldest candidate in `dir`, skipping writes to locked zones and, on
    /// rotational media, writes that continue another queued write.
    fn fifo_request(&self, tier: Priority, dir: Direction, dev: Device<'_>) -> Option<RequestId> {
        let queue = &self.tiers[tier.index()];
        let front = queue.fifo_front(dir)?;
        if !dev.gated(dir) {
            return Some(front.id);
        }

        dev.gate.with_view(|view| {
            queue
                .fifo_iter(dir)
                .find(|entry| {
                    self.dispatchable(view, dev, entry.id)
                        && (dev.hooks.is_nonrot() || !self.is_seq_write(tier, dir, entry.id))
                })
                .map(|entry| entry.id)
        })
    }

    fn dispatchable(&self, view: &ZoneView<'_>, dev: Device<'_>, id: RequestId) -> bool {
        view.can_dispatch(dev.write_zone(self.table.request(id)))
    }

    /// Whether a queued write ends exactly where `id` starts.
    fn is_seq_write(&self, tier: Priority, dir: Direction, id: RequestId) -> bool {
        let request = self.table.request(id);
        self.tiers[tier.index()]
            .predecessor(dir, (request.sector, id))
            .is_some_and(|(_, prev)| self.table.request(prev).end_sector() == request.sector)
    }

    /// First request after the sequential run starting at `start`, even if
    /// the run crosses zone boundaries.
    fn skip_seq_writes(&self, tier: Priority, dir: Direction, start: SectorKey) -> Option<SectorKey> {
        let queue = &self.tiers[tier.index()];
        let pos = start.0;
        let mut skipped = 0u64;
        let mut cursor = Some(start);
        while let Some(current) = cursor {
            let request = self.table.request(current.1);
            if request.sector != pos + skipped {
                break;
            }
            skipped += u64::from(request.sectors);
            cursor = queue.successor(dir, current);
        }
        cursor
    }

    /// Records a tier dispatch: zone lock, counters and write accounting.
    fn mark_dispatched(&mut self, tier: Priority, id: RequestId, zone: Option<ZoneId>, dev: Device<'_>) {
        if let Some(zone) = zone {
            let locked = dev.gate.try_lock(zone, id);
            assert!(locked, "{id} selected while {zone} is locked");
        }
        self.tiers[tier.index()].note_dispatched();

        let Some(entry) = self.table.get_mut(id) else {
            return;
        };
        let write_units = if entry.request.op.is_write() {
            entry.request.io_units()
        } else {
            0
        };
        entry.location = Location::Dispatched(Dispatched {
            tier: Some(tier),
            write_units,
            zone,
        });
        if write_units > 0 {
            for channel in &self.channels {
                channel.signal().add_write(write_units);
            }
        }
    }
}
