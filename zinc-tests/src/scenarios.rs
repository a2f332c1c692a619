//! Reusable test scenarios for scheduler tests.
//!
//! [`Harness`] plays the host: it owns a scheduler on a virtual clock,
//! remembers what it dispatched, and checks every property after each call
//! that changes state.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;
use zinc_core::{ChannelKind, Request, RequestId, SchedulerConfig};
use zinc_sched::{
    Completion, ConventionalDevice, DeviceHooks, InsertOutcome, SchedResult, Scheduler,
    ZonedDevice,
};

use crate::properties::{check_all, PropertyViolation};

/// Standard scheduler configurations.
pub mod configs {
    use zinc_core::{ChannelConfig, ChannelKind, SchedulerConfig};

    /// Three reads and a write with `writes_starved` of 2.
    #[must_use]
    pub fn starvation() -> SchedulerConfig {
        SchedulerConfig::new().with_writes_starved(2)
    }

    /// One request per batch, so every dispatch re-chooses its direction.
    #[must_use]
    pub fn unbatched() -> SchedulerConfig {
        SchedulerConfig::new().with_fifo_batch(1)
    }

    /// Both channels with the given concurrency threshold and hold limit,
    /// default tokens and interval.
    #[must_use]
    pub fn channels(minimum_concurrency: u64, holds: u32) -> SchedulerConfig {
        let channel = ChannelConfig::default()
            .with_minimum_concurrency(minimum_concurrency)
            .with_maximum_epoch_holds(holds);
        SchedulerConfig::new()
            .with_channel(ChannelKind::Reset, channel)
            .with_channel(ChannelKind::Finish, channel)
    }
}

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];

    /// Number of random seeds to test in CI.
    pub const CI_SEED_COUNT: u32 = 20;
}

/// A host driving one scheduler.
pub struct Harness {
    scheduler: Scheduler,
    hooks: Arc<dyn DeviceHooks>,
    now_us: u64,
    in_flight: BTreeMap<RequestId, Request>,
    restarts: u64,
}

impl Harness {
    /// Attaches a scheduler with `config` to a device described by `hooks`.
    #[must_use]
    pub fn new(config: SchedulerConfig, hooks: Arc<dyn DeviceHooks>) -> Self {
        Self {
            scheduler: Scheduler::new(config, Arc::clone(&hooks), 0),
            hooks,
            now_us: 0,
            in_flight: BTreeMap::new(),
            restarts: 0,
        }
    }

    /// A non-rotational device without zones.
    #[must_use]
    pub fn conventional(config: SchedulerConfig) -> Self {
        Self::new(config, Arc::new(ConventionalDevice::default()))
    }

    /// A zoned flash device.
    #[must_use]
    pub fn zoned(config: SchedulerConfig, zone_sectors: u64) -> Self {
        Self::new(config, Arc::new(ZonedDevice::new(zone_sectors)))
    }

    /// A zoned shingled disk.
    #[must_use]
    pub fn zoned_rotational(config: SchedulerConfig, zone_sectors: u64) -> Self {
        Self::new(config, Arc::new(ZonedDevice::new(zone_sectors).rotational()))
    }

    /// The scheduler under test.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Current virtual time.
    #[must_use]
    pub const fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Completions that asked for another dispatch round.
    #[must_use]
    pub const fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Requests the host holds in flight.
    pub fn in_flight(&self) -> impl Iterator<Item = &Request> + Clone + '_ {
        self.in_flight.values()
    }

    /// Moves the clock forward and fires due epochs.
    pub fn advance(&mut self, us: u64) -> Vec<ChannelKind> {
        self.now_us += us;
        self.scheduler.advance_clock(self.now_us)
    }

    /// Inserts a request now.
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error for a duplicate id.
    pub fn insert(&mut self, request: Request, at_head: bool) -> SchedResult<InsertOutcome> {
        self.scheduler.insert(request, at_head, self.now_us)
    }

    /// Inserts every request as a tail insert.
    ///
    /// # Errors
    ///
    /// Returns the first scheduler error.
    pub fn insert_all(&mut self, requests: impl IntoIterator<Item = Request>) -> SchedResult<()> {
        for request in requests {
            self.insert(request, false)?;
        }
        Ok(())
    }

    /// Dispatches one request and holds it in flight.
    pub fn dispatch(&mut self) -> Option<Request> {
        let request = self.scheduler.dispatch(self.now_us)?;
        trace!(id = %request.id, now = self.now_us, "Harness dispatched");
        self.in_flight.insert(request.id, request);
        Some(request)
    }

    /// Dispatches until the scheduler returns nothing; returns the raw ids.
    pub fn dispatch_all(&mut self) -> Vec<u64> {
        std::iter::from_fn(|| self.dispatch())
            .map(|request| request.id.get())
            .collect()
    }

    /// Completes a request.
    pub fn complete(&mut self, id: RequestId) -> Completion {
        self.in_flight.remove(&id);
        let completion = self.scheduler.complete(id);
        if matches!(
            completion,
            Completion::Retired {
                restart_dispatch: true
            }
        ) {
            self.restarts += 1;
        }
        completion
    }

    /// Completes everything in flight, oldest id first.
    pub fn complete_all(&mut self) {
        let ids: Vec<RequestId> = self.in_flight.keys().copied().collect();
        for id in ids {
            self.complete(id);
        }
    }

    /// Dispatches and completes until nothing is left, advancing the clock
    /// by one epoch whenever work remains. Returns the raw ids in dispatch
    /// order. Gives up after `max_rounds` rounds.
    pub fn run_to_idle(&mut self, max_rounds: usize) -> Vec<u64> {
        let config = self.scheduler.config();
        let epoch_us = config
            .channel(ChannelKind::Reset)
            .epoch_interval_us
            .min(config.channel(ChannelKind::Finish).epoch_interval_us);

        let mut order = Vec::new();
        for _ in 0..max_rounds {
            let batch = self.dispatch_all();
            let idle = batch.is_empty() && self.in_flight.is_empty();
            order.extend(batch);
            if idle && !self.scheduler.has_work() {
                break;
            }
            self.complete_all();
            if self.scheduler.has_work() {
                self.advance(epoch_us);
            }
        }
        order
    }

    /// Checks every property against the current state.
    #[must_use]
    pub fn check(&self) -> Vec<PropertyViolation> {
        check_all(
            self.in_flight.values(),
            self.hooks.as_ref(),
            &self.scheduler.stats(),
            &self.scheduler.config(),
        )
    }

    /// Detaches the scheduler.
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error if work is outstanding.
    pub fn detach(self) -> SchedResult<()> {
        self.scheduler.detach()
    }
}
