//! Discrete-event simulation of a scheduler attached to a simulated device.
//!
//! Time only moves when the driver says so. Each step completes finished
//! requests, delivers arrivals, advances the channel epochs and then
//! dispatches until the device queue is full or the scheduler has nothing to
//! give. The next step happens at the earliest of the next arrival, the next
//! completion and one tick later.

use std::collections::BTreeMap;
use std::sync::Arc;

use hdrhistogram::Histogram;
use tracing::{debug, info, trace, warn};
use zinc_core::{Op, RequestId, SchedulerConfig};
use zinc_sched::{
    Completion, ConventionalDevice, DeviceHooks, InsertOutcome, Scheduler, SchedulerStats,
    ZonedDevice,
};

use crate::device::{DeviceProfile, SimulatedDevice};
use crate::error::WorkloadResult;
use crate::history::{EventKind, History, HistoryCounts};
use crate::verification::{Verification, Violation};
use crate::workload::Submission;

/// Shape of the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLayout {
    /// No zones.
    Conventional {
        /// Rotational media.
        rotational: bool,
    },
    /// Sequential-write zones.
    Zoned {
        /// Zone size in sectors.
        zone_sectors: u64,
        /// Leading zones that take random writes.
        conventional_zones: u64,
        /// Rotational media.
        rotational: bool,
    },
}

impl DeviceLayout {
    /// Device hooks matching the layout.
    #[must_use]
    pub fn hooks(&self) -> Arc<dyn DeviceHooks> {
        match *self {
            Self::Conventional { rotational } => Arc::new(ConventionalDevice { rotational }),
            Self::Zoned {
                zone_sectors,
                conventional_zones,
                rotational,
            } => {
                let mut device = ZonedDevice::new(zone_sectors).with_conventional_zones(conventional_zones);
                if rotational {
                    device = device.rotational();
                }
                Arc::new(device)
            }
        }
    }
}

/// Simulation configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    /// Scheduler tunables.
    pub scheduler: SchedulerConfig,
    /// Device shape.
    pub layout: DeviceLayout,
    /// Device latency model.
    pub device: DeviceProfile,
    /// Seed for device latencies and bounces.
    pub seed: u64,
    /// Longest step of simulated time.
    pub tick_us: u64,
    /// Give up after this long without a dispatch or completion.
    pub stall_limit_us: u64,
}

impl SimulationConfig {
    /// Creates a configuration for `layout` with default tunables.
    #[must_use]
    pub fn new(layout: DeviceLayout) -> Self {
        let rotational = matches!(
            layout,
            DeviceLayout::Conventional { rotational: true } | DeviceLayout::Zoned { rotational: true, .. }
        );
        Self {
            scheduler: SchedulerConfig::new(),
            layout,
            device: if rotational {
                DeviceProfile::rotational()
            } else {
                DeviceProfile::flash()
            },
            seed: 0,
            tick_us: 1_000,
            stall_limit_us: 10_000_000,
        }
    }

    /// Sets the scheduler tunables.
    #[must_use]
    pub const fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Sets the device latency model.
    #[must_use]
    pub const fn with_device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    /// Sets the device seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Latency percentiles of one request class, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    /// Samples recorded.
    pub count: u64,
    /// Median.
    pub p50_us: u64,
    /// 99th percentile.
    pub p99_us: u64,
    /// Largest sample.
    pub max_us: u64,
}

impl LatencySummary {
    fn from_histogram(histogram: &Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self::default();
        }
        Self {
            count: histogram.len(),
            p50_us: histogram.value_at_quantile(0.5),
            p99_us: histogram.value_at_quantile(0.99),
            max_us: histogram.max(),
        }
    }
}

/// Submission-to-completion latencies per class.
struct Latencies {
    read: Histogram<u64>,
    write: Histogram<u64>,
    command: Histogram<u64>,
}

impl Latencies {
    fn new() -> WorkloadResult<Self> {
        Ok(Self {
            read: Histogram::new(3)?,
            write: Histogram::new(3)?,
            command: Histogram::new(3)?,
        })
    }

    fn record(&mut self, op: Op, latency_us: u64) {
        let histogram = match op {
            Op::Read | Op::Other => &mut self.read,
            Op::Write => &mut self.write,
            Op::Reset | Op::Finish => &mut self.command,
        };
        let _ = histogram.record(latency_us);
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Event totals.
    pub counts: HistoryCounts,
    /// Read latencies.
    pub read_latency: LatencySummary,
    /// Write latencies.
    pub write_latency: LatencySummary,
    /// Zone reset and finish latencies.
    pub command_latency: LatencySummary,
    /// Simulated time at the end of the run.
    pub duration_us: u64,
    /// Scheduler counters at the end of the run.
    pub stats: SchedulerStats,
    /// Violations found.
    pub violations: Vec<Violation>,
}

impl SimulationReport {
    /// Whether the run found no violation.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Prints a human-readable summary.
    pub fn print_summary(&self) {
        let c = &self.counts;
        println!("=== Simulation Statistics ===");
        println!(
            "Requests: {} submitted, {} merged, {} dispatched, {} requeued, {} completed",
            c.submitted, c.merged, c.dispatched, c.requeued, c.completed
        );
        for (name, l) in [
            ("Read", &self.read_latency),
            ("Write", &self.write_latency),
            ("Command", &self.command_latency),
        ] {
            println!(
                "{name} latency: n={} p50={}us p99={}us max={}us",
                l.count, l.p50_us, l.p99_us, l.max_us
            );
        }
        for (i, tier) in self.stats.tiers.iter().enumerate() {
            println!("Tier {i}: {tier:?}");
        }
        for channel in &self.stats.channels {
            println!("Channel: {:?}", channel.stats);
        }
        println!("Duration: {}us simulated", self.duration_us);
        println!("Violations: {}", self.violations.len());
        for v in &self.violations {
            println!("  - {v}");
        }
    }
}

/// A scheduler, its device and the clock that drives them.
pub struct Simulation {
    config: SimulationConfig,
    hooks: Arc<dyn DeviceHooks>,
    scheduler: Scheduler,
    device: SimulatedDevice,
}

impl Simulation {
    /// Attaches a fresh scheduler to a fresh device at time zero.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        let hooks = config.layout.hooks();
        let scheduler = Scheduler::new(config.scheduler, Arc::clone(&hooks), 0);
        let async_depth = scheduler.depth_updated(config.device.queue_depth);
        debug!(
            layout = ?config.layout,
            queue_depth = config.device.queue_depth,
            async_depth,
            "Simulation attached"
        );
        Self {
            device: SimulatedDevice::new(config.device, config.seed),
            config,
            hooks,
            scheduler,
        }
    }

    /// The scheduler under test, for tuning before the run.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Runs `submissions` (ordered by arrival) to completion and verifies
    /// the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler rejects an insert or a histogram
    /// cannot be created.
    #[allow(clippy::too_many_lines)]
    pub fn run(self, submissions: &[Submission]) -> WorkloadResult<SimulationReport> {
        let Self {
            config,
            hooks,
            scheduler,
            mut device,
        } = self;
        let tick_us = config.tick_us.max(1);

        let mut latencies = Latencies::new()?;
        let mut history = History::new();
        let mut violations = Vec::new();
        let mut ops: BTreeMap<RequestId, Op> = BTreeMap::new();

        let mut now = 0u64;
        let mut next = 0usize;
        let mut remaining = 0usize;
        let mut last_progress = 0u64;

        loop {
            for id in device.take_completed(now) {
                history.record(now, EventKind::Completed { id });
                last_progress = now;
                remaining = remaining.saturating_sub(1);
                if let (Some(op), Some(at)) = (ops.remove(&id), history.submitted_at(id)) {
                    latencies.record(op, now - at);
                }
                if scheduler.complete(id) == Completion::Ignored {
                    violations.push(Violation::IgnoredCompletion { id });
                }
            }

            while let Some(sub) = submissions.get(next).filter(|s| s.at_us <= now) {
                next += 1;
                remaining += 1;
                history.record(
                    now,
                    EventKind::Submitted {
                        request: sub.request,
                        at_head: sub.at_head,
                    },
                );
                if let InsertOutcome::Merged { into } = scheduler.insert(sub.request, sub.at_head, now)? {
                    history.record(
                        now,
                        EventKind::Merged {
                            id: sub.request.id,
                            into,
                        },
                    );
                    remaining -= 1;
                }
            }

            for kind in scheduler.advance_clock(now) {
                trace!(channel = %kind, now, "Epoch elapsed");
            }

            while device.has_capacity() {
                let Some(request) = scheduler.dispatch(now) else {
                    break;
                };
                history.record(now, EventKind::Dispatched { request });
                last_progress = now;
                if device.should_requeue() {
                    history.record(now, EventKind::Requeued { id: request.id });
                    scheduler.insert(request, true, now)?;
                    // A bounced device takes nothing more this step.
                    break;
                }
                device.submit(&request, now);
                ops.insert(request.id, request.op);
            }

            if remaining == 0 {
                if next == submissions.len() {
                    break;
                }
                last_progress = now;
            } else if now - last_progress > config.stall_limit_us {
                warn!(now, remaining, "Simulation stalled");
                violations.push(Violation::Stalled {
                    at_us: now,
                    outstanding: remaining,
                });
                break;
            }

            let mut next_time = now + tick_us;
            if let Some(sub) = submissions.get(next) {
                next_time = next_time.min(sub.at_us);
            }
            if let Some(at) = device.next_completion_us() {
                next_time = next_time.min(at);
            }
            now = next_time.max(now + 1);
        }

        let stats = scheduler.stats();
        let stalled = violations
            .iter()
            .any(|v| matches!(v, Violation::Stalled { .. }));
        if !stalled {
            violations.extend(Verification::check_drained(&stats));
        }
        if let Err(e) = scheduler.detach() {
            violations.push(Violation::DetachFailed {
                message: e.to_string(),
            });
        }
        violations.extend(Verification::verify(&history, hooks.as_ref()));

        let report = SimulationReport {
            counts: history.counts(),
            read_latency: LatencySummary::from_histogram(&latencies.read),
            write_latency: LatencySummary::from_histogram(&latencies.write),
            command_latency: LatencySummary::from_histogram(&latencies.command),
            duration_us: now,
            stats,
            violations,
        };
        info!(
            submitted = report.counts.submitted,
            completed = report.counts.completed,
            duration_us = now,
            violations = report.violations.len(),
            "Simulation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{OpMix, Workload};

    fn zoned(rotational: bool) -> DeviceLayout {
        DeviceLayout::Zoned {
            zone_sectors: 4096,
            conventional_zones: 0,
            rotational,
        }
    }

    fn workload(seed: u64, operations: u64) -> Vec<Submission> {
        Workload::builder()
            .seed(seed)
            .operations(operations)
            .zones(8, 4096)
            .build()
            .generate()
    }

    #[test]
    fn test_zoned_flash_run_is_clean() {
        let submissions = workload(1, 500);
        let report = Simulation::new(SimulationConfig::new(zoned(false)))
            .run(&submissions)
            .unwrap();

        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.counts.submitted, 500);
        assert_eq!(report.counts.completed + report.counts.merged, 500);
        assert_eq!(report.stats.locked_zones, 0);
        assert_eq!(report.stats.in_flight, 0);
    }

    #[test]
    fn test_zoned_rotational_run_is_clean() {
        let submissions = workload(2, 300);
        let report = Simulation::new(SimulationConfig::new(zoned(true)))
            .run(&submissions)
            .unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert!(report.command_latency.count > 0);
    }

    #[test]
    fn test_conventional_run_is_clean() {
        let submissions = Workload::builder()
            .seed(3)
            .operations(400)
            .zones(8, 4096)
            .mix(OpMix::READ_WRITE)
            .build()
            .generate();
        let layout = DeviceLayout::Conventional { rotational: false };
        let report = Simulation::new(SimulationConfig::new(layout))
            .run(&submissions)
            .unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.command_latency.count, 0);
    }

    #[test]
    fn test_requeues_are_survived() {
        let submissions = workload(4, 300);
        let config = SimulationConfig::new(zoned(false))
            .with_device(DeviceProfile::flash().with_requeue_ratio(0.1))
            .with_seed(4);
        let report = Simulation::new(config).run(&submissions).unwrap();

        assert!(report.is_clean(), "{:?}", report.violations);
        assert!(report.counts.requeued > 0);
        assert_eq!(
            report.counts.dispatched,
            report.counts.completed + report.counts.requeued
        );
    }

    #[test]
    fn test_same_seed_same_report() {
        let submissions = workload(5, 200);
        let a = Simulation::new(SimulationConfig::new(zoned(false)).with_seed(9))
            .run(&submissions)
            .unwrap();
        let b = Simulation::new(SimulationConfig::new(zoned(false)).with_seed(9))
            .run(&submissions)
            .unwrap();
        assert_eq!(a.counts, b.counts);
        assert_eq!(a.duration_us, b.duration_us);
        assert_eq!(a.write_latency, b.write_latency);
    }
}
