//! Whole-system simulation sweeps.
//!
//! Each run feeds a generated workload through a scheduler attached to a
//! simulated device and verifies the recorded history: zone exclusivity,
//! request lifecycles and a drained scheduler at the end.

#![allow(clippy::unreadable_literal)] // Large seed numbers are fine without separators

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use zinc_core::{ChannelConfig, ChannelKind, SchedulerConfig};
use zinc_workload::{
    DeviceLayout, DeviceProfile, OpMix, Simulation, SimulationConfig, SimulationReport, Submission,
    Workload,
};

use crate::scenarios::seeds;

const ZONE_SECTORS: u64 = 8192;
const OPERATIONS: u64 = 400;

fn zoned(rotational: bool) -> DeviceLayout {
    DeviceLayout::Zoned {
        zone_sectors: ZONE_SECTORS,
        conventional_zones: 0,
        rotational,
    }
}

fn submissions(seed: u64, mix: OpMix) -> Vec<Submission> {
    Workload::builder()
        .seed(seed)
        .operations(OPERATIONS)
        .zones(12, ZONE_SECTORS)
        .mix(mix)
        .build()
        .generate()
}

fn run(config: SimulationConfig, submissions: &[Submission]) -> SimulationReport {
    Simulation::new(config).run(submissions).unwrap()
}

fn assert_clean(report: &SimulationReport, label: &str, seed: u64) {
    assert!(
        report.is_clean(),
        "{label} seed {seed}: {}",
        report
            .violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    );
    assert_eq!(
        report.counts.completed + report.counts.merged,
        report.counts.submitted,
        "{label} seed {seed}"
    );
    assert_eq!(report.stats.in_flight, 0, "{label} seed {seed}");
    assert_eq!(report.stats.locked_zones, 0, "{label} seed {seed}");
}

#[test]
fn test_dst_zoned_flash() {
    for &seed in seeds::REGRESSION_SEEDS {
        let report = run(
            SimulationConfig::new(zoned(false)).with_seed(seed),
            &submissions(seed, OpMix::default()),
        );
        assert_clean(&report, "zoned flash", seed);
    }
}

#[test]
fn test_dst_zoned_rotational() {
    for &seed in seeds::REGRESSION_SEEDS {
        let report = run(
            SimulationConfig::new(zoned(true)).with_seed(seed),
            &submissions(seed, OpMix::default()),
        );
        assert_clean(&report, "zoned rotational", seed);
    }
}

#[test]
fn test_dst_conventional_zones_mixed_in() {
    let layout = DeviceLayout::Zoned {
        zone_sectors: ZONE_SECTORS,
        conventional_zones: 4,
        rotational: false,
    };
    for &seed in seeds::REGRESSION_SEEDS {
        let report = run(
            SimulationConfig::new(layout).with_seed(seed),
            &submissions(seed, OpMix::default()),
        );
        assert_clean(&report, "partly conventional", seed);
    }
}

#[test]
fn test_dst_conventional_device() {
    for rotational in [false, true] {
        let layout = DeviceLayout::Conventional { rotational };
        for &seed in seeds::REGRESSION_SEEDS {
            let report = run(
                SimulationConfig::new(layout).with_seed(seed),
                &submissions(seed, OpMix::READ_WRITE),
            );
            assert_clean(&report, "conventional", seed);
            assert_eq!(report.command_latency.count, 0);
        }
    }
}

#[test]
fn test_dst_requeue_storm() {
    for &seed in seeds::REGRESSION_SEEDS {
        let device = DeviceProfile::flash()
            .with_queue_depth(8)
            .with_requeue_ratio(0.25);
        let report = run(
            SimulationConfig::new(zoned(false))
                .with_device(device)
                .with_seed(seed),
            &submissions(seed, OpMix::default()),
        );
        assert_clean(&report, "requeue storm", seed);
        assert_eq!(
            report.counts.dispatched,
            report.counts.completed + report.counts.requeued,
            "seed {seed}"
        );
    }
}

#[test]
fn test_dst_extreme_tunables() {
    let tight_channel = ChannelConfig::default()
        .with_epoch_interval_us(1_000)
        .with_command_tokens(1)
        .with_minimum_concurrency(0)
        .with_maximum_epoch_holds(0);
    let configs = [
        (
            "unbatched",
            SchedulerConfig::new().with_fifo_batch(1).with_writes_starved(0),
        ),
        (
            "short deadlines",
            SchedulerConfig::new()
                .with_read_expire_us(1)
                .with_write_expire_us(1)
                .with_prio_aging_expire_us(1),
        ),
        (
            "no front merges",
            SchedulerConfig::new().with_front_merges(false),
        ),
        (
            "eager channels",
            SchedulerConfig::new()
                .with_channel(ChannelKind::Reset, tight_channel)
                .with_channel(ChannelKind::Finish, tight_channel),
        ),
    ];

    for (label, scheduler) in configs {
        for &seed in seeds::REGRESSION_SEEDS {
            let report = run(
                SimulationConfig::new(zoned(false))
                    .with_scheduler(scheduler)
                    .with_seed(seed),
                &submissions(seed, OpMix::default()),
            );
            assert_clean(&report, label, seed);
        }
    }
}

#[test]
fn test_dst_attributes_applied_before_run() {
    let seed = 0x5EED;
    let simulation = Simulation::new(SimulationConfig::new(zoned(true)).with_seed(seed));
    simulation.scheduler().set_attribute("fifo_batch", "4").unwrap();
    simulation
        .scheduler()
        .set_attribute("reset_epoch_interval", "20")
        .unwrap();
    let report = simulation
        .run(&submissions(seed, OpMix::default()))
        .unwrap();
    assert_clean(&report, "attributes", seed);
}

#[test]
fn test_dst_random_seeds() {
    let mut seeder = ChaCha8Rng::seed_from_u64(0xC0FFEE);
    for _ in 0..seeds::CI_SEED_COUNT {
        let seed: u64 = seeder.gen();
        let rotational = seeder.gen_bool(0.5);
        let report = run(
            SimulationConfig::new(zoned(rotational)).with_seed(seed),
            &submissions(seed, OpMix::default()),
        );
        assert_clean(&report, "random", seed);
    }
}

#[test]
fn test_dst_same_seed_same_history() {
    let seed = seeds::REGRESSION_SEEDS[0];
    let workload = submissions(seed, OpMix::default());
    let a = run(SimulationConfig::new(zoned(true)).with_seed(seed), &workload);
    let b = run(SimulationConfig::new(zoned(true)).with_seed(seed), &workload);
    assert_eq!(a.counts, b.counts);
    assert_eq!(a.duration_us, b.duration_us);
    assert_eq!(a.stats, b.stats);
}
