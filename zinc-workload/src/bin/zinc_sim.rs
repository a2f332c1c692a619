//! ZINC scheduler simulator.
//!
//! Runs a seeded workload through the scheduler against a simulated device
//! and reports latencies and any violated invariant. Exits non-zero when a
//! violation was found.
//!
//! ```bash
//! # Zoned flash, defaults
//! zinc-sim --seed 7 --operations 20000
//!
//! # Shingled disk with a tighter reset budget
//! zinc-sim --device zoned-rotational --set reset_epoch_tokens=200 --set reset_epoch_holds=1
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use zinc_workload::{DeviceLayout, OpMix, Simulation, SimulationConfig, Workload};

/// Device to simulate.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum DeviceKind {
    /// Zoned flash.
    #[default]
    ZonedFlash,
    /// Zoned shingled disk.
    ZonedRotational,
    /// Conventional flash.
    Flash,
    /// Conventional disk.
    Rotational,
}

impl DeviceKind {
    const fn layout(self, zone_sectors: u64, conventional_zones: u64) -> DeviceLayout {
        match self {
            Self::ZonedFlash => DeviceLayout::Zoned {
                zone_sectors,
                conventional_zones,
                rotational: false,
            },
            Self::ZonedRotational => DeviceLayout::Zoned {
                zone_sectors,
                conventional_zones,
                rotational: true,
            },
            Self::Flash => DeviceLayout::Conventional { rotational: false },
            Self::Rotational => DeviceLayout::Conventional { rotational: true },
        }
    }

    const fn is_zoned(self) -> bool {
        matches!(self, Self::ZonedFlash | Self::ZonedRotational)
    }
}

/// ZINC scheduler simulator.
#[derive(Parser, Debug)]
#[command(name = "zinc-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workload and device seed.
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Number of requests to submit.
    #[arg(long, default_value = "10000")]
    operations: u64,

    /// Device to simulate.
    #[arg(long, value_enum, default_value = "zoned-flash")]
    device: DeviceKind,

    /// Number of zones in the address space.
    #[arg(long, default_value = "64")]
    zones: u64,

    /// Zone size in sectors.
    #[arg(long, default_value = "524288")]
    zone_sectors: u64,

    /// Leading zones that take random writes.
    #[arg(long, default_value = "0")]
    conventional_zones: u64,

    /// Device queue depth (defaults to the device profile's).
    #[arg(long)]
    queue_depth: Option<u32>,

    /// Probability that the device bounces a request back.
    #[arg(long, default_value = "0.0")]
    requeue_ratio: f64,

    /// Scheduler attribute in format `name=value` (e.g. `fifo_batch=8`).
    /// Can be specified multiple times.
    #[arg(long = "set", value_parser = parse_attribute)]
    attributes: Vec<(String, String)>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

/// Parses an attribute in format `name=value`.
fn parse_attribute(s: &str) -> Result<(String, String), String> {
    let Some((name, value)) = s.split_once('=') else {
        return Err(format!("invalid attribute '{s}', expected 'name=value'"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err("attribute name cannot be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {e}");
        return ExitCode::FAILURE;
    }

    let layout = args.device.layout(args.zone_sectors, args.conventional_zones);
    let mut config = SimulationConfig::new(layout).with_seed(args.seed);
    if let Some(depth) = args.queue_depth {
        config.device = config.device.with_queue_depth(depth);
    }
    config.device = config.device.with_requeue_ratio(args.requeue_ratio);

    let simulation = Simulation::new(config);
    for (name, value) in &args.attributes {
        match simulation.scheduler().set_attribute(name, value) {
            Ok(applied) => info!(attribute = %name, value = applied, "Attribute set"),
            Err(e) => {
                error!(attribute = %name, error = %e, "Invalid attribute");
                return ExitCode::FAILURE;
            }
        }
    }

    let mix = if args.device.is_zoned() {
        OpMix::default()
    } else {
        OpMix::READ_WRITE
    };
    let max_sectors = 256u32;
    if args.zones == 0 || args.zone_sectors < u64::from(max_sectors) {
        error!(zones = args.zones, zone_sectors = args.zone_sectors, "Address space too small");
        return ExitCode::FAILURE;
    }
    let submissions = Workload::builder()
        .seed(args.seed)
        .operations(args.operations)
        .zones(args.zones, args.zone_sectors)
        .max_sectors(max_sectors)
        .mix(mix)
        .build()
        .generate();

    info!(
        seed = args.seed,
        operations = args.operations,
        device = ?args.device,
        "Starting simulation"
    );
    let report = match simulation.run(&submissions) {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Simulation aborted");
            return ExitCode::FAILURE;
        }
    };
    report.print_summary();

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
