//! ZINC Workload: deterministic simulation for the ZINC scheduler
//!
//! Drives a [`zinc_sched::Scheduler`] with generated traffic against a
//! simulated device and checks the run afterwards:
//!
//! 1. **Correctness verification** - zone conflicts, lost or doubly
//!    dispatched requests, counters that do not balance
//! 2. **Latency measurement** - per-class percentiles from submission to
//!    completion
//!
//! # Architecture
//!
//! A [`Workload`] turns a seed into a timed list of [`Submission`]s. A
//! [`Simulation`] owns the scheduler, a [`SimulatedDevice`] and a virtual
//! clock; it records every step into a [`History`] that [`Verification`]
//! replays. Nothing reads the wall clock, so a seed reproduces a run exactly.
//!
//! # Example
//!
//! ```
//! use zinc_workload::{DeviceLayout, Simulation, SimulationConfig, Workload};
//!
//! let submissions = Workload::builder()
//!     .seed(42)
//!     .operations(200)
//!     .zones(4, 8192)
//!     .build()
//!     .generate();
//!
//! let layout = DeviceLayout::Zoned {
//!     zone_sectors: 8192,
//!     conventional_zones: 0,
//!     rotational: false,
//! };
//! let report = Simulation::new(SimulationConfig::new(layout))
//!     .run(&submissions)
//!     .unwrap();
//!
//! assert!(report.violations.is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod device;
mod error;
mod history;
mod simulation;
mod verification;
mod workload;

pub use device::{DeviceProfile, SimulatedDevice};
pub use error::{WorkloadError, WorkloadResult};
pub use history::{Event, EventKind, History, HistoryCounts};
pub use simulation::{DeviceLayout, LatencySummary, Simulation, SimulationConfig, SimulationReport};
pub use verification::{Verification, Violation};
pub use workload::{OpMix, Submission, Workload, WorkloadBuilder, WorkloadConfig};
