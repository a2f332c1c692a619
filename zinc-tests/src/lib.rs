//! ZINC Tests - scenario, property and simulation tests for the ZINC
//! scheduler.
//!
//! ## Test Organization
//!
//! **DST Tests** (`*_dst.rs`): deterministic whole-system simulation
//! - `simulation_dst`: generated workloads on simulated zoned and
//!   conventional devices, verified from the recorded history
//!
//! **Scenario Tests** (`*_tests.rs`): hand-traced scheduler behavior
//! - `dispatch_tests`: sector order, deadlines, starvation, batching, aging
//! - `zone_tests`: zone write locking and sequential streams
//! - `channel_tests`: throttled reset and finish channels, epoch timers
//! - `concurrency_tests`: zoned writes from several host threads at once
//!
//! **Support Modules**:
//! - `properties`: invariants checked after every scheduler call
//! - `scenarios`: the `Harness` host, standard configurations and seeds
//!
//! ## Naming Conventions
//!
//! - DST tests: `test_dst_<scenario>`
//! - Scenario tests: `test_<behavior>`
//! - Unit tests: inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;

// DST test modules.
#[cfg(test)]
mod simulation_dst;

// Scenario test modules.
#[cfg(test)]
mod channel_tests;
