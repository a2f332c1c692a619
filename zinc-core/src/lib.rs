//! Zinc Core - Strongly-typed requests and configuration for the ZINC scheduler.
//!
//! This crate provides the vocabulary shared by the scheduler, the workload
//! simulator and the tests. It does NOT schedule anything; see `zinc-sched`.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `RequestId` with a `ZoneId`
//! - **Explicit ranges**: Every tunable has a bounded valid range
//! - **Explicit time**: Durations are microseconds in `u64`, passed in by the caller
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod types;

pub use config::{async_depth_for, ChannelConfig, SchedulerConfig, Tunable, DEFAULT_NR_REQUESTS};
pub use error::{Error, Result};
pub use types::{
    ChannelKind, Direction, Op, Priority, Request, RequestId, Route, Sector, ZoneId,
    IO_UNIT_SECTOR_SHIFT,
};
