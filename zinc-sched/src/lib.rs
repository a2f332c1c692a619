//! ZINC - deadline I/O scheduling with throttled zone management.
//!
//! This crate decides when, and in which order, requests submitted to a
//! block device are handed to it. It combines:
//!
//! - **Priority tiers**: Realtime, BestEffort and Idle, served strictly in
//!   that order, with aging so old low-priority work is not starved.
//! - **Deadline scheduling**: per-direction sector order for throughput,
//!   fifo expiry for bounded latency, and write starvation control.
//! - **Zone write locking**: at most one write in flight per sequential zone.
//! - **Throttled channels**: zone resets and finishes are admitted once per
//!   epoch against the write traffic they would disturb.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                            Scheduler                               │
//! │                                                                    │
//! │  ┌─────────────── Mutex<SchedulerState> ───────────────┐           │
//! │  │ ┌───────────────┐  ┌──────────────────────────────┐ │ ┌───────┐ │
//! │  │ │ Throttled     │  │ PriorityTierQueue ×3         │ │ │ Zone  │ │
//! │  │ │ Channel ×2    │  │  SectorIndex, FifoQueue ×2   │ │ │ Gate  │ │
//! │  │ │ (Reset,Finish)│  │  override list, counters     │ │ └───────┘ │
//! │  │ └──────▲────────┘  └──────────────────────────────┘ │           │
//! │  └────────┼────────────────────────────────────────────┘           │
//! │     ChannelSignal (atomic fired flag, unit counters)               │
//! └───────────┼────────────────────────────────────────────────────────┘
//!             │
//!      epoch timer / advance_clock
//! ```
//!
//! # DST Compatibility
//!
//! Every operation that depends on time takes `current_time_us`. The tokio
//! timers in [`epoch`] are optional; a simulation drives epochs with
//! [`Scheduler::advance_clock`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use zinc_core::{Request, SchedulerConfig};
//! use zinc_sched::{Scheduler, ZonedDevice};
//!
//! let device = Arc::new(ZonedDevice::new(524_288));
//! let scheduler = Scheduler::new(SchedulerConfig::new(), device, 0);
//!
//! scheduler.insert(Request::write(1, 0, 64), false, 0).unwrap();
//! scheduler.insert(Request::read(2, 4096, 8), false, 0).unwrap();
//!
//! while let Some(request) = scheduler.dispatch(0) {
//!     // Submit to the device, then on completion:
//!     scheduler.complete(request.id);
//! }
//! assert!(!scheduler.has_work());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod epoch;
mod error;
pub mod fifo;
mod hooks;
mod request;
mod scheduler;
pub mod sector_index;
mod selector;
pub mod throttle;
pub mod tier_queue;
pub mod zone_gate;

pub use epoch::{epoch_task, EpochTimers};
pub use error::{SchedError, SchedResult};
pub use hooks::{same_class_merge, ConventionalDevice, DeviceHooks, MergeKind, ZonedDevice};
pub use scheduler::{ChannelSnapshot, Completion, InsertOutcome, Scheduler, SchedulerStats};
pub use throttle::{
    AdmitCase, ChannelPoll, ChannelSignal, ChannelStats, PendingCommand, ThrottledChannel,
};
pub use tier_queue::{PriorityTierQueue, TierStats};
pub use zone_gate::ZoneGate;
