//! Scheduler configuration and runtime tunables.
//!
//! Following `TigerStyle`: every parameter has an explicit valid range.
//! Unlike validation-style limits, tunables are clamped into their range so
//! that a host writing a bad value always ends up with a usable scheduler.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{ChannelKind, Direction};

/// Microseconds per millisecond (host-facing time tunables are in ms).
const US_PER_MS: u64 = 1_000;

/// Request-slot count assumed before the host reports its queue depth.
pub const DEFAULT_NR_REQUESTS: u32 = 256;

/// Admission parameters of one throttled channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Epoch length in microseconds. Never zero.
    pub epoch_interval_us: u64,
    /// Write units that may pass per epoch before a held command is forced.
    pub command_tokens: u64,
    /// In-flight write units below which commands are admitted immediately.
    pub minimum_concurrency: u64,
    /// Failed admissions after which the head command is forced through.
    pub maximum_epoch_holds: u32,
}

impl ChannelConfig {
    /// Creates a channel configuration.
    #[must_use]
    pub const fn new(
        epoch_interval_us: u64,
        command_tokens: u64,
        minimum_concurrency: u64,
        maximum_epoch_holds: u32,
    ) -> Self {
        Self {
            epoch_interval_us,
            command_tokens,
            minimum_concurrency,
            maximum_epoch_holds,
        }
    }

    /// Sets the epoch interval.
    #[must_use]
    pub const fn with_epoch_interval_us(mut self, interval_us: u64) -> Self {
        self.epoch_interval_us = interval_us;
        self
    }

    /// Sets the token budget.
    #[must_use]
    pub const fn with_command_tokens(mut self, tokens: u64) -> Self {
        self.command_tokens = tokens;
        self
    }

    /// Sets the minimum-concurrency threshold.
    #[must_use]
    pub const fn with_minimum_concurrency(mut self, units: u64) -> Self {
        self.minimum_concurrency = units;
        self
    }

    /// Sets the maximum deferral count.
    #[must_use]
    pub const fn with_maximum_epoch_holds(mut self, holds: u32) -> Self {
        self.maximum_epoch_holds = holds;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        // 64ms epochs, 2000 units (~16 MiB) of writes, 3 units, 3 holds.
        Self::new(64 * US_PER_MS, 2000, 3, 3)
    }
}

/// Configuration of a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Soft deadline for reads, microseconds.
    pub read_expire_us: u64,
    /// Soft deadline for writes, microseconds.
    pub write_expire_us: u64,
    /// Age after which lower-tier work is served ahead of higher tiers.
    pub prio_aging_expire_us: u64,
    /// Read-favouring selections tolerated while a write waits.
    pub writes_starved: i32,
    /// Whether front merges are attempted.
    pub front_merges: bool,
    /// Consecutive same-direction dispatches treated as one batch.
    pub fifo_batch: u32,
    /// Admission depth for asynchronous requests and writes.
    pub async_depth: u32,
    /// Reset channel.
    pub reset: ChannelConfig,
    /// Finish channel.
    pub finish: ChannelConfig,
}

impl SchedulerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Reads 500ms, writes 5s, aging 10s.
            read_expire_us: 500 * US_PER_MS,
            write_expire_us: 5_000 * US_PER_MS,
            prio_aging_expire_us: 10_000 * US_PER_MS,
            writes_starved: 2,
            front_merges: true,
            fifo_batch: 16,
            async_depth: async_depth_for(DEFAULT_NR_REQUESTS),
            reset: ChannelConfig::default(),
            finish: ChannelConfig::default(),
        }
    }

    /// Creates a configuration for testing.
    ///
    /// Channels use a one-unit concurrency threshold and a small token budget
    /// so each admission case is easy to reach.
    #[must_use]
    pub fn for_testing() -> Self {
        let channel = ChannelConfig::new(10 * US_PER_MS, 100, 1, 3);
        Self {
            reset: channel,
            finish: channel,
            ..Self::new()
        }
    }

    /// Sets the read expiry.
    #[must_use]
    pub const fn with_read_expire_us(mut self, us: u64) -> Self {
        self.read_expire_us = us;
        self
    }

    /// Sets the write expiry.
    #[must_use]
    pub const fn with_write_expire_us(mut self, us: u64) -> Self {
        self.write_expire_us = us;
        self
    }

    /// Sets the priority aging expiry.
    #[must_use]
    pub const fn with_prio_aging_expire_us(mut self, us: u64) -> Self {
        self.prio_aging_expire_us = us;
        self
    }

    /// Sets the writes-starved threshold.
    #[must_use]
    pub const fn with_writes_starved(mut self, count: i32) -> Self {
        self.writes_starved = count;
        self
    }

    /// Sets the fifo batch size.
    #[must_use]
    pub const fn with_fifo_batch(mut self, count: u32) -> Self {
        self.fifo_batch = count;
        self
    }

    /// Enables or disables front merges.
    #[must_use]
    pub const fn with_front_merges(mut self, enabled: bool) -> Self {
        self.front_merges = enabled;
        self
    }

    /// Replaces the configuration of one channel.
    #[must_use]
    pub const fn with_channel(mut self, kind: ChannelKind, channel: ChannelConfig) -> Self {
        match kind {
            ChannelKind::Reset => self.reset = channel,
            ChannelKind::Finish => self.finish = channel,
        }
        self
    }

    /// Returns the expiry budget for a direction.
    #[must_use]
    pub const fn expire_us(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Read => self.read_expire_us,
            Direction::Write => self.write_expire_us,
        }
    }

    /// Returns the configuration of one channel.
    #[must_use]
    pub const fn channel(&self, kind: ChannelKind) -> &ChannelConfig {
        match kind {
            ChannelKind::Reset => &self.reset,
            ChannelKind::Finish => &self.finish,
        }
    }

    fn channel_mut(&mut self, kind: ChannelKind) -> &mut ChannelConfig {
        match kind {
            ChannelKind::Reset => &mut self.reset,
            ChannelKind::Finish => &mut self.finish,
        }
    }

    /// Reads a tunable in host units (milliseconds for durations).
    #[must_use]
    pub fn get(&self, tunable: Tunable) -> i64 {
        match tunable {
            Tunable::ReadExpire => us_to_ms(self.read_expire_us),
            Tunable::WriteExpire => us_to_ms(self.write_expire_us),
            Tunable::PrioAgingExpire => us_to_ms(self.prio_aging_expire_us),
            Tunable::WritesStarved => i64::from(self.writes_starved),
            Tunable::FrontMerges => i64::from(self.front_merges),
            Tunable::AsyncDepth => i64::from(self.async_depth),
            Tunable::FifoBatch => i64::from(self.fifo_batch),
            Tunable::EpochInterval(kind) => us_to_ms(self.channel(kind).epoch_interval_us),
            Tunable::CommandTokens(kind) => saturating_i64(self.channel(kind).command_tokens),
            Tunable::MinimumConcurrency(kind) => {
                saturating_i64(self.channel(kind).minimum_concurrency)
            }
            Tunable::MaximumEpochHolds(kind) => {
                i64::from(self.channel(kind).maximum_epoch_holds)
            }
        }
    }

    /// Writes a tunable in host units, clamping it into its valid range.
    ///
    /// Returns the value actually stored.
    pub fn set(&mut self, tunable: Tunable, value: i64) -> i64 {
        let (min, max) = tunable.range();
        let value = value.clamp(min, max);
        // Every range lies within [i32::MIN, i32::MAX], so the narrowing
        // conversions below cannot fail after the clamp.
        let as_u64 = u64::try_from(value).unwrap_or(0);
        let as_u32 = u32::try_from(value).unwrap_or(0);
        match tunable {
            Tunable::ReadExpire => self.read_expire_us = as_u64 * US_PER_MS,
            Tunable::WriteExpire => self.write_expire_us = as_u64 * US_PER_MS,
            Tunable::PrioAgingExpire => self.prio_aging_expire_us = as_u64 * US_PER_MS,
            Tunable::WritesStarved => self.writes_starved = i32::try_from(value).unwrap_or(0),
            Tunable::FrontMerges => self.front_merges = value != 0,
            Tunable::AsyncDepth => self.async_depth = as_u32,
            Tunable::FifoBatch => self.fifo_batch = as_u32,
            Tunable::EpochInterval(kind) => {
                self.channel_mut(kind).epoch_interval_us = as_u64 * US_PER_MS;
            }
            Tunable::CommandTokens(kind) => self.channel_mut(kind).command_tokens = as_u64,
            Tunable::MinimumConcurrency(kind) => {
                self.channel_mut(kind).minimum_concurrency = as_u64;
            }
            Tunable::MaximumEpochHolds(kind) => {
                self.channel_mut(kind).maximum_epoch_holds = as_u32;
            }
        }
        value
    }

    /// Parses `value` and sets the tunable named `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unknown or the value is not an integer.
    pub fn set_attribute(&mut self, name: &str, value: &str) -> Result<i64> {
        let tunable: Tunable = name.parse()?;
        let parsed = value
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::InvalidValue {
                tunable: tunable.name(),
                value: value.to_string(),
            })?;
        Ok(self.set(tunable, parsed))
    }

    /// Returns a copy with every tunable clamped into its valid range.
    ///
    /// Durations keep their microsecond precision; only their bounds are
    /// scaled from host milliseconds.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        for tunable in Tunable::ALL {
            if tunable.is_duration() {
                let (min, max) = tunable.range();
                if let Some(us) = self.duration_us_mut(tunable) {
                    *us = (*us).clamp(ms_to_us(min), ms_to_us(max));
                }
            } else {
                let value = self.get(tunable);
                self.set(tunable, value);
            }
        }
        self
    }

    fn duration_us_mut(&mut self, tunable: Tunable) -> Option<&mut u64> {
        match tunable {
            Tunable::ReadExpire => Some(&mut self.read_expire_us),
            Tunable::WriteExpire => Some(&mut self.write_expire_us),
            Tunable::PrioAgingExpire => Some(&mut self.prio_aging_expire_us),
            Tunable::EpochInterval(kind) => Some(&mut self.channel_mut(kind).epoch_interval_us),
            Tunable::WritesStarved
            | Tunable::FrontMerges
            | Tunable::AsyncDepth
            | Tunable::FifoBatch
            | Tunable::CommandTokens(_)
            | Tunable::MinimumConcurrency(_)
            | Tunable::MaximumEpochHolds(_) => None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Admission depth reserved for async requests and writes: three quarters of
/// the request slots, at least one.
#[must_use]
pub fn async_depth_for(nr_requests: u32) -> u32 {
    let depth = u64::from(nr_requests) * 3 / 4;
    u32::try_from(depth).unwrap_or(u32::MAX).max(1)
}

fn ms_to_us(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or(0).saturating_mul(US_PER_MS)
}

fn us_to_ms(us: u64) -> i64 {
    saturating_i64(us / US_PER_MS)
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// A runtime-tunable scheduler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tunable {
    /// `read_expire` (ms).
    ReadExpire,
    /// `write_expire` (ms).
    WriteExpire,
    /// `prio_aging_expire` (ms).
    PrioAgingExpire,
    /// `writes_starved`.
    WritesStarved,
    /// `front_merges` (0 or 1).
    FrontMerges,
    /// `async_depth`.
    AsyncDepth,
    /// `fifo_batch`.
    FifoBatch,
    /// `<channel>_epoch_interval` (ms).
    EpochInterval(ChannelKind),
    /// `<channel>_command_tokens`.
    CommandTokens(ChannelKind),
    /// `<channel>_minimum_concurrency_threshold`.
    MinimumConcurrency(ChannelKind),
    /// `<channel>_maximum_epoch_holds`.
    MaximumEpochHolds(ChannelKind),
}

impl Tunable {
    /// Every tunable, in attribute listing order.
    pub const ALL: [Self; 15] = [
        Self::ReadExpire,
        Self::WriteExpire,
        Self::WritesStarved,
        Self::FrontMerges,
        Self::AsyncDepth,
        Self::FifoBatch,
        Self::PrioAgingExpire,
        Self::MaximumEpochHolds(ChannelKind::Reset),
        Self::CommandTokens(ChannelKind::Reset),
        Self::EpochInterval(ChannelKind::Reset),
        Self::MinimumConcurrency(ChannelKind::Reset),
        Self::MaximumEpochHolds(ChannelKind::Finish),
        Self::CommandTokens(ChannelKind::Finish),
        Self::EpochInterval(ChannelKind::Finish),
        Self::MinimumConcurrency(ChannelKind::Finish),
    ];

    /// Attribute name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReadExpire => "read_expire",
            Self::WriteExpire => "write_expire",
            Self::PrioAgingExpire => "prio_aging_expire",
            Self::WritesStarved => "writes_starved",
            Self::FrontMerges => "front_merges",
            Self::AsyncDepth => "async_depth",
            Self::FifoBatch => "fifo_batch",
            Self::EpochInterval(ChannelKind::Reset) => "reset_epoch_interval",
            Self::EpochInterval(ChannelKind::Finish) => "finish_epoch_interval",
            Self::CommandTokens(ChannelKind::Reset) => "reset_command_tokens",
            Self::CommandTokens(ChannelKind::Finish) => "finish_command_tokens",
            Self::MinimumConcurrency(ChannelKind::Reset) => "reset_minimum_concurrency_threshold",
            Self::MinimumConcurrency(ChannelKind::Finish) => "finish_minimum_concurrency_threshold",
            Self::MaximumEpochHolds(ChannelKind::Reset) => "reset_maximum_epoch_holds",
            Self::MaximumEpochHolds(ChannelKind::Finish) => "finish_maximum_epoch_holds",
        }
    }

    /// Whether the tunable is a duration set in milliseconds.
    #[must_use]
    pub const fn is_duration(self) -> bool {
        matches!(
            self,
            Self::ReadExpire | Self::WriteExpire | Self::PrioAgingExpire | Self::EpochInterval(_)
        )
    }

    /// Inclusive valid range in host units.
    #[must_use]
    pub const fn range(self) -> (i64, i64) {
        const INT_MAX: i64 = i32::MAX as i64;
        const INT_MIN: i64 = i32::MIN as i64;
        match self {
            Self::WritesStarved => (INT_MIN, INT_MAX),
            Self::FrontMerges => (0, 1),
            // A zero epoch would re-arm the timer continuously.
            Self::AsyncDepth | Self::EpochInterval(_) => (1, INT_MAX),
            Self::ReadExpire
            | Self::WriteExpire
            | Self::PrioAgingExpire
            | Self::FifoBatch
            | Self::CommandTokens(_)
            | Self::MinimumConcurrency(_)
            | Self::MaximumEpochHolds(_) => (0, INT_MAX),
        }
    }
}

impl fmt::Display for Tunable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tunable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| Error::UnknownTunable {
                name: s.to_string(),
            })
    }
}
