//! Simulated block device.
//!
//! Accepts up to `queue_depth` requests and completes each one after a
//! latency drawn from its profile. Completions come out in time order, ties
//! broken by request id, so a run is fully determined by its seed.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use zinc_core::{Op, Request, RequestId};

/// Latency model of the simulated device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
    /// Requests the device accepts at once.
    pub queue_depth: u32,
    /// Fixed cost of a read or write.
    pub base_latency_us: u64,
    /// Added cost per 8 KiB unit.
    pub per_unit_latency_us: u64,
    /// Cost of a zone reset or finish.
    pub command_latency_us: u64,
    /// Largest random extra latency.
    pub jitter_us: u64,
    /// Probability that the device bounces a request back to the host
    /// instead of accepting it.
    pub requeue_ratio: f64,
}

impl DeviceProfile {
    /// A flash device.
    #[must_use]
    pub const fn flash() -> Self {
        Self {
            queue_depth: 32,
            base_latency_us: 80,
            per_unit_latency_us: 10,
            command_latency_us: 2_000,
            jitter_us: 40,
            requeue_ratio: 0.0,
        }
    }

    /// A shingled disk: shallow queue, slow commands.
    #[must_use]
    pub const fn rotational() -> Self {
        Self {
            queue_depth: 4,
            base_latency_us: 4_000,
            per_unit_latency_us: 20,
            command_latency_us: 15_000,
            jitter_us: 2_000,
            requeue_ratio: 0.0,
        }
    }

    /// Sets the queue depth.
    #[must_use]
    pub const fn with_queue_depth(mut self, depth: u32) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Sets the bounce probability.
    #[must_use]
    pub const fn with_requeue_ratio(mut self, ratio: f64) -> Self {
        self.requeue_ratio = ratio;
        self
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::flash()
    }
}

/// A device that completes requests on a simulated clock.
#[derive(Debug)]
pub struct SimulatedDevice {
    profile: DeviceProfile,
    rng: ChaCha8Rng,
    in_flight: BinaryHeap<Reverse<(u64, RequestId)>>,
}

impl SimulatedDevice {
    /// Creates an idle device.
    #[must_use]
    pub fn new(profile: DeviceProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: ChaCha8Rng::seed_from_u64(seed),
            in_flight: BinaryHeap::new(),
        }
    }

    /// The latency model.
    #[must_use]
    pub const fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Whether another request fits in the queue.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.profile.queue_depth as usize
    }

    /// Requests the device is working on.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether nothing is in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Decides whether the device bounces `request` back to the host.
    pub fn should_requeue(&mut self) -> bool {
        self.profile.requeue_ratio > 0.0
            && self.rng.gen_bool(self.profile.requeue_ratio.clamp(0.0, 1.0))
    }

    /// Starts `request` and returns its completion time.
    ///
    /// # Panics
    ///
    /// Panics if the queue is full.
    pub fn submit(&mut self, request: &Request, current_time_us: u64) -> u64 {
        assert!(self.has_capacity(), "device queue overflow");
        let latency = self.latency(request);
        let done_at = current_time_us + latency;
        self.in_flight.push(Reverse((done_at, request.id)));
        done_at
    }

    /// Time of the earliest pending completion.
    #[must_use]
    pub fn next_completion_us(&self) -> Option<u64> {
        self.in_flight.peek().map(|Reverse((at, _))| *at)
    }

    /// Removes and returns every request finished by `current_time_us`.
    pub fn take_completed(&mut self, current_time_us: u64) -> Vec<RequestId> {
        let mut done = Vec::new();
        while let Some(&Reverse((at, id))) = self.in_flight.peek() {
            if at > current_time_us {
                break;
            }
            self.in_flight.pop();
            done.push(id);
        }
        done
    }

    fn latency(&mut self, request: &Request) -> u64 {
        let base = match request.op {
            Op::Reset | Op::Finish => self.profile.command_latency_us,
            Op::Read | Op::Write | Op::Other => {
                self.profile.base_latency_us + self.profile.per_unit_latency_us * request.io_units()
            }
        };
        let jitter = if self.profile.jitter_us > 0 {
            self.rng.gen_range(0..=self.profile.jitter_us)
        } else {
            0
        };
        // Zero-latency completions would finish in the dispatching step.
        (base + jitter).max(1)
    }
}
