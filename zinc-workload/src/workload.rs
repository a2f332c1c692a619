//! Deterministic workload generation.
//!
//! A workload is a timed list of submissions over a zoned address space.
//! Writes append at a per-zone write pointer, so each zone sees a sequential
//! stream; reads land anywhere below the pointer. Zone resets and finishes
//! rewind or fill a zone. The same seed always produces the same list.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use zinc_core::{Priority, Request, Sector};

/// Relative weights of the generated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpMix {
    /// Reads.
    pub read: u32,
    /// Writes.
    pub write: u32,
    /// Zone resets.
    pub reset: u32,
    /// Zone finishes.
    pub finish: u32,
}

impl OpMix {
    /// Reads and writes only, for devices without zones.
    pub const READ_WRITE: Self = Self {
        read: 55,
        write: 45,
        reset: 0,
        finish: 0,
    };

    const fn total(&self) -> u32 {
        self.read + self.write + self.reset + self.finish
    }
}

impl Default for OpMix {
    fn default() -> Self {
        Self {
            read: 50,
            write: 40,
            reset: 5,
            finish: 5,
        }
    }
}

/// Workload configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadConfig {
    /// Random seed for deterministic generation.
    pub seed: u64,
    /// Number of submissions to generate.
    pub operations: u64,
    /// Number of zones in the address space.
    pub zones: u64,
    /// Zone size in sectors.
    pub zone_sectors: u64,
    /// Operation weights.
    pub mix: OpMix,
    /// Largest read or write, in sectors.
    pub max_sectors: u32,
    /// Tier weights, indexed by [`Priority::index`].
    pub priority_weights: [u32; 3],
    /// Probability that a read or write is inserted at the head.
    pub at_head_ratio: f64,
    /// Largest gap between two submissions.
    pub max_gap_us: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            operations: 1000,
            zones: 16,
            zone_sectors: 65_536,
            mix: OpMix::default(),
            max_sectors: 256,
            priority_weights: [5, 85, 10],
            at_head_ratio: 0.02,
            max_gap_us: 200,
        }
    }
}

/// Builder for creating workloads.
#[derive(Debug, Default)]
pub struct WorkloadBuilder {
    config: WorkloadConfig,
}

impl WorkloadBuilder {
    /// Creates a new workload builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the random seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Sets the number of submissions.
    #[must_use]
    pub const fn operations(mut self, operations: u64) -> Self {
        self.config.operations = operations;
        self
    }

    /// Sets the zone layout.
    #[must_use]
    pub const fn zones(mut self, zones: u64, zone_sectors: u64) -> Self {
        self.config.zones = zones;
        self.config.zone_sectors = zone_sectors;
        self
    }

    /// Sets the operation weights.
    #[must_use]
    pub const fn mix(mut self, mix: OpMix) -> Self {
        self.config.mix = mix;
        self
    }

    /// Sets the largest read or write.
    #[must_use]
    pub const fn max_sectors(mut self, max_sectors: u32) -> Self {
        self.config.max_sectors = max_sectors;
        self
    }

    /// Sets the tier weights (realtime, best-effort, idle).
    #[must_use]
    pub const fn priority_weights(mut self, weights: [u32; 3]) -> Self {
        self.config.priority_weights = weights;
        self
    }

    /// Sets the probability of a head insertion.
    #[must_use]
    pub const fn at_head_ratio(mut self, ratio: f64) -> Self {
        self.config.at_head_ratio = ratio;
        self
    }

    /// Sets the largest gap between submissions.
    #[must_use]
    pub const fn max_gap_us(mut self, gap_us: u64) -> Self {
        self.config.max_gap_us = gap_us;
        self
    }

    /// Builds the workload.
    #[must_use]
    pub fn build(self) -> Workload {
        Workload::new(self.config)
    }
}

/// One request handed to the scheduler at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Simulated arrival time.
    pub at_us: u64,
    /// The request.
    pub request: Request,
    /// Insert at the head of its tier.
    pub at_head: bool,
}

/// A seeded submission generator.
#[derive(Debug)]
pub struct Workload {
    config: WorkloadConfig,
    rng: ChaCha8Rng,
    write_pointers: Vec<Sector>,
    next_id: u64,
    now_us: u64,
}

impl Workload {
    /// Creates a new workload from configuration.
    ///
    /// # Panics
    ///
    /// Panics if the layout has no zones, a zone smaller than the largest
    /// request, or all operation weights are zero.
    #[must_use]
    pub fn new(config: WorkloadConfig) -> Self {
        assert!(config.zones > 0, "workload needs at least one zone");
        assert!(
            config.zone_sectors >= u64::from(config.max_sectors),
            "zone smaller than the largest request"
        );
        assert!(config.mix.total() > 0, "operation mix is empty");
        assert!(config.max_sectors > 0, "requests must cover a sector");

        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        #[allow(clippy::cast_possible_truncation)] // Zone counts are small.
        let write_pointers = vec![0; config.zones as usize];
        Self {
            config,
            rng,
            write_pointers,
            next_id: 1,
            now_us: 0,
        }
    }

    /// Creates a workload builder.
    #[must_use]
    pub fn builder() -> WorkloadBuilder {
        WorkloadBuilder::new()
    }

    /// Returns the workload configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Generates every submission, ordered by arrival time.
    #[must_use]
    pub fn generate(mut self) -> Vec<Submission> {
        #[allow(clippy::cast_possible_truncation)] // Bounded by the caller's memory anyway.
        let mut submissions = Vec::with_capacity(self.config.operations as usize);
        for _ in 0..self.config.operations {
            submissions.push(self.next_submission());
        }
        submissions
    }

    fn next_submission(&mut self) -> Submission {
        self.now_us += self.rng.gen_range(0..=self.config.max_gap_us);
        let id = self.next_id;
        self.next_id += 1;

        let zone = self.rng.gen_range(0..self.config.zones);
        let zone_start = zone * self.config.zone_sectors;
        let mix = self.config.mix;
        let roll = self.rng.gen_range(0..mix.total());

        let (request, queued) = if roll < mix.read {
            (self.read(id, zone), true)
        } else if roll < mix.read + mix.write {
            (self.write(id, zone), true)
        } else if roll < mix.read + mix.write + mix.reset {
            self.set_write_pointer(zone, 0);
            (Request::reset(id, zone_start), false)
        } else {
            self.set_write_pointer(zone, self.config.zone_sectors);
            (Request::finish(id, zone_start), false)
        };

        let request = request.with_priority(self.priority());
        let at_head = queued && self.rng.gen_bool(self.config.at_head_ratio.clamp(0.0, 1.0));
        Submission {
            at_us: self.now_us,
            request,
            at_head,
        }
    }

    fn read(&mut self, id: u64, zone: u64) -> Request {
        let sectors = self.size();
        let span = self.config.zone_sectors - u64::from(sectors);
        let offset = self.rng.gen_range(0..=span);
        Request::read(id, zone * self.config.zone_sectors + offset, sectors)
    }

    /// Appends at the zone's write pointer, rewinding a zone that is full.
    fn write(&mut self, id: u64, zone: u64) -> Request {
        let sectors = self.size();
        let mut wp = self.write_pointer(zone);
        if wp + u64::from(sectors) > self.config.zone_sectors {
            wp = 0;
        }
        self.set_write_pointer(zone, wp + u64::from(sectors));
        Request::write(id, zone * self.config.zone_sectors + wp, sectors)
    }

    /// Request length, a multiple of 8 sectors.
    fn size(&mut self) -> u32 {
        let blocks = (self.config.max_sectors / 8).max(1);
        let sectors = self.rng.gen_range(1..=blocks) * 8;
        sectors.min(self.config.max_sectors)
    }

    fn priority(&mut self) -> Priority {
        let weights = self.config.priority_weights;
        let total: u32 = weights.iter().sum();
        if total == 0 {
            return Priority::BestEffort;
        }
        let mut roll = self.rng.gen_range(0..total);
        for tier in Priority::ALL {
            let weight = weights[tier.index()];
            if roll < weight {
                return tier;
            }
            roll -= weight;
        }
        Priority::BestEffort
    }

    #[allow(clippy::cast_possible_truncation)] // Zone index < zones, checked at construction.
    fn write_pointer(&self, zone: u64) -> Sector {
        self.write_pointers[zone as usize]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_write_pointer(&mut self, zone: u64, wp: Sector) {
        self.write_pointers[zone as usize] = wp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zinc_core::Op;

    #[test]
    fn test_same_seed_same_submissions() {
        let a = Workload::builder().seed(7).operations(200).build().generate();
        let b = Workload::builder().seed(7).operations(200).build().generate();
        let c = Workload::builder().seed(8).operations(200).build().generate();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ids_unique_and_times_monotonic() {
        let subs = Workload::builder().seed(1).operations(500).build().generate();
        assert_eq!(subs.len(), 500);
        for (i, pair) in subs.windows(2).enumerate() {
            assert!(pair[0].at_us <= pair[1].at_us, "arrival order broken at {i}");
            assert!(pair[0].request.id < pair[1].request.id);
        }
    }

    #[test]
    fn test_requests_stay_inside_their_zone() {
        let zone_sectors = 4096;
        let subs = Workload::builder()
            .seed(3)
            .operations(1000)
            .zones(4, zone_sectors)
            .build()
            .generate();

        for sub in &subs {
            let request = sub.request;
            let zone = request.sector / zone_sectors;
            assert!(zone < 4);
            if matches!(request.op, Op::Read | Op::Write) {
                assert!(request.sectors > 0 && request.sectors % 8 == 0);
                assert!(request.end_sector() <= (zone + 1) * zone_sectors);
            } else {
                assert_eq!(request.sector % zone_sectors, 0);
                assert!(!sub.at_head);
            }
        }
    }

    #[test]
    fn test_writes_append_within_a_zone() {
        let subs = Workload::builder()
            .seed(11)
            .operations(300)
            .zones(1, 1 << 20)
            .mix(OpMix {
                read: 0,
                write: 1,
                reset: 0,
                finish: 0,
            })
            .build()
            .generate();

        let mut expected = 0;
        for sub in &subs {
            assert_eq!(sub.request.sector, expected);
            expected = sub.request.end_sector();
        }
    }

    #[test]
    fn test_priority_weights_respected() {
        let subs = Workload::builder()
            .seed(5)
            .operations(100)
            .priority_weights([0, 0, 1])
            .build()
            .generate();
        assert!(subs.iter().all(|s| s.request.priority == Priority::Idle));
    }
}
