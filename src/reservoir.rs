//! Bounded-memory uniform sampling over an unbounded value stream (Algorithm R).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub const DEFAULT_RESERVOIR_CAPACITY: usize = 10_000;
pub const DEFAULT_RESERVOIR_SEED: u64 = 100;

#[derive(Debug, Clone)]
pub struct ReservoirSampler<R = ChaCha8Rng> {
    capacity: usize,
    total: u64,
    values: Vec<f64>,
    rng: R,
}

impl ReservoirSampler<ChaCha8Rng> {
    pub fn new(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: Rng> ReservoirSampler<R> {
    pub fn with_rng(capacity: usize, rng: R) -> Self {
        Self {
            capacity,
            total: 0,
            values: Vec::with_capacity(capacity.min(1_024)),
            rng,
        }
    }

    /// After `n` calls the sample holds `min(n, capacity)` values, each seen
    /// value retained with equal probability.
    pub fn add(&mut self, value: f64) {
        if self.values.len() < self.capacity {
            self.values.push(value);
        } else {
            let slot = self.rng.gen_range(0..=self.total);
            if slot < self.capacity as u64 {
                self.values[slot as usize] = value;
            }
        }
        self.total += 1;
    }
}

impl<R> ReservoirSampler<R> {
    /// Merges by concatenating retained values. The result is biased toward
    /// the sampler that saw more values and may exceed `capacity`.
    pub fn absorb<S>(&mut self, other: ReservoirSampler<S>) {
        self.values.extend(other.values);
        self.total += other.total;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn total_seen(&self) -> u64 {
        self.total
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
