//! Injected randomness for backoff draws and RTO adjustment
//!
//! Every random decision in the core goes through [`RandomSource`], so a
//! sender can be replayed exactly from a seed or driven by a scripted source
//! in tests.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Source of uniformly distributed values
pub trait RandomSource {
    /// Uniform integer in `[lo, hi]` (both inclusive)
    fn uniform_int(&mut self, lo: u32, hi: u32) -> u32;

    /// Uniform float in `[0, 1)`
    fn uniform_float(&mut self) -> f64;
}

impl<R: RandomSource + ?Sized> RandomSource for &mut R {
    fn uniform_int(&mut self, lo: u32, hi: u32) -> u32 {
        (**self).uniform_int(lo, hi)
    }

    fn uniform_float(&mut self) -> f64 {
        (**self).uniform_float()
    }
}

/// Seedable slot generator backed by ChaCha8
#[derive(Debug, Clone)]
pub struct SlotRng {
    inner: ChaCha8Rng,
}

impl SlotRng {
    /// Deterministic generator for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        SlotRng {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Generator seeded from the operating system
    pub fn from_entropy() -> Self {
        SlotRng {
            inner: ChaCha8Rng::from_entropy(),
        }
    }

    /// Derive an independent generator, e.g. one per sender of a fleet
    pub fn fork(&mut self) -> Self {
        SlotRng::seeded(self.inner.gen())
    }
}

impl RandomSource for SlotRng {
    fn uniform_int(&mut self, lo: u32, hi: u32) -> u32 {
        if lo >= hi {
            return lo;
        }
        self.inner.gen_range(lo..=hi)
    }

    fn uniform_float(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }
}
