//! Deterministic seeding and RNG utilities.
//!
//! - SeedSequence: expands one slot seed into independent sub-streams
//!   (dynamics, action sampling)
//! - RngStream: a reproducible PRNG stream (ChaCha8)
//! - slot_seeds: the per-slot seeds of a vector environment

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Type alias for the default RNG stream used across the crate.
pub type RngStream = ChaCha8Rng;

/// SplitMix64 mixer used to expand a 64-bit seed into a sequence of pseudo-random u64 values.
#[derive(Clone, Debug)]
pub struct SeedSequence {
    state: u128,
}

impl SeedSequence {
    pub fn new(seed: u64) -> Self {
        Self { state: (seed as u128) ^ 0x9E3779B97F4A7C15u128 }
    }

    /// Generate the next sub-seed deterministically.
    pub fn next_subseed(&mut self) -> u64 {
        let mut z = (self.state as u64).wrapping_add(0x9E3779B97F4A7C15);
        self.state = (self.state ^ (z as u128)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    /// Create an RNG stream seeded from the next subseed.
    pub fn next_rng(&mut self) -> RngStream {
        RngStream::seed_from_u64(self.next_subseed())
    }
}

/// Create a new RNG stream from a root seed.
pub fn rng_from_seed(seed: u64) -> RngStream {
    RngStream::seed_from_u64(seed)
}

/// Seeds of `n` slots: slot `i` gets `base + i`.
pub fn slot_seeds(base: u64, n: usize) -> Vec<u64> {
    (0..n as u64).map(|i| base.wrapping_add(i)).collect()
}
