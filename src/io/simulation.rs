//! Deterministic RNG for simulation testing.
//!
//! Same seed, same sequence: a failing DST seed can be replayed exactly.

use super::Rng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub struct SimulatedRng {
    rng: ChaCha8Rng,
}

impl SimulatedRng {
    pub fn new(seed: u64) -> Self {
        SimulatedRng {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Rng for SimulatedRng {
    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}
