use super::Rng;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// OS-seeded RNG used outside of simulation.
pub struct ProductionRng {
    rng: StdRng,
}

impl ProductionRng {
    pub fn new() -> Self {
        ProductionRng {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for ProductionRng {
    fn default() -> Self {
        Self::new()
    }
}

impl Rng for ProductionRng {
    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}
