//! Randomness abstraction shared by production and simulation code.
//!
//! Every random decision (backoff jitter, fault injection, workload
//! generation) goes through [`Rng`] so a simulation run is fully
//! reproducible from its seed.

pub mod production;
pub mod simulation;

/// Source of randomness.
///
/// Implementations:
/// - `ProductionRng`: OS-seeded, for real sessions
/// - `SimulatedRng`: ChaCha8 seeded from a `u64`, for DST
pub trait Rng: Send + 'static {
    fn next_u64(&mut self) -> u64;

    /// Uniform value in `[min, max)`. Returns `min` when the range is empty.
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }

    fn gen_bool(&mut self, probability: f64) -> bool {
        let val = self.next_u64() as f64 / u64::MAX as f64;
        val < probability
    }
}
