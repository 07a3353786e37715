//! BUGGIFY - FoundationDB-Style Fault Injection
//!
//! Every remote call the simulated write client makes is a potential fault
//! site. Faults are drawn from the caller's deterministic RNG, so a seed
//! fully determines where they land.
//!
//! # Usage
//!
//! ```ignore
//! use crate::buggify;
//!
//! // Configured probability
//! if buggify!(rng, faults::write_stream::CREATE_UNAVAILABLE) {
//!     return Err(RpcStatus::unavailable("injected"));
//! }
//!
//! // Explicit probability
//! if buggify!(rng, faults::write_stream::APPEND_OFFSET_SKEW, 0.05) {
//!     offset += 1;
//! }
//! ```

pub mod config;
pub mod faults;

pub use config::FaultConfig;
pub use faults::ALL_FAULTS;

use std::cell::RefCell;
use std::collections::HashMap;

/// Per-fault check/trigger counters
#[derive(Debug, Clone, Default)]
pub struct BuggifyStats {
    pub checks: HashMap<String, u64>,
    pub triggers: HashMap<String, u64>,
}

impl BuggifyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_check(&mut self, fault_id: &str) {
        *self.checks.entry(fault_id.to_string()).or_insert(0) += 1;
    }

    pub fn record_trigger(&mut self, fault_id: &str) {
        *self.triggers.entry(fault_id.to_string()).or_insert(0) += 1;
    }

    pub fn triggered(&self, fault_id: &str) -> u64 {
        self.triggers.get(fault_id).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> String {
        let mut lines = vec!["BUGGIFY Statistics:".to_string()];

        let mut sorted_faults: Vec<_> = self.checks.keys().collect();
        sorted_faults.sort();

        for fault_id in sorted_faults {
            let checks = self.checks.get(fault_id).copied().unwrap_or(0);
            lines.push(format!(
                "  {}: {}/{}",
                fault_id,
                self.triggered(fault_id),
                checks
            ));
        }

        lines.join("\n")
    }
}

thread_local! {
    static BUGGIFY_CONTEXT: RefCell<BuggifyContext> = RefCell::new(BuggifyContext::default());
}

#[derive(Debug, Default)]
struct BuggifyContext {
    config: FaultConfig,
    stats: BuggifyStats,
}

/// Set the fault configuration for the current thread
pub fn set_config(config: FaultConfig) {
    BUGGIFY_CONTEXT.with(|ctx| {
        ctx.borrow_mut().config = config;
    });
}

pub fn get_stats() -> BuggifyStats {
    BUGGIFY_CONTEXT.with(|ctx| ctx.borrow().stats.clone())
}

pub fn reset_stats() {
    BUGGIFY_CONTEXT.with(|ctx| {
        ctx.borrow_mut().stats = BuggifyStats::new();
    });
}

/// Returns true if the fault should be injected, using the configured probability.
#[inline]
pub fn should_buggify<R: crate::io::Rng>(rng: &mut R, fault_id: &str) -> bool {
    BUGGIFY_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.stats.record_check(fault_id);

        let prob = ctx.config.get(fault_id);
        if prob <= 0.0 {
            return false;
        }

        let triggered = roll(rng) < prob;
        if triggered {
            ctx.stats.record_trigger(fault_id);
        }
        triggered
    })
}

/// Returns true if the fault should be injected with an explicit probability.
/// Still respects the thread's `enabled` switch.
#[inline]
pub fn should_buggify_with_prob<R: crate::io::Rng>(
    rng: &mut R,
    fault_id: &str,
    probability: f64,
) -> bool {
    BUGGIFY_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.stats.record_check(fault_id);

        if !ctx.config.enabled || probability <= 0.0 {
            return false;
        }

        let triggered = roll(rng) < probability.clamp(0.0, 1.0);
        if triggered {
            ctx.stats.record_trigger(fault_id);
        }
        triggered
    })
}

fn roll<R: crate::io::Rng>(rng: &mut R) -> f64 {
    rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0
}

/// BUGGIFY macro - the main interface for fault injection
#[macro_export]
macro_rules! buggify {
    ($rng:expr, $fault_id:expr) => {
        $crate::buggify::should_buggify($rng, $fault_id)
    };
    ($rng:expr, $fault_id:expr, $prob:expr) => {
        $crate::buggify::should_buggify_with_prob($rng, $fault_id, $prob)
    };
}
