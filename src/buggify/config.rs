use super::faults::ALL_FAULTS;
use std::collections::HashMap;

/// Fault probabilities for the current thread
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub enabled: bool,
    /// Scales every configured probability (chaos runs use > 1.0)
    pub global_multiplier: f64,
    probabilities: HashMap<String, f64>,
}

impl FaultConfig {
    /// Enabled, with the default probability for every known fault
    pub fn new() -> Self {
        FaultConfig {
            enabled: true,
            global_multiplier: 1.0,
            probabilities: ALL_FAULTS
                .iter()
                .map(|(id, p)| (id.to_string(), *p))
                .collect(),
        }
    }

    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            global_multiplier: 0.0,
            probabilities: HashMap::new(),
        }
    }

    pub fn chaos() -> Self {
        FaultConfig {
            global_multiplier: 5.0,
            ..Self::new()
        }
    }

    pub fn with_fault(mut self, fault_id: &str, probability: f64) -> Self {
        self.probabilities.insert(fault_id.to_string(), probability);
        self
    }

    /// Effective probability for a fault (0.0 when disabled or unknown)
    pub fn get(&self, fault_id: &str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        let base = self.probabilities.get(fault_id).copied().unwrap_or(0.0);
        (base * self.global_multiplier).clamp(0.0, 1.0)
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::new()
    }
}
