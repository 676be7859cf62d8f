use crate::types::MemoryBreakdown;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compressed share of total memory above which compression counts as heavy
pub const COMPRESSED_HIGH_WATER_RATIO: f64 = 0.25;

/// Swap usage (percent) above which swapping counts as non-trivial
pub const SWAP_NONTRIVIAL_PERCENT: f64 = 10.0;

/// CPU load (percent) that, together with STRESSED memory, flags lag risk.
/// Display only; independent of the alert thresholds.
pub const LAG_RISK_CPU_PERCENT: f64 = 50.0;

/// Coarse memory health derived from compression and swap activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryPressure {
    Normal,
    Warning,
    Stressed,
}

impl MemoryPressure {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryPressure::Normal => "NORMAL",
            MemoryPressure::Warning => "WARNING",
            MemoryPressure::Stressed => "STRESSED",
        }
    }
}

impl fmt::Display for MemoryPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier thresholds
///
/// Defaults come from the named constants above; the daemon may override
/// them from its `[pressure]` configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressurePolicy {
    pub compressed_high_water_ratio: f64,
    pub swap_nontrivial_percent: f64,
    pub lag_risk_cpu_percent: f64,
}

impl Default for PressurePolicy {
    fn default() -> Self {
        Self {
            compressed_high_water_ratio: COMPRESSED_HIGH_WATER_RATIO,
            swap_nontrivial_percent: SWAP_NONTRIVIAL_PERCENT,
            lag_risk_cpu_percent: LAG_RISK_CPU_PERCENT,
        }
    }
}

impl PressurePolicy {
    pub fn compression_heavy(&self, memory: &MemoryBreakdown) -> bool {
        memory.compressed_ratio() > self.compressed_high_water_ratio
    }

    pub fn swap_nontrivial(&self, swap_percent: f64) -> bool {
        swap_percent > self.swap_nontrivial_percent
    }

    /// Classify memory pressure
    ///
    /// STRESSED when heavy compression and non-trivial swap coincide,
    /// WARNING when only one of them holds, NORMAL otherwise.
    pub fn classify(&self, memory: &MemoryBreakdown, swap_percent: f64) -> MemoryPressure {
        match (
            self.compression_heavy(memory),
            self.swap_nontrivial(swap_percent),
        ) {
            (true, true) => MemoryPressure::Stressed,
            (true, false) | (false, true) => MemoryPressure::Warning,
            (false, false) => MemoryPressure::Normal,
        }
    }

    /// STRESSED memory while the CPU is also busy
    pub fn lag_risk(&self, pressure: MemoryPressure, cpu_percent: f64) -> bool {
        pressure == MemoryPressure::Stressed && cpu_percent > self.lag_risk_cpu_percent
    }
}

/// Classify with the default policy
pub fn classify(memory: &MemoryBreakdown, swap_percent: f64) -> MemoryPressure {
    PressurePolicy::default().classify(memory, swap_percent)
}
