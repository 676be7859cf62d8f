use crate::types::ProcessInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Summed CPU of GPU processes above which GPU activity is HEAVY
pub const GPU_HEAVY_CPU_PERCENT: f64 = 50.0;

/// Summed CPU of GPU processes above which GPU activity is MODERATE
pub const GPU_MODERATE_CPU_PERCENT: f64 = 10.0;

/// Top-N processes by CPU and by memory for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub top_cpu: Vec<ProcessInfo>,
    pub top_mem: Vec<ProcessInfo>,
}

/// Rank processes by CPU and memory share
///
/// Each list is sorted descending by its metric and cut to `n` entries.
/// Equal values resolve by ascending pid so the output is deterministic.
/// Lists shorter than `n` are returned whole, without padding.
pub fn rank(processes: &[ProcessInfo], n: usize) -> Ranking {
    Ranking {
        top_cpu: top_by(processes, n, |p| p.cpu_percent),
        top_mem: top_by(processes, n, |p| p.mem_percent),
    }
}

fn top_by<F>(processes: &[ProcessInfo], n: usize, metric: F) -> Vec<ProcessInfo>
where
    F: Fn(&ProcessInfo) -> f64,
{
    let mut sorted: Vec<&ProcessInfo> = processes.iter().collect();
    sorted.sort_by(|a, b| {
        metric(b)
            .total_cmp(&metric(a))
            .then_with(|| a.pid.cmp(&b.pid))
    });
    sorted.into_iter().take(n).cloned().collect()
}

/// Rough GPU load inferred from GPU helper processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GpuActivity {
    Idle,
    Moderate,
    Heavy,
}

impl GpuActivity {
    pub fn from_processes(processes: &[ProcessInfo]) -> Self {
        let total: f64 = processes
            .iter()
            .filter(|p| p.is_gpu())
            .map(|p| p.cpu_percent)
            .sum();

        if total > GPU_HEAVY_CPU_PERCENT {
            GpuActivity::Heavy
        } else if total > GPU_MODERATE_CPU_PERCENT {
            GpuActivity::Moderate
        } else {
            GpuActivity::Idle
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GpuActivity::Idle => "IDLE",
            GpuActivity::Moderate => "MODERATE",
            GpuActivity::Heavy => "HEAVY",
        }
    }
}

impl fmt::Display for GpuActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
