use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Информация о процессе
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>, cpu_percent: f64, mem_percent: f64) -> Self {
        Self {
            pid,
            name: name.into(),
            cpu_percent,
            mem_percent,
        }
    }

    // Процесс рендерит через GPU? (эвристика по имени, как "Cursor Helper (GPU)")
    pub fn is_gpu(&self) -> bool {
        self.name.to_ascii_lowercase().contains("gpu")
    }
}

/// Memory categories tracked by the breakdown view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Wired,
    Active,
    Compressed,
    Cached,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 4] = [
        MemoryCategory::Wired,
        MemoryCategory::Active,
        MemoryCategory::Compressed,
        MemoryCategory::Cached,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MemoryCategory::Wired => "Wired",
            MemoryCategory::Active => "Active",
            MemoryCategory::Compressed => "Compressed",
            MemoryCategory::Cached => "Cached",
        }
    }
}

/// Physical memory split by category, in bytes
///
/// Invariant: `wired + active + compressed + cached <= total`. Free and
/// inactive pages are not tracked but are part of `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    pub wired_bytes: u64,
    pub active_bytes: u64,
    pub compressed_bytes: u64,
    pub cached_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryBreakdown {
    /// Build a breakdown, shrinking categories until they fit in `total`
    ///
    /// OS counters are read non-atomically, so the categories can briefly
    /// add up to more than the total. Cached pages shrink first, then
    /// active, compressed and wired.
    pub fn fitted(wired: u64, active: u64, compressed: u64, cached: u64, total: u64) -> Self {
        let mut parts = [cached, active, compressed, wired];
        let mut excess = parts
            .iter()
            .fold(0u64, |acc, v| acc.saturating_add(*v))
            .saturating_sub(total);

        for part in parts.iter_mut() {
            if excess == 0 {
                break;
            }
            let cut = excess.min(*part);
            *part -= cut;
            excess -= cut;
        }

        let [cached, active, compressed, wired] = parts;
        Self {
            wired_bytes: wired,
            active_bytes: active,
            compressed_bytes: compressed,
            cached_bytes: cached,
            total_bytes: total,
        }
    }

    pub fn tracked_bytes(&self) -> u64 {
        self.wired_bytes + self.active_bytes + self.compressed_bytes + self.cached_bytes
    }

    pub fn bytes(&self, category: MemoryCategory) -> u64 {
        match category {
            MemoryCategory::Wired => self.wired_bytes,
            MemoryCategory::Active => self.active_bytes,
            MemoryCategory::Compressed => self.compressed_bytes,
            MemoryCategory::Cached => self.cached_bytes,
        }
    }

    /// Share of total memory held by the compressor, 0.0..=1.0
    pub fn compressed_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.compressed_bytes as f64 / self.total_bytes as f64
    }
}

/// Immutable snapshot of system metrics taken at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Global CPU load, 0-100
    pub cpu_percent: f64,
    /// Used physical memory, 0-100
    pub mem_percent: f64,
    pub memory: MemoryBreakdown,
    /// Used swap, 0-100
    pub swap_percent: f64,
    pub processes: Vec<ProcessInfo>,
    /// Processes skipped because their info could not be read
    pub omitted_processes: usize,
}

impl Sample {
    pub fn process(&self, pid: u32) -> Option<&ProcessInfo> {
        self.processes.iter().find(|p| p.pid == pid)
    }
}

/// Percentage of `part` in `whole`, 0 when `whole` is 0
pub fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0)
}
