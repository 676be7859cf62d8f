use crate::error::{Error, Result};
use crate::types::{percent_of, MemoryBreakdown, ProcessInfo, Sample};
use chrono::Utc;
use std::time::{Duration, Instant};
use sysinfo::{Process, ProcessStatus, System};
use tracing::debug;

/// Minimum gap between two refreshes for CPU usage to be meaningful
pub const WARM_UP_INTERVAL: Duration = sysinfo::MINIMUM_CPU_UPDATE_INTERVAL;

/// Source of one `Sample` per cycle
///
/// Implemented by `SystemSampler` for the real OS; tests script their own.
pub trait MetricSource: Send {
    fn sample(&mut self) -> Result<Sample>;
}

/// Reads CPU, memory, swap and processes from the running system
pub struct SystemSampler {
    sys: System,
    last_refresh: Instant,
}

impl SystemSampler {
    /// Create a sampler and take a priming reading
    ///
    /// CPU usage is a delta between two refreshes, so the first real sample
    /// after construction already has a baseline.
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        sys.refresh_processes();
        Self {
            sys,
            last_refresh: Instant::now(),
        }
    }

    /// Refresh all counters, first waiting out `WARM_UP_INTERVAL` since the
    /// previous refresh so CPU deltas are meaningful
    fn refresh(&mut self) {
        let wait = warm_up_remaining(self.last_refresh.elapsed());
        if !wait.is_zero() {
            debug!("Waiting {:?} for CPU counters to settle", wait);
            std::thread::sleep(wait);
        }

        self.sys.refresh_cpu();
        self.sys.refresh_memory();
        self.sys.refresh_processes();
        self.last_refresh = Instant::now();
    }

    /// Convert one sysinfo process, `None` if it cannot be reported
    fn process_info(pid: u32, process: &Process, total_bytes: u64) -> Option<ProcessInfo> {
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }

        let name = process.name();
        if name.is_empty() {
            return None;
        }

        let cpu = f64::from(process.cpu_usage());
        if !cpu.is_finite() {
            return None;
        }

        Some(ProcessInfo::new(
            pid,
            name,
            cpu,
            percent_of(process.memory(), total_bytes),
        ))
    }
}

/// Time still to wait before a refresh yields a usable CPU delta
pub fn warm_up_remaining(since_last_refresh: Duration) -> Duration {
    WARM_UP_INTERVAL.saturating_sub(since_last_refresh)
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SystemSampler {
    fn sample(&mut self) -> Result<Sample> {
        self.refresh();

        let total_bytes = self.sys.total_memory();
        if total_bytes == 0 {
            return Err(Error::Sampling(
                "total physical memory reported as zero".to_string(),
            ));
        }

        let cpu_percent = f64::from(self.sys.global_cpu_info().cpu_usage());
        if !cpu_percent.is_finite() {
            return Err(Error::Sampling(format!(
                "global CPU usage unreadable: {}",
                cpu_percent
            )));
        }

        let memory = read_memory_breakdown(total_bytes)?;
        let mem_percent = percent_of(self.sys.used_memory(), total_bytes);
        let swap_percent = percent_of(self.sys.used_swap(), self.sys.total_swap());

        let mut omitted = 0;
        let processes: Vec<ProcessInfo> = self
            .sys
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let info = Self::process_info(pid.as_u32(), process, total_bytes);
                if info.is_none() {
                    omitted += 1;
                }
                info
            })
            .collect();

        if omitted > 0 {
            debug!("Omitted {} unreadable processes from sample", omitted);
        }

        Ok(Sample {
            timestamp: Utc::now(),
            cpu_percent: cpu_percent.clamp(0.0, 100.0),
            mem_percent,
            memory,
            swap_percent,
            processes,
            omitted_processes: omitted,
        })
    }
}

/// Page counts reported by macOS `vm_stat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStatPages {
    pub page_size: u64,
    pub wired: u64,
    pub active: u64,
    pub compressed: u64,
    pub file_backed: u64,
    pub purgeable: u64,
}

impl VmStatPages {
    /// Parse `vm_stat` output
    ///
    /// Format:
    /// ```text
    /// Mach Virtual Memory Statistics: (page size of 16384 bytes)
    /// Pages free:                               12345.
    /// Pages active:                            234567.
    /// Pages wired down:                         98765.
    /// Pages occupied by compressor:             54321.
    /// File-backed pages:                        87654.
    /// Pages purgeable:                           1234.
    /// ```
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::Parse("Empty vm_stat output".to_string()))?;
        let page_size = Self::parse_page_size(header)?;

        let mut pages = VmStatPages {
            page_size,
            ..Default::default()
        };
        let mut seen_wired = false;

        for line in lines {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().trim_end_matches('.');
            let slot = match key.trim() {
                "Pages wired down" => {
                    seen_wired = true;
                    &mut pages.wired
                }
                "Pages active" => &mut pages.active,
                "Pages occupied by compressor" => &mut pages.compressed,
                "File-backed pages" => &mut pages.file_backed,
                "Pages purgeable" => &mut pages.purgeable,
                _ => continue,
            };
            *slot = value.parse::<u64>().map_err(|e| {
                Error::Parse(format!("Failed to parse vm_stat value '{}': {}", value, e))
            })?;
        }

        if !seen_wired {
            return Err(Error::Parse(
                "vm_stat output has no 'Pages wired down' line".to_string(),
            ));
        }

        Ok(pages)
    }

    /// "Mach Virtual Memory Statistics: (page size of 16384 bytes)"
    fn parse_page_size(header: &str) -> Result<u64> {
        let rest = header
            .split("page size of")
            .nth(1)
            .ok_or_else(|| Error::Parse(format!("No page size in header: {}", header)))?;
        let digits: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits
            .parse::<u64>()
            .map_err(|e| Error::Parse(format!("Failed to parse page size '{}': {}", digits, e)))
    }

    pub fn breakdown(&self, total_bytes: u64) -> MemoryBreakdown {
        let bytes = |pages: u64| pages.saturating_mul(self.page_size);
        MemoryBreakdown::fitted(
            bytes(self.wired),
            bytes(self.active),
            bytes(self.compressed),
            bytes(self.file_backed.saturating_add(self.purgeable)),
            total_bytes,
        )
    }
}

/// Breakdown fields from Linux `/proc/meminfo`, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeminfoBreakdown {
    pub unevictable: u64,
    pub slab_unreclaimable: u64,
    pub active_anon: u64,
    pub zswap: u64,
    pub cached: u64,
}

impl MeminfoBreakdown {
    /// Parse `/proc/meminfo` lines such as `Cached:  1234567 kB`
    pub fn parse(content: &str) -> Result<Self> {
        let mut info = MeminfoBreakdown::default();
        let mut seen_cached = false;

        for line in content.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let slot = match key.trim() {
                "Unevictable" => &mut info.unevictable,
                "SUnreclaim" => &mut info.slab_unreclaimable,
                "Active(anon)" => &mut info.active_anon,
                "Zswap" => &mut info.zswap,
                "Cached" => {
                    seen_cached = true;
                    &mut info.cached
                }
                _ => continue,
            };
            let kb_str = rest.split_whitespace().next().unwrap_or("");
            let kb = kb_str.parse::<u64>().map_err(|e| {
                Error::Parse(format!("Failed to parse meminfo value '{}': {}", kb_str, e))
            })?;
            *slot = kb.saturating_mul(1024);
        }

        if !seen_cached {
            return Err(Error::Parse("meminfo has no 'Cached' line".to_string()));
        }

        Ok(info)
    }

    pub fn breakdown(&self, total_bytes: u64) -> MemoryBreakdown {
        MemoryBreakdown::fitted(
            self.unevictable.saturating_add(self.slab_unreclaimable),
            self.active_anon,
            self.zswap,
            self.cached,
            total_bytes,
        )
    }
}

#[cfg(target_os = "macos")]
fn read_memory_breakdown(total_bytes: u64) -> Result<MemoryBreakdown> {
    use std::process::Command;

    let output = Command::new("vm_stat")
        .output()
        .map_err(|e| Error::Sampling(format!("Failed to run vm_stat: {}", e)))?;

    if !output.status.success() {
        return Err(Error::Sampling(format!(
            "vm_stat exited with {}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let pages = VmStatPages::parse(&stdout).map_err(|e| Error::Sampling(e.to_string()))?;
    Ok(pages.breakdown(total_bytes))
}

#[cfg(target_os = "linux")]
fn read_memory_breakdown(total_bytes: u64) -> Result<MemoryBreakdown> {
    let content = std::fs::read_to_string("/proc/meminfo")
        .map_err(|e| Error::Sampling(format!("Failed to read /proc/meminfo: {}", e)))?;
    let info = MeminfoBreakdown::parse(&content).map_err(|e| Error::Sampling(e.to_string()))?;
    Ok(info.breakdown(total_bytes))
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn read_memory_breakdown(total_bytes: u64) -> Result<MemoryBreakdown> {
    Ok(MemoryBreakdown::fitted(0, 0, 0, 0, total_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM_STAT: &str = "Mach Virtual Memory Statistics: (page size of 16384 bytes)\n\
        Pages free:                                3456.\n\
        Pages active:                             98304.\n\
        Pages inactive:                           90000.\n\
        Pages speculative:                         1200.\n\
        Pages throttled:                              0.\n\
        Pages wired down:                         98304.\n\
        Pages purgeable:                           2048.\n\
        \"Translation faults\":                 123456789.\n\
        Pages copy-on-write:                    4567890.\n\
        File-backed pages:                        96256.\n\
        Anonymous pages:                         150000.\n\
        Pages stored in compressor:              400000.\n\
        Pages occupied by compressor:            190054.\n";

    const MEMINFO: &str = "MemTotal:       16315796 kB\n\
        MemFree:         1032424 kB\n\
        MemAvailable:    9253960 kB\n\
        Buffers:          412760 kB\n\
        Cached:          7864320 kB\n\
        SwapCached:        10240 kB\n\
        Active:          6291456 kB\n\
        Active(anon):    3145728 kB\n\
        Unevictable:      131072 kB\n\
        SUnreclaim:       262144 kB\n\
        Zswap:            524288 kB\n";

    #[test]
    fn test_parse_vm_stat() {
        let pages = VmStatPages::parse(VM_STAT).unwrap();
        assert_eq!(pages.page_size, 16384);
        assert_eq!(pages.wired, 98304);
        assert_eq!(pages.active, 98304);
        assert_eq!(pages.compressed, 190054);
        assert_eq!(pages.file_backed, 96256);
        assert_eq!(pages.purgeable, 2048);
    }

    #[test]
    fn test_vm_stat_breakdown_in_bytes() {
        let pages = VmStatPages::parse(VM_STAT).unwrap();
        let total = 16 * 1024 * 1024 * 1024u64;
        let mem = pages.breakdown(total);

        assert_eq!(mem.wired_bytes, 98304 * 16384); // 1.5 GiB
        assert_eq!(mem.compressed_bytes, 190054 * 16384);
        assert_eq!(mem.cached_bytes, (96256 + 2048) * 16384);
        assert!(mem.tracked_bytes() <= total);
    }

    #[test]
    fn test_parse_vm_stat_rejects_bad_header() {
        let result = VmStatPages::parse("Pages free: 10.\n");
        assert!(result.is_err());
        assert!(format!("{}", result.unwrap_err()).contains("page size"));
    }

    #[test]
    fn test_parse_vm_stat_rejects_missing_wired() {
        let content = "Mach Virtual Memory Statistics: (page size of 4096 bytes)\n\
                       Pages active: 10.\n";
        assert!(VmStatPages::parse(content).is_err());
    }

    #[test]
    fn test_parse_vm_stat_rejects_garbage_value() {
        let content = "Mach Virtual Memory Statistics: (page size of 4096 bytes)\n\
                       Pages wired down: lots.\n";
        let err = VmStatPages::parse(content).unwrap_err();
        assert!(format!("{}", err).contains("lots"));
    }

    #[test]
    fn test_parse_meminfo() {
        let info = MeminfoBreakdown::parse(MEMINFO).unwrap();
        assert_eq!(info.cached, 7864320 * 1024);
        assert_eq!(info.active_anon, 3145728 * 1024);
        assert_eq!(info.zswap, 524288 * 1024);

        let mem = info.breakdown(16315796 * 1024);
        assert_eq!(mem.wired_bytes, (131072 + 262144) * 1024);
        assert_eq!(mem.compressed_bytes, 524288 * 1024);
    }

    #[test]
    fn test_parse_meminfo_without_zswap() {
        let info = MeminfoBreakdown::parse("Cached: 100 kB\nActive(anon): 50 kB\n").unwrap();
        assert_eq!(info.zswap, 0);
        assert_eq!(info.breakdown(1024 * 1024).compressed_bytes, 0);
    }

    #[test]
    fn test_parse_meminfo_requires_cached() {
        assert!(MeminfoBreakdown::parse("MemTotal: 100 kB\n").is_err());
    }

    #[test]
    fn test_warm_up_remaining() {
        assert_eq!(warm_up_remaining(Duration::ZERO), WARM_UP_INTERVAL);
        assert_eq!(warm_up_remaining(WARM_UP_INTERVAL), Duration::ZERO);
        assert_eq!(warm_up_remaining(WARM_UP_INTERVAL * 3), Duration::ZERO);
    }

    #[test]
    fn test_first_sample_waits_for_cpu_baseline() {
        let started = Instant::now();
        let mut sampler = SystemSampler::new();
        let _ = sampler.sample();

        // Sampling right after construction still leaves a full CPU interval
        assert!(started.elapsed() >= WARM_UP_INTERVAL);
    }

    #[test]
    fn test_system_sampler_reads_real_counters() {
        let mut sampler = SystemSampler::new();

        match sampler.sample() {
            Ok(sample) => {
                assert!(sample.memory.total_bytes > 0);
                assert!(sample.memory.tracked_bytes() <= sample.memory.total_bytes);
                assert!((0.0..=100.0).contains(&sample.cpu_percent));
                assert!((0.0..=100.0).contains(&sample.mem_percent));
                assert!((0.0..=100.0).contains(&sample.swap_percent));

                let mut pids: Vec<u32> = sample.processes.iter().map(|p| p.pid).collect();
                let count = pids.len();
                pids.sort_unstable();
                pids.dedup();
                assert_eq!(pids.len(), count);
            }
            // Sandboxed environments may hide the counters entirely
            Err(e) => assert!(format!("{}", e).contains("Sampling error")),
        }
    }
}
