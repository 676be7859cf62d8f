//! Compact status line and detailed breakdown view
//!
//! Rendering is pure: the same inputs always produce the same output, and
//! nothing here performs I/O.

use crate::alert::{AlertKind, AlertLimits, AlertState};
use crate::memory_pressure::{MemoryPressure, PressurePolicy};
use crate::ranker::{GpuActivity, Ranking};
use crate::types::{MemoryCategory, ProcessInfo, Sample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fraction of a limit at which a metric is shown as WARN
pub const WARN_FACTOR: f64 = 0.85;

/// Width of displayed process names
pub const PROCESS_NAME_WIDTH: usize = 24;

const BAR_WIDTH: usize = 10;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Everything one render pass reads
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub sample: &'a Sample,
    pub pressure: MemoryPressure,
    pub lag_risk: bool,
    pub ranking: &'a Ranking,
    pub alerts: &'a BTreeMap<AlertKind, AlertState>,
    pub limits: &'a AlertLimits,
    pub policy: &'a PressurePolicy,
}

impl RenderInput<'_> {
    fn is_firing(&self, kind: AlertKind) -> bool {
        self.alerts.get(&kind).map(|s| s.firing).unwrap_or(false)
    }
}

/// Display level of a single metric relative to its limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricLevel {
    Ok,
    Warn,
    High,
}

impl MetricLevel {
    pub fn from_value(value: f64, limit: f64) -> Self {
        if value >= limit {
            MetricLevel::High
        } else if value >= limit * WARN_FACTOR {
            MetricLevel::Warn
        } else {
            MetricLevel::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricLevel::Ok => "OK",
            MetricLevel::Warn => "WARN",
            MetricLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for MetricLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The firing kind furthest above its limit
///
/// Ties resolve in the order SWAP, MEM, CPU.
pub fn worst_firing(input: &RenderInput<'_>) -> Option<AlertKind> {
    const PRECEDENCE: [AlertKind; 3] = [AlertKind::Swap, AlertKind::Memory, AlertKind::Cpu];

    let mut worst: Option<(AlertKind, f64)> = None;
    for kind in PRECEDENCE {
        if !input.is_firing(kind) {
            continue;
        }
        let limit = input.limits.limit(kind);
        let ratio = if limit > 0.0 {
            kind.value(input.sample) / limit
        } else {
            f64::INFINITY
        };
        match worst {
            Some((_, best)) if ratio <= best => {}
            _ => worst = Some((kind, ratio)),
        }
    }
    worst.map(|(kind, _)| kind)
}

/// Single-line summary, e.g. `SWAP! | CPU 18% | MEM 80%`
pub fn render_compact(input: &RenderInput<'_>) -> String {
    let base = format!(
        "CPU {:.0}% | MEM {:.0}%",
        input.sample.cpu_percent, input.sample.mem_percent
    );
    match worst_firing(input) {
        Some(kind) => format!("{}! | {}", kind.label(), base),
        None => base,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricLine {
    pub percent: f64,
    pub level: MetricLevel,
    pub firing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
    pub category: MemoryCategory,
    pub bytes: u64,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRow {
    pub pid: u32,
    pub name: String,
    pub percent: f64,
    pub gpu: bool,
}

impl ProcessRow {
    fn cpu(p: &ProcessInfo) -> Self {
        Self {
            pid: p.pid,
            name: p.name.clone(),
            percent: p.cpu_percent,
            gpu: p.is_gpu(),
        }
    }

    fn mem(p: &ProcessInfo) -> Self {
        Self {
            pid: p.pid,
            name: p.name.clone(),
            percent: p.mem_percent,
            gpu: p.is_gpu(),
        }
    }
}

/// Structured breakdown published alongside the compact line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedView {
    pub sampled_at: DateTime<Utc>,
    pub pressure: MemoryPressure,
    pub lag_risk: bool,
    pub cpu: MetricLine,
    pub gpu: GpuActivity,
    pub ram: MetricLine,
    pub total_memory_bytes: u64,
    pub breakdown: Vec<BreakdownRow>,
    pub swap: MetricLine,
    pub thresholds: AlertLimits,
    pub top_cpu: Vec<ProcessRow>,
    pub top_mem: Vec<ProcessRow>,
}

pub fn render_detailed(input: &RenderInput<'_>) -> DetailedView {
    let sample = input.sample;
    let memory = &sample.memory;

    let line = |kind: AlertKind| MetricLine {
        percent: kind.value(sample),
        level: MetricLevel::from_value(kind.value(sample), input.limits.limit(kind)),
        firing: input.is_firing(kind),
    };

    let compressed_high = input.policy.compression_heavy(memory)
        || memory.compressed_bytes > memory.active_bytes;

    let breakdown = MemoryCategory::ALL
        .iter()
        .map(|category| BreakdownRow {
            category: *category,
            bytes: memory.bytes(*category),
            flagged: *category == MemoryCategory::Compressed
                && input.pressure != MemoryPressure::Normal
                && compressed_high,
        })
        .collect();

    DetailedView {
        sampled_at: sample.timestamp,
        pressure: input.pressure,
        lag_risk: input.lag_risk,
        cpu: line(AlertKind::Cpu),
        gpu: GpuActivity::from_processes(&sample.processes),
        ram: line(AlertKind::Memory),
        total_memory_bytes: memory.total_bytes,
        breakdown,
        swap: line(AlertKind::Swap),
        thresholds: *input.limits,
        top_cpu: input.ranking.top_cpu.iter().map(ProcessRow::cpu).collect(),
        top_mem: input.ranking.top_mem.iter().map(ProcessRow::mem).collect(),
    }
}

impl DetailedView {
    /// `NORMAL Pressure | STRESSED`
    pub fn health_title(&self) -> String {
        format!(
            "{} Pressure | {}",
            self.pressure,
            if self.lag_risk { "STRESSED" } else { "HEALTHY" }
        )
    }

    /// Plain-text stats report for pasting elsewhere
    pub fn report(&self) -> String {
        let mut lines = vec![
            format!("Monarx Snapshot - {}", self.sampled_at.format("%H:%M:%S")),
            format!(
                "CPU: {:.1}%  RAM: {:.1}%  Swap: {:.1}%",
                self.cpu.percent, self.ram.percent, self.swap.percent
            ),
            format!(
                "Pressure: {}  Lag Risk: {}",
                self.pressure,
                if self.lag_risk { "Yes" } else { "No" }
            ),
        ];
        let parts: Vec<String> = self
            .breakdown
            .iter()
            .map(|row| format!("{}: {:.2} GB", row.category.label(), row.bytes as f64 / GB))
            .collect();
        lines.push(parts.join("  "));
        lines.join("\n")
    }
}

impl fmt::Display for DetailedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.health_title())?;
        writeln!(f)?;
        writeln!(
            f,
            "CPU   {}  {:.1}% ({})",
            progress_bar(self.cpu.percent),
            self.cpu.percent,
            self.cpu.level
        )?;
        writeln!(f, "  GPU · {}", self.gpu)?;
        writeln!(f)?;
        writeln!(
            f,
            "RAM   {}  {:.1}% ({})  {:.1} GB",
            progress_bar(self.ram.percent),
            self.ram.percent,
            self.ram.level,
            self.total_memory_bytes as f64 / GB
        )?;
        for row in &self.breakdown {
            writeln!(
                f,
                "  {:<11} {:.2} GB{}",
                row.category.label(),
                row.bytes as f64 / GB,
                if row.flagged { "  (HIGH)" } else { "" }
            )?;
        }
        writeln!(
            f,
            "SWAP  {}  {:.1}% ({})",
            progress_bar(self.swap.percent),
            self.swap.percent,
            self.swap.level
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "Thresholds: CPU {:.0}% | MEM {:.0}% | SWAP {:.0}%",
            self.thresholds.cpu, self.thresholds.memory, self.thresholds.swap
        )?;
        writeln!(f)?;
        writeln!(f, "TOP CPU PROCESSES:")?;
        write_rows(f, &self.top_cpu)?;
        writeln!(f, "TOP MEMORY PROCESSES:")?;
        write_rows(f, &self.top_mem)?;
        write!(f, "Updated {}", self.sampled_at.format("%H:%M:%S"))
    }
}

fn write_rows(f: &mut fmt::Formatter<'_>, rows: &[ProcessRow]) -> fmt::Result {
    if rows.is_empty() {
        return writeln!(f, "  (none)");
    }
    for row in rows {
        writeln!(
            f,
            "  {}{}: {:.1}%",
            format_process_name(&row.name, PROCESS_NAME_WIDTH),
            if row.gpu { " [GPU]" } else { "" },
            row.percent
        )?;
    }
    Ok(())
}

/// `[■■■■■□□□□□]`, clamped to 0..=100
pub fn progress_bar(percent: f64) -> String {
    let filled = ((percent / 100.0) * BAR_WIDTH as f64).floor();
    let filled = if filled.is_nan() {
        0
    } else {
        filled.clamp(0.0, BAR_WIDTH as f64) as usize
    };
    format!(
        "[{}{}]",
        "■".repeat(filled),
        "□".repeat(BAR_WIDTH - filled)
    )
}

/// Truncate a process name to `max_len` characters
///
/// A trailing extension such as `.app` is preserved when the name is cut.
pub fn format_process_name(name: &str, max_len: usize) -> String {
    let len = name.chars().count();
    if len <= max_len {
        return name.to_string();
    }

    if let Some((base, ext)) = name.rsplit_once('.') {
        let ext_len = ext.chars().count();
        if !base.is_empty() && ext_len + 2 < max_len {
            let keep = max_len - ext_len - 2;
            let head: String = base.chars().take(keep).collect();
            return format!("{}….{}", head, ext);
        }
    }

    let head: String = name.chars().take(max_len.saturating_sub(1)).collect();
    format!("{}…", head)
}
