//! Engine counters
//!
//! Published inside every snapshot and logged on shutdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// When the engine was created
    pub started_at: DateTime<Utc>,

    /// Cycles attempted, successful or not
    pub total_cycles: u64,

    /// Cycles dropped because sampling failed or timed out
    pub skipped_cycles: u64,

    /// Notifications handed to the dispatcher
    pub notifications_dispatched: u64,

    /// Time of the last cycle that published a snapshot
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            total_cycles: 0,
            skipped_cycles: 0,
            notifications_dispatched: 0,
            last_cycle_at: None,
        }
    }

    pub fn successful_cycles(&self) -> u64 {
        self.total_cycles.saturating_sub(self.skipped_cycles)
    }

    pub fn uptime(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// One-line summary, e.g. for the shutdown log
    pub fn summary(&self) -> String {
        format!(
            "cycles={} skipped={} notifications={} uptime={}",
            self.total_cycles,
            self.skipped_cycles,
            self.notifications_dispatched,
            humantime::format_duration(Duration::from_secs(self.uptime().as_secs()))
        )
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}
