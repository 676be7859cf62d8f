use crate::types::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Metric watched by an independent alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertKind {
    Cpu,
    Memory,
    Swap,
}

impl AlertKind {
    pub const ALL: [AlertKind; 3] = [AlertKind::Cpu, AlertKind::Memory, AlertKind::Swap];

    /// Short label used in status lines
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::Cpu => "CPU",
            AlertKind::Memory => "MEM",
            AlertKind::Swap => "SWAP",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::Cpu => "High CPU",
            AlertKind::Memory => "High Memory",
            AlertKind::Swap => "High Swap",
        }
    }

    /// Value of this kind's metric in a sample
    pub fn value(&self, sample: &Sample) -> f64 {
        match self {
            AlertKind::Cpu => sample.cpu_percent,
            AlertKind::Memory => sample.mem_percent,
            AlertKind::Swap => sample.swap_percent,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Percent thresholds, one per alert kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertLimits {
    pub cpu: f64,
    pub memory: f64,
    pub swap: f64,
}

impl Default for AlertLimits {
    fn default() -> Self {
        Self {
            cpu: 85.0,
            memory: 80.0,
            swap: 20.0,
        }
    }
}

impl AlertLimits {
    pub fn limit(&self, kind: AlertKind) -> f64 {
        match kind {
            AlertKind::Cpu => self.cpu,
            AlertKind::Memory => self.memory,
            AlertKind::Swap => self.swap,
        }
    }
}

/// Firing flag plus the time of the last emitted notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    pub firing: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
}

/// Emitted when a notification is due for an alert kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub value: f64,
    pub limit: f64,
    pub at: DateTime<Utc>,
}

/// Per-kind QUIET/FIRING state machines gated by a notification cooldown
///
/// `firing` always mirrors `value > limit`. A notification is emitted when
/// the value is above the limit and no notification for that kind went out
/// within the cooldown. `last_fired_at` survives the return to QUIET, so a
/// metric flapping around its limit notifies at most once per cooldown.
#[derive(Debug, Clone)]
pub struct AlertEngine {
    limits: AlertLimits,
    cooldown: Duration,
    states: BTreeMap<AlertKind, AlertState>,
}

impl AlertEngine {
    pub fn new(limits: AlertLimits, cooldown: Duration) -> Self {
        let states = AlertKind::ALL
            .iter()
            .map(|kind| (*kind, AlertState::default()))
            .collect();

        Self {
            limits,
            cooldown,
            states,
        }
    }

    /// Feed one metric value, returning an event if a notification is due
    pub fn evaluate(
        &mut self,
        kind: AlertKind,
        value: f64,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let limit = self.limits.limit(kind);
        let cooldown = self.cooldown;
        let state = self.states.entry(kind).or_default();
        let was_firing = state.firing;

        if value <= limit {
            if was_firing {
                info!("{} back to normal: {:.1}% <= {:.1}%", kind, value, limit);
            }
            state.firing = false;
            return None;
        }

        state.firing = true;

        let cooled_down = match state.last_fired_at {
            None => true,
            Some(last) => now
                .signed_duration_since(last)
                .to_std()
                .map(|elapsed| elapsed >= cooldown)
                .unwrap_or(false),
        };

        if !cooled_down {
            debug!(
                "{} above limit ({:.1}% > {:.1}%), notification suppressed by cooldown",
                kind, value, limit
            );
            return None;
        }

        state.last_fired_at = Some(now);
        warn!(
            "{} alert firing: {:.1}% > {:.1}%{}",
            kind,
            value,
            limit,
            if was_firing { " (repeat after cooldown)" } else { "" }
        );

        Some(AlertEvent {
            kind,
            value,
            limit,
            at: now,
        })
    }

    /// Evaluate every kind against a sample, in `AlertKind::ALL` order
    pub fn evaluate_sample(&mut self, sample: &Sample) -> Vec<AlertEvent> {
        AlertKind::ALL
            .iter()
            .filter_map(|kind| self.evaluate(*kind, kind.value(sample), sample.timestamp))
            .collect()
    }

    pub fn state(&self, kind: AlertKind) -> AlertState {
        self.states.get(&kind).copied().unwrap_or_default()
    }

    pub fn states(&self) -> &BTreeMap<AlertKind, AlertState> {
        &self.states
    }

    pub fn any_firing(&self) -> bool {
        self.states.values().any(|s| s.firing)
    }

    pub fn limits(&self) -> &AlertLimits {
        &self.limits
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryBreakdown;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn engine() -> AlertEngine {
        AlertEngine::new(AlertLimits::default(), Duration::from_secs(120))
    }

    #[test]
    fn test_initial_state_is_quiet() {
        let engine = engine();
        for kind in AlertKind::ALL {
            let state = engine.state(kind);
            assert!(!state.firing);
            assert!(state.last_fired_at.is_none());
        }
        assert!(!engine.any_firing());
    }

    #[test]
    fn test_cooldown_sequence() {
        let mut engine = engine();

        let first = engine.evaluate(AlertKind::Cpu, 90.0, t(0));
        assert!(first.is_some());
        assert_eq!(first.map(|e| e.limit), Some(85.0));

        assert!(engine.evaluate(AlertKind::Cpu, 92.0, t(30)).is_none());
        assert!(engine.state(AlertKind::Cpu).firing);

        let third = engine.evaluate(AlertKind::Cpu, 92.0, t(130));
        assert!(third.is_some());
        assert_eq!(engine.state(AlertKind::Cpu).last_fired_at, Some(t(130)));
    }

    #[test]
    fn test_recovery_keeps_last_fired_at() {
        let mut engine = engine();

        engine.evaluate(AlertKind::Swap, 60.0, t(0));
        assert!(engine.state(AlertKind::Swap).firing);

        assert!(engine.evaluate(AlertKind::Swap, 20.0, t(5)).is_none());
        let state = engine.state(AlertKind::Swap);
        assert!(!state.firing);
        assert_eq!(state.last_fired_at, Some(t(0)));
    }

    #[test]
    fn test_flapping_metric_notifies_once_per_cooldown() {
        let mut engine = engine();
        let mut events = 0;

        for step in 0..24 {
            let value = if step % 2 == 0 { 95.0 } else { 50.0 };
            if engine.evaluate(AlertKind::Cpu, value, t(step * 5)).is_some() {
                events += 1;
            }
        }

        // 0..115s is a single cooldown window
        assert_eq!(events, 1);
        assert!(engine.evaluate(AlertKind::Cpu, 95.0, t(120)).is_some());
    }

    #[test]
    fn test_firing_shows_immediately_within_cooldown() {
        let mut engine = engine();

        engine.evaluate(AlertKind::Memory, 90.0, t(0));
        engine.evaluate(AlertKind::Memory, 50.0, t(5));
        assert!(engine.evaluate(AlertKind::Memory, 90.0, t(10)).is_none());
        assert!(engine.state(AlertKind::Memory).firing);
    }

    #[test]
    fn test_value_equal_to_limit_does_not_fire() {
        let mut engine = engine();
        assert!(engine.evaluate(AlertKind::Cpu, 85.0, t(0)).is_none());
        assert!(!engine.state(AlertKind::Cpu).firing);
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut engine = engine();

        assert!(engine.evaluate(AlertKind::Cpu, 99.0, t(0)).is_some());
        assert!(engine.evaluate(AlertKind::Memory, 99.0, t(1)).is_some());
        assert!(!engine.state(AlertKind::Swap).firing);
    }

    #[test]
    fn test_clock_going_backwards_suppresses() {
        let mut engine = engine();
        engine.evaluate(AlertKind::Cpu, 99.0, t(100));
        assert!(engine.evaluate(AlertKind::Cpu, 99.0, t(0)).is_none());
    }

    #[test]
    fn test_evaluate_sample() {
        let mut engine = engine();
        let sample = Sample {
            timestamp: t(0),
            cpu_percent: 18.0,
            mem_percent: 80.5,
            memory: MemoryBreakdown::default(),
            swap_percent: 60.1,
            processes: vec![],
            omitted_processes: 0,
        };

        let events = engine.evaluate_sample(&sample);
        let kinds: Vec<AlertKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![AlertKind::Memory, AlertKind::Swap]);
        assert!(!engine.state(AlertKind::Cpu).firing);
    }

    #[test]
    fn test_alert_kind_labels() {
        assert_eq!(AlertKind::Memory.label(), "MEM");
        assert_eq!(AlertKind::Swap.title(), "High Swap");
        assert_eq!(
            serde_json::to_string(&AlertKind::Memory).expect("serialize"),
            "\"MEMORY\""
        );
    }
}
