use crate::config::Config;
use crate::stats::EngineStats;
use chrono::Utc;
use monarx_core::{
    alert::{AlertEngine, AlertKind, AlertLimits, AlertState},
    error::{Error, Result, TerminationError},
    executor::ProcessController,
    memory_pressure::{MemoryPressure, PressurePolicy},
    notify::{NotificationDispatcher, Notifier},
    ranker::{rank, Ranking},
    render::{render_compact, render_detailed, DetailedView, RenderInput},
    sampler::MetricSource,
    types::Sample,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for queued notifications at shutdown
pub const DISPATCH_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Everything one cycle produced, published as a unit
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub cycle: u64,
    pub sample: Sample,
    pub pressure: MemoryPressure,
    pub lag_risk: bool,
    pub ranking: Ranking,
    pub alerts: BTreeMap<AlertKind, AlertState>,
    pub compact: String,
    pub detailed: DetailedView,
    pub stats: EngineStats,
}

/// Engine parameters, normally derived from `Config`
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub limits: AlertLimits,
    pub policy: PressurePolicy,
    pub check_every: Duration,
    pub cooldown: Duration,
    pub top_n: usize,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            limits: config.alert_limits(),
            policy: config.pressure,
            check_every: config.check_every(),
            cooldown: config.cooldown(),
            top_n: config.monitoring.top_n,
        }
    }
}

type SharedSource = Arc<Mutex<Box<dyn MetricSource>>>;

/// The recurring sample → classify → rank → alert → render → dispatch cycle
///
/// The engine is the only writer of the published snapshot. Readers get an
/// `EngineHandle` and always see a whole snapshot from a single cycle.
pub struct Engine {
    source: SharedSource,
    settings: EngineSettings,
    alerts: AlertEngine,
    dispatcher: Option<NotificationDispatcher>,
    stats: EngineStats,
    cycle: u64,
    publisher: watch::Sender<Option<Arc<Snapshot>>>,
}

impl Engine {
    /// Create an engine
    ///
    /// With a notifier, the dispatcher worker is spawned immediately, so this
    /// must run inside a tokio runtime.
    pub fn new(
        source: Box<dyn MetricSource>,
        settings: EngineSettings,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let (publisher, _) = watch::channel(None);

        Self {
            source: Arc::new(Mutex::new(source)),
            alerts: AlertEngine::new(settings.limits, settings.cooldown),
            dispatcher: notifier.map(NotificationDispatcher::spawn),
            settings,
            stats: EngineStats::new(),
            cycle: 0,
            publisher,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            snapshots: self.publisher.subscribe(),
        }
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one full cycle and publish its snapshot
    ///
    /// A failed sample skips the cycle: alert state is untouched and the
    /// previous snapshot stays published.
    pub async fn run_cycle(&mut self) -> Result<Arc<Snapshot>> {
        self.stats.total_cycles += 1;
        debug!("Starting cycle #{}", self.stats.total_cycles);

        let sample = match self.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.skipped_cycles += 1;
                error!("Cycle #{} skipped: {}", self.stats.total_cycles, e);
                return Err(e);
            }
        };

        if sample.omitted_processes > 0 {
            debug!(
                "{} processes omitted from cycle #{}",
                sample.omitted_processes, self.stats.total_cycles
            );
        }

        let policy = self.settings.policy;
        let pressure = policy.classify(&sample.memory, sample.swap_percent);
        let lag_risk = policy.lag_risk(pressure, sample.cpu_percent);
        let ranking = rank(&sample.processes, self.settings.top_n);

        let events = self.alerts.evaluate_sample(&sample);

        let input = RenderInput {
            sample: &sample,
            pressure,
            lag_risk,
            ranking: &ranking,
            alerts: self.alerts.states(),
            limits: self.alerts.limits(),
            policy: &policy,
        };
        let compact = render_compact(&input);
        let detailed = render_detailed(&input);

        for event in &events {
            match &self.dispatcher {
                Some(dispatcher) => {
                    if dispatcher.dispatch(event) {
                        self.stats.notifications_dispatched += 1;
                    }
                }
                None => info!(
                    "{} alert at {:.1}% (notifications disabled)",
                    event.kind, event.value
                ),
            }
        }

        self.cycle += 1;
        self.stats.last_cycle_at = Some(Utc::now());

        let snapshot = Arc::new(Snapshot {
            cycle: self.cycle,
            alerts: self.alerts.states().clone(),
            sample,
            pressure,
            lag_risk,
            ranking,
            compact,
            detailed,
            stats: self.stats.clone(),
        });

        self.publisher.send_replace(Some(Arc::clone(&snapshot)));
        Ok(snapshot)
    }

    /// Drive cycles until `cancel` fires, then drain pending notifications
    pub async fn run(mut self, cancel: CancellationToken) -> EngineStats {
        info!(
            "Engine started: every {}, cooldown {}, limits CPU {:.0}% / MEM {:.0}% / SWAP {:.0}%",
            humantime::format_duration(self.settings.check_every),
            humantime::format_duration(self.settings.cooldown),
            self.settings.limits.cpu,
            self.settings.limits.memory,
            self.settings.limits.swap
        );

        let mut ticker = tokio::time::interval(self.settings.check_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Engine cancellation requested");
                    break;
                }
                _ = ticker.tick() => {
                    if let Ok(snapshot) = self.run_cycle().await {
                        info!("{}", snapshot.compact);
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Stop the dispatcher and return final counters
    pub async fn shutdown(mut self) -> EngineStats {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown(DISPATCH_DRAIN_GRACE).await;
        }

        info!("Engine stopped: {}", self.stats.summary());
        self.stats
    }

    /// Sample on a blocking thread, bounded by the cycle interval
    async fn sample(&self) -> Result<Sample> {
        let source = Arc::clone(&self.source);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = match source.try_lock() {
                Ok(guard) => guard,
                // A previous sample that timed out still holds the source
                Err(TryLockError::WouldBlock) => {
                    return Err(Error::Sampling(
                        "previous sample still in progress".to_string(),
                    ))
                }
                // A panicking sample poisons the lock; the source itself is reusable
                Err(TryLockError::Poisoned(poisoned)) => {
                    debug!("Recovering metric source after a panicked sample");
                    poisoned.into_inner()
                }
            };
            guard.sample()
        });

        match tokio::time::timeout(self.settings.check_every, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::Sampling(format!("sampling task failed: {}", e))),
            Err(_) => Err(Error::Sampling(format!(
                "sampling exceeded {}",
                humantime::format_duration(self.settings.check_every)
            ))),
        }
    }
}

/// Read side of the engine, cheap to clone
#[derive(Clone)]
pub struct EngineHandle {
    snapshots: watch::Receiver<Option<Arc<Snapshot>>>,
}

impl EngineHandle {
    /// Most recent snapshot, `None` before the first successful cycle
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshots.clone()
    }

    /// Terminate a process on a blocking thread
    ///
    /// Independent of the engine task: it completes even if the engine stops
    /// in the meantime.
    pub async fn terminate(&self, pid: u32) -> std::result::Result<(), TerminationError> {
        let outcome = tokio::task::spawn_blocking(move || ProcessController::terminate(pid))
            .await
            .unwrap_or_else(|e| {
                Err(TerminationError::Unknown {
                    pid,
                    reason: e.to_string(),
                })
            });

        match &outcome {
            Ok(()) => info!("Terminate request for pid {} sent", pid),
            Err(e) if e.is_benign() => info!("Terminate request for pid {}: already gone", pid),
            Err(e) => warn!("Terminate request for pid {} failed: {}", pid, e),
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monarx_core::error::Result as CoreResult;
    use monarx_core::notify::Notification;
    use monarx_core::types::{MemoryBreakdown, ProcessInfo};
    use chrono::TimeZone;
    use std::collections::VecDeque;

    const GB: u64 = 1024 * 1024 * 1024;

    struct ScriptedSource {
        script: VecDeque<CoreResult<Sample>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<CoreResult<Sample>>) -> Box<dyn MetricSource> {
            Box::new(Self {
                script: script.into(),
            })
        }
    }

    impl MetricSource for ScriptedSource {
        fn sample(&mut self) -> CoreResult<Sample> {
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(Error::Sampling("script exhausted".to_string())))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: std::sync::Mutex<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) -> CoreResult<()> {
            self.seen.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    /// Panics on the first call, then returns a fixed sample
    struct PanicOnce {
        calls: u32,
    }

    impl MetricSource for PanicOnce {
        fn sample(&mut self) -> CoreResult<Sample> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("counter read blew up");
            }
            Ok(sample(self.calls as i64, 20.0, 40.0, 0.0))
        }
    }

    /// Blocks for `stall` on the first call only
    struct StallOnce {
        stall: Duration,
        calls: u32,
    }

    impl MetricSource for StallOnce {
        fn sample(&mut self) -> CoreResult<Sample> {
            self.calls += 1;
            if self.calls == 1 {
                std::thread::sleep(self.stall);
            }
            Ok(sample(self.calls as i64, 20.0, 40.0, 0.0))
        }
    }

    fn sample(secs: i64, cpu: f64, mem: f64, swap: f64) -> Sample {
        Sample {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            cpu_percent: cpu,
            mem_percent: mem,
            memory: MemoryBreakdown::fitted(
                3 * GB / 2,
                3 * GB / 2,
                29 * GB / 10,
                3 * GB / 2,
                10 * GB,
            ),
            swap_percent: swap,
            processes: vec![
                ProcessInfo::new(100, "Cursor Helper (Renderer)", 30.8, 2.5),
                ProcessInfo::new(50, "kernel_task", 4.9, 6.0),
            ],
            omitted_processes: 0,
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            limits: AlertLimits::default(),
            policy: PressurePolicy::default(),
            check_every: Duration::from_secs(5),
            cooldown: Duration::from_secs(120),
            top_n: 5,
        }
    }

    #[test]
    fn test_settings_from_config() {
        let settings = EngineSettings::from(&Config::default());
        assert_eq!(settings, self::settings());
    }

    #[tokio::test]
    async fn test_run_cycle_publishes_snapshot() {
        let source = ScriptedSource::new(vec![Ok(sample(0, 18.0, 80.6, 60.1))]);
        let mut engine = Engine::new(source, settings(), None);
        let handle = engine.handle();
        assert!(handle.latest().is_none());

        let snapshot = engine.run_cycle().await.unwrap();

        assert_eq!(snapshot.cycle, 1);
        assert_eq!(snapshot.pressure, MemoryPressure::Stressed);
        assert!(!snapshot.lag_risk);
        assert_eq!(snapshot.compact, "SWAP! | CPU 18% | MEM 81%");
        assert!(snapshot.alerts[&AlertKind::Swap].firing);
        assert!(snapshot.alerts[&AlertKind::Memory].firing);
        assert!(!snapshot.alerts[&AlertKind::Cpu].firing);
        assert_eq!(snapshot.ranking.top_cpu[0].pid, 100);

        let latest = handle.latest().unwrap();
        assert_eq!(latest.cycle, 1);
        assert_eq!(latest.compact, snapshot.compact);
    }

    #[tokio::test]
    async fn test_failed_sample_keeps_previous_snapshot() {
        let source = ScriptedSource::new(vec![
            Ok(sample(0, 18.0, 50.0, 0.0)),
            Err(Error::Sampling("counters unreadable".to_string())),
            Ok(sample(10, 95.0, 50.0, 0.0)),
        ]);
        let mut engine = Engine::new(source, settings(), None);
        let handle = engine.handle();

        engine.run_cycle().await.unwrap();
        assert!(engine.run_cycle().await.is_err());

        let latest = handle.latest().unwrap();
        assert_eq!(latest.cycle, 1);
        assert_eq!(engine.stats().skipped_cycles, 1);

        let third = engine.run_cycle().await.unwrap();
        assert_eq!(third.cycle, 2);
        assert_eq!(third.stats.total_cycles, 3);
        assert!(third.alerts[&AlertKind::Cpu].firing);
    }

    #[tokio::test]
    async fn test_cooldown_across_cycles() {
        let recorder = Arc::new(RecordingNotifier::default());
        let source = ScriptedSource::new(vec![
            Ok(sample(0, 90.0, 10.0, 0.0)),
            Ok(sample(30, 92.0, 10.0, 0.0)),
            Ok(sample(130, 92.0, 10.0, 0.0)),
        ]);
        let mut engine = Engine::new(source, settings(), Some(recorder.clone()));

        for _ in 0..3 {
            engine.run_cycle().await.unwrap();
        }
        assert_eq!(engine.stats().notifications_dispatched, 2);

        let stats = engine.shutdown().await;
        assert_eq!(stats.total_cycles, 3);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|n| n.id == "monarx.cpu"));
        assert_eq!(seen[1].body, "CPU at 92.0% (limit 85%)");
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let source = ScriptedSource::new(vec![Ok(sample(0, 18.0, 50.0, 0.0))]);
        let mut slow = settings();
        slow.check_every = Duration::from_secs(3600);

        let engine = Engine::new(source, slow, None);
        let mut updates = engine.handle().subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine.run(cancel.clone()));

        // First tick fires immediately
        updates.changed().await.unwrap();
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("engine did not stop promptly")
            .unwrap();
        assert_eq!(stats.total_cycles, 1);
        assert_eq!(stats.skipped_cycles, 0);
    }

    #[tokio::test]
    async fn test_run_publishes_in_cycle_order() {
        let script = (0..3)
            .map(|i| Ok(sample(i * 5, 10.0 + i as f64, 40.0, 0.0)))
            .collect();
        let mut fast = settings();
        fast.check_every = Duration::from_millis(20);

        let engine = Engine::new(ScriptedSource::new(script), fast, None);
        let mut updates = engine.handle().subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine.run(cancel.clone()));

        // Updates may coalesce; every observed snapshot must be self-consistent
        let mut seen = Vec::new();
        loop {
            updates.changed().await.unwrap();
            let snapshot = updates.borrow_and_update().clone().unwrap();
            assert_eq!(
                snapshot.sample.cpu_percent,
                10.0 + (snapshot.cycle - 1) as f64
            );
            seen.push(snapshot.cycle);
            if snapshot.cycle == 3 {
                break;
            }
        }
        cancel.cancel();
        let stats = task.await.unwrap();

        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert!(stats.total_cycles >= 3);
    }

    #[tokio::test]
    async fn test_handle_terminate_missing_pid_is_benign() {
        let engine = Engine::new(ScriptedSource::new(vec![]), settings(), None);
        let err = engine.handle().terminate(999_999).await.unwrap_err();
        assert!(err.is_benign());
    }

    #[tokio::test]
    async fn test_engine_recovers_after_panicking_sample() {
        let mut engine = Engine::new(Box::new(PanicOnce { calls: 0 }), settings(), None);

        let first = engine.run_cycle().await.unwrap_err();
        assert!(first.to_string().contains("sampling task failed"));

        for _ in 0..3 {
            assert!(engine.run_cycle().await.is_ok());
        }
        assert_eq!(engine.stats().skipped_cycles, 1);
        assert_eq!(engine.stats().total_cycles, 4);
    }

    #[tokio::test]
    async fn test_stalled_sample_is_bounded_by_interval() {
        let source = StallOnce {
            stall: Duration::from_millis(400),
            calls: 0,
        };
        let mut short = settings();
        short.check_every = Duration::from_millis(50);
        let mut engine = Engine::new(Box::new(source), short, None);

        let started = std::time::Instant::now();
        let timed_out = engine.run_cycle().await.unwrap_err();
        assert!(timed_out.to_string().contains("sampling exceeded"));
        assert!(started.elapsed() < Duration::from_millis(400));

        // The stalled thread still owns the source
        let busy = engine.run_cycle().await.unwrap_err();
        assert!(busy.to_string().contains("still in progress"));
        assert_eq!(engine.stats().skipped_cycles, 2);
        assert!(engine.handle().latest().is_none());

        tokio::time::sleep(Duration::from_millis(600)).await;

        let snapshot = engine.run_cycle().await.unwrap();
        assert_eq!(snapshot.cycle, 1);
        assert_eq!(snapshot.stats.total_cycles, 3);
        assert_eq!(snapshot.stats.skipped_cycles, 2);
    }
}
