use crate::alert::{AlertEvent, AlertKind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External notifier commands are killed after this long
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// One native notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Stable per alert kind, so repeated alerts replace each other
    pub id: String,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn from_event(event: &AlertEvent) -> Self {
        Self {
            id: Self::id_for(event.kind),
            title: event.kind.title().to_string(),
            body: format!(
                "{} at {:.1}% (limit {:.0}%)",
                event.kind.label(),
                event.value,
                event.limit
            ),
        }
    }

    pub fn id_for(kind: AlertKind) -> String {
        format!("monarx.{}", kind.label().to_lowercase())
    }
}

/// Delivers notifications to the OS
///
/// Called from a blocking thread, so implementations may spawn processes
/// and wait for them.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// macOS Notification Center through `osascript`
pub struct OsascriptNotifier;

impl OsascriptNotifier {
    pub fn script(notification: &Notification) -> String {
        format!(
            "display notification \"{}\" with title \"Monarx\" subtitle \"{}\"",
            escape_applescript(&notification.body),
            escape_applescript(&notification.title)
        )
    }
}

impl Notifier for OsascriptNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        let mut cmd = Command::new("osascript");
        cmd.arg("-e").arg(Self::script(notification));
        run_with_timeout(cmd, COMMAND_TIMEOUT)
    }
}

/// freedesktop notifications through `notify-send`
pub struct NotifySendNotifier;

impl Notifier for NotifySendNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        let mut cmd = Command::new("notify-send");
        cmd.arg("--app-name=Monarx")
            .arg("--urgency=critical")
            .arg(format!(
                "--hint=string:x-canonical-private-synchronous:{}",
                notification.id
            ))
            .arg(&notification.title)
            .arg(&notification.body);
        run_with_timeout(cmd, COMMAND_TIMEOUT)
    }
}

/// Writes notifications to the log only
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        warn!(
            "🔔 {} [{}]: {}",
            notification.title, notification.id, notification.body
        );
        Ok(())
    }
}

/// Escape a string for use inside an AppleScript string literal
pub fn escape_applescript(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' | '\r' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

/// Run a command, killing it if it outlives `timeout`
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::Notification(format!("Failed to run {}: {}", program, e)))?;

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            if status.success() {
                return Ok(());
            }
            return Err(Error::Notification(format!(
                "{} exited with {}",
                program, status
            )));
        }

        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Notification(format!(
                "{} timed out after {:?}",
                program, timeout
            )));
        }

        thread::sleep(Duration::from_millis(50));
    }
}

/// Which notifier to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifierBackend {
    /// osascript on macOS, notify-send on Linux, log elsewhere
    #[default]
    Auto,
    Osascript,
    NotifySend,
    Log,
}

impl NotifierBackend {
    /// Resolve `Auto` for the current target OS
    pub fn resolve(self) -> Self {
        match self {
            NotifierBackend::Auto => {
                if cfg!(target_os = "macos") {
                    NotifierBackend::Osascript
                } else if cfg!(target_os = "linux") {
                    NotifierBackend::NotifySend
                } else {
                    NotifierBackend::Log
                }
            }
            other => other,
        }
    }

    pub fn build(self) -> Arc<dyn Notifier> {
        match self.resolve() {
            NotifierBackend::Osascript => Arc::new(OsascriptNotifier),
            NotifierBackend::NotifySend => Arc::new(NotifySendNotifier),
            NotifierBackend::Log | NotifierBackend::Auto => Arc::new(LogNotifier),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotifierBackend::Auto => "auto",
            NotifierBackend::Osascript => "osascript",
            NotifierBackend::NotifySend => "notify-send",
            NotifierBackend::Log => "log",
        }
    }
}

impl fmt::Display for NotifierBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget delivery of alert notifications
///
/// `dispatch` only enqueues. A worker task drains the queue and calls the
/// notifier on a blocking thread, so a slow or hung notification command
/// never delays the sampling cycle. Delivery failures are logged and
/// dropped; alert state is not touched.
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
    worker: JoinHandle<()>,
    delivered: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    /// Start the worker; must be called inside a tokio runtime
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let delivered = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let worker = {
            let delivered = Arc::clone(&delivered);
            let failed = Arc::clone(&failed);
            tokio::spawn(async move {
                while let Some(notification) = rx.recv().await {
                    let notifier = Arc::clone(&notifier);
                    let id = notification.id.clone();
                    let outcome =
                        tokio::task::spawn_blocking(move || notifier.notify(&notification)).await;

                    match outcome {
                        Ok(Ok(())) => {
                            delivered.fetch_add(1, Ordering::Relaxed);
                            debug!("Notification {} delivered", id);
                        }
                        Ok(Err(e)) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            warn!("Notification {} not delivered: {}", id, e);
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            warn!("Notification {} worker failed: {}", id, e);
                        }
                    }
                }
                debug!("Notification queue closed");
            })
        };

        Self {
            tx,
            worker,
            delivered,
            failed,
        }
    }

    /// Queue a notification for an alert event
    ///
    /// Returns false if the worker is gone and the notification was dropped.
    pub fn dispatch(&self, event: &AlertEvent) -> bool {
        let notification = Notification::from_event(event);
        match self.tx.send(notification) {
            Ok(()) => true,
            Err(e) => {
                warn!("Notification dropped, dispatcher stopped: {}", e.0.id);
                false
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Close the queue and wait up to `grace` for queued notifications
    pub async fn shutdown(self, grace: Duration) {
        let NotificationDispatcher { tx, worker, .. } = self;
        drop(tx);

        match tokio::time::timeout(grace, worker).await {
            Ok(Ok(())) => info!("Notification dispatcher drained"),
            Ok(Err(e)) => warn!("Notification worker panicked: {}", e),
            Err(_) => warn!(
                "Notification dispatcher did not drain within {:?}, abandoning queue",
                grace
            ),
        }
    }
}
