//! Monarx Core Library
//!
//! Sampling, memory pressure classification, process ranking, threshold
//! alerting and status rendering for Monarx, plus the notification and
//! process-termination side effects the engine performs.

pub mod alert;
pub mod error;
pub mod executor;
pub mod memory_pressure;
pub mod notify;
pub mod ranker;
pub mod render;
pub mod sampler;
pub mod types;

pub use alert::{AlertEngine, AlertEvent, AlertKind, AlertLimits, AlertState};
pub use error::{Error, Result, TerminationError};
pub use executor::ProcessController;
pub use memory_pressure::{MemoryPressure, PressurePolicy};
pub use notify::{Notification, NotificationDispatcher, Notifier, NotifierBackend};
pub use ranker::{rank, GpuActivity, Ranking};
pub use render::{render_compact, render_detailed, DetailedView, RenderInput};
pub use sampler::{MetricSource, SystemSampler};
pub use types::{MemoryBreakdown, MemoryCategory, ProcessInfo, Sample};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
