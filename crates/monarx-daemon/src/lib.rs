//! Monarx Daemon
//!
//! Configuration, the recurring monitoring cycle and the snapshot handle
//! shared with presentation front ends.

pub mod config;
pub mod engine;
pub mod stats;

pub use crate::config::{Config, ConfigError};
pub use engine::{Engine, EngineHandle, EngineSettings, Snapshot};
pub use stats::EngineStats;
