use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// System-wide counters could not be read; the cycle is skipped.
    #[error("Sampling error: {0}")]
    Sampling(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed terminate request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminationError {
    #[error("process {pid} does not exist")]
    NotFound { pid: u32 },

    #[error("permission denied to signal process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("failed to terminate process {pid}: {reason}")]
    Unknown { pid: u32, reason: String },
}

impl TerminationError {
    /// The process is already gone, which is what the caller wanted.
    pub fn is_benign(&self) -> bool {
        matches!(self, TerminationError::NotFound { .. })
    }

    pub fn pid(&self) -> u32 {
        match self {
            TerminationError::NotFound { pid }
            | TerminationError::PermissionDenied { pid }
            | TerminationError::Unknown { pid, .. } => *pid,
        }
    }
}
