use crate::error::TerminationError;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_SETTLE: Duration = Duration::from_millis(500);

/// Sends termination signals to processes picked from a ranking
///
/// Rankings can be several cycles old by the time a user acts on them, so
/// every request re-checks that the pid still exists before signalling.
pub struct ProcessController;

impl ProcessController {
    /// Ask a process to exit (SIGTERM)
    ///
    /// `NotFound` means the process is already gone and is usually treated
    /// as success by callers (see `TerminationError::is_benign`).
    pub fn terminate(pid: u32) -> Result<(), TerminationError> {
        let target = Self::target(pid)?;

        if !Self::process_exists(pid)? {
            return Err(TerminationError::NotFound { pid });
        }

        kill(target, Signal::SIGTERM).map_err(|e| Self::classify_errno(pid, e))?;
        info!("Sent SIGTERM to process {}", pid);
        Ok(())
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL if the process is still alive
    pub fn terminate_and_wait(pid: u32, grace: Duration) -> Result<(), TerminationError> {
        Self::terminate(pid)?;

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !Self::process_exists(pid)? {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }

        if !Self::process_exists(pid)? {
            return Ok(());
        }

        warn!(
            "Process {} still alive {:?} after SIGTERM, sending SIGKILL",
            pid, grace
        );
        match kill(Self::target(pid)?, Signal::SIGKILL) {
            Ok(()) => {}
            // Exited between the check and the signal
            Err(Errno::ESRCH) => return Ok(()),
            Err(e) => return Err(Self::classify_errno(pid, e)),
        }

        thread::sleep(KILL_SETTLE);

        if Self::process_exists(pid)? {
            return Err(TerminationError::Unknown {
                pid,
                reason: "still alive after SIGKILL".to_string(),
            });
        }

        info!("Process {} killed with SIGKILL", pid);
        Ok(())
    }

    /// Check if process exists
    ///
    /// Uses kill(pid, 0) - doesn't signal the process, only checks existence
    pub fn process_exists(pid: u32) -> Result<bool, TerminationError> {
        let target = match Self::target(pid) {
            Ok(target) => target,
            Err(_) => return Ok(false),
        };

        match kill(target, None) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(Errno::EPERM) => Ok(true), // exists, owned by someone else
            Err(e) => Err(TerminationError::Unknown {
                pid,
                reason: e.to_string(),
            }),
        }
    }

    /// pid 0 and negative values address process groups, never allow them
    fn target(pid: u32) -> Result<Pid, TerminationError> {
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
            _ => Err(TerminationError::NotFound { pid }),
        }
    }

    fn classify_errno(pid: u32, errno: Errno) -> TerminationError {
        match errno {
            Errno::ESRCH => TerminationError::NotFound { pid },
            Errno::EPERM => TerminationError::PermissionDenied { pid },
            other => TerminationError::Unknown {
                pid,
                reason: other.to_string(),
            },
        }
    }
}
