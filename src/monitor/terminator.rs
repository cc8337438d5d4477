//! Forced process termination

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::models::TerminationOutcome;

/// Delivers the termination signal for matched processes
pub trait Terminator: Send + Sync {
    fn terminate(&self, pid: u32) -> TerminationOutcome;
}

/// SIGKILL delivery; the target cannot catch, block or delay it
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalTerminator;

impl Terminator for SignalTerminator {
    fn terminate(&self, pid: u32) -> TerminationOutcome {
        // 0 and negative values address process groups, never a single target
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => {
                log::error!("Refusing to signal invalid pid {}", pid);
                return TerminationOutcome::PermissionDenied;
            }
        };
        if pid == std::process::id() {
            log::error!("Refusing to signal own process {}", pid);
            return TerminationOutcome::PermissionDenied;
        }

        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => TerminationOutcome::Terminated,
            Err(Errno::ESRCH) => TerminationOutcome::AlreadyExited,
            Err(Errno::EPERM) => TerminationOutcome::PermissionDenied,
            Err(other) => {
                log::warn!("Unexpected error signalling pid {}: {}", pid, other);
                TerminationOutcome::PermissionDenied
            }
        }
    }
}
