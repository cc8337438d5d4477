//! Live process enumeration
//!
//! The scanner depends on the `ProcessSource` trait so tests can drive it with
//! a scripted process table; the daemon uses `SysinfoSource`.

use sysinfo::{ProcessStatus, ProcessesToUpdate, System};

use crate::models::ProcessDescriptor;

/// Enumeration failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// The process table cannot be read at all (sandboxing, missing /proc, ...)
    #[error("Process table unavailable: {0}")]
    ProcessTableUnavailable(String),
}

/// Source of process table snapshots
pub trait ProcessSource: Send {
    /// Every live process that could be read. Processes that exit or cannot be
    /// inspected mid-enumeration are left out rather than failing the call.
    fn snapshot(&mut self) -> Result<Vec<ProcessDescriptor>, ScanError>;
}

/// Process table backed by sysinfo; reuses one `System` across ticks
pub struct SysinfoSource {
    system: System,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SysinfoSource {
    fn snapshot(&mut self) -> Result<Vec<ProcessDescriptor>, ScanError> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let processes: Vec<ProcessDescriptor> = self
            .system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let name = process.name().to_string_lossy().trim().to_string();
                // Unreadable entry (exited or permission denied): skip it
                if name.is_empty() {
                    return None;
                }
                // Exited but not yet reaped: nothing left to terminate
                if process.status() == ProcessStatus::Zombie {
                    return None;
                }
                Some(ProcessDescriptor {
                    pid: pid.as_u32(),
                    name,
                    exe_path: process.exe().map(|path| path.to_path_buf()),
                    start_time: process.start_time(),
                })
            })
            .collect();

        // At the very least our own process must be visible
        if processes.is_empty() {
            return Err(ScanError::ProcessTableUnavailable(
                "no processes could be enumerated".to_string(),
            ));
        }

        Ok(processes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_source_sees_current_process() {
        let mut source = SysinfoSource::new();
        let processes = source.snapshot().unwrap();

        let current_pid = std::process::id();
        assert!(
            processes.iter().any(|p| p.pid == current_pid),
            "Should find current process"
        );
    }

    #[test]
    fn test_unreaped_child_is_not_listed() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        // Not waited on yet, so the exited child lingers as a zombie
        std::thread::sleep(std::time::Duration::from_millis(300));

        let mut source = SysinfoSource::new();
        let processes = source.snapshot().unwrap();
        let pid = child.id();
        assert!(!processes.iter().any(|p| p.pid == pid));

        child.wait().unwrap();
    }

    #[test]
    fn test_repeated_snapshots_are_stable() {
        let mut source = SysinfoSource::new();
        let first = source.snapshot().unwrap();
        let second = source.snapshot().unwrap();

        let current_pid = std::process::id();
        let find = |list: &[ProcessDescriptor]| list.iter().find(|p| p.pid == current_pid).cloned();
        assert_eq!(
            find(&first).map(|p| p.start_time),
            find(&second).map(|p| p.start_time)
        );
    }
}
