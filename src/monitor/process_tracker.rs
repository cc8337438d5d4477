use std::collections::HashSet;

use crate::models::ProcessDescriptor;

/// Remembers which matched processes were already reported between scan
/// ticks, keyed by (PID, start_time) so PID reuse counts as a new process.
/// A matched process that survives its kill, or keeps running with auto-kill
/// off, would otherwise be handled again on every tick.
#[derive(Debug, Default)]
pub struct ProcessTracker {
    previous: HashSet<(u32, u64)>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the processes not present in the previous call, then make
    /// `current` the new baseline. Processes that disappeared are forgotten.
    pub fn detect_new_processes<T>(&mut self, current: Vec<T>, key: impl Fn(&T) -> &ProcessDescriptor) -> Vec<T> {
        let keys: HashSet<(u32, u64)> = current
            .iter()
            .map(|item| {
                let process = key(item);
                (process.pid, process.start_time)
            })
            .collect();

        let fresh = current
            .into_iter()
            .filter(|item| {
                let process = key(item);
                !self.previous.contains(&(process.pid, process.start_time))
            })
            .collect();

        self.previous = keys;
        fresh
    }

    /// Forget everything, so the next call reports all processes again
    pub fn reset(&mut self) {
        self.previous.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper function to create a test ProcessDescriptor
    fn create_test_process(pid: u32, start_time: u64, name: &str) -> ProcessDescriptor {
        ProcessDescriptor {
            pid,
            name: name.to_string(),
            exe_path: None,
            start_time,
        }
    }

    fn detect(tracker: &mut ProcessTracker, processes: Vec<ProcessDescriptor>) -> Vec<ProcessDescriptor> {
        tracker.detect_new_processes(processes, |p| p)
    }

    #[test]
    fn test_first_call_reports_everything() {
        let mut tracker = ProcessTracker::new();
        let fresh = detect(&mut tracker, vec![create_test_process(100, 1, "brave"), create_test_process(101, 1, "steam")]);
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn test_known_processes_not_reported_again() {
        let mut tracker = ProcessTracker::new();
        detect(&mut tracker, vec![create_test_process(100, 1, "brave")]);

        let fresh = detect(&mut tracker, vec![create_test_process(100, 1, "brave"), create_test_process(102, 5, "discord")]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].pid, 102);
    }

    #[test]
    fn test_pid_reuse_detected_as_new_process() {
        let mut tracker = ProcessTracker::new();
        detect(&mut tracker, vec![create_test_process(100, 1, "brave")]);

        let fresh = detect(&mut tracker, vec![create_test_process(100, 9, "steam")]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].name, "steam");
    }

    #[test]
    fn test_restarted_process_reported_after_gap() {
        let mut tracker = ProcessTracker::new();
        detect(&mut tracker, vec![create_test_process(100, 1, "brave")]);
        detect(&mut tracker, vec![]);

        let fresh = detect(&mut tracker, vec![create_test_process(100, 1, "brave")]);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_reset_forgets_baseline() {
        let mut tracker = ProcessTracker::new();
        detect(&mut tracker, vec![create_test_process(100, 1, "brave")]);
        tracker.reset();
        assert_eq!(detect(&mut tracker, vec![create_test_process(100, 1, "brave")]).len(), 1);
    }
}
