//! Process scanner: one enumeration + match pass per tick
//!
//! Enforcement (termination, audit, state transitions) is applied by the
//! engine on the detections returned here.

use tokio::sync::watch;

use crate::models::{ProcessDescriptor, ProtectedApp};
use crate::monitor::matcher::Matcher;
use crate::monitor::process_source::{ProcessSource, ScanError};
use crate::monitor::process_tracker::ProcessTracker;
use crate::store::watchlist::WatchlistSnapshot;

/// A live process that matched a watchlist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub process: ProcessDescriptor,
    pub app: ProtectedApp,
}

/// Processes the scanner must never report
#[derive(Debug, Clone, Default)]
pub struct SkipRules {
    /// Our own pid
    pub self_pid: u32,
    /// Disguised process name while stealth mode is active
    pub disguised_name: Option<String>,
}

impl SkipRules {
    fn skips(&self, process: &ProcessDescriptor) -> bool {
        process.pid == self.self_pid
            || self
                .disguised_name
                .as_deref()
                .is_some_and(|name| process.name == name)
    }
}

/// Result of one scan pass
#[derive(Debug, Clone, Default)]
pub struct ScanPass {
    /// Number of processes enumerated
    pub observed: usize,
    pub detections: Vec<Detection>,
}

pub struct Scanner {
    source: Box<dyn ProcessSource>,
    watchlist: watch::Receiver<WatchlistSnapshot>,
    matcher: Matcher,
    tracker: ProcessTracker,
    epoch: u64,
}

impl Scanner {
    pub fn new(source: Box<dyn ProcessSource>, mut watchlist: watch::Receiver<WatchlistSnapshot>) -> Self {
        let matcher = Matcher::new(watchlist.borrow_and_update().clone());
        Self {
            source,
            watchlist,
            matcher,
            tracker: ProcessTracker::new(),
            epoch: 0,
        }
    }

    /// Rebuild the lookup table if the store published a new list.
    /// Called once at the start of a pass so the whole pass uses one snapshot.
    fn refresh_watchlist(&mut self) {
        if self.watchlist.has_changed().unwrap_or(false) {
            let snapshot = self.watchlist.borrow_and_update().clone();
            log::debug!("Watchlist changed, {} entries", snapshot.len());
            self.matcher = Matcher::new(snapshot);
        }
    }

    /// Enumerate live processes and match them against the watchlist
    pub fn scan(&mut self, skip: &SkipRules) -> Result<ScanPass, ScanError> {
        self.refresh_watchlist();
        let processes = self.source.snapshot()?;
        let observed = processes.len();

        if self.matcher.is_empty() {
            return Ok(ScanPass { observed, detections: Vec::new() });
        }

        let detections = processes
            .into_iter()
            .filter(|process| !skip.skips(process))
            .filter_map(|process| {
                let app = self.matcher.find(&process)?.clone();
                Some(Detection { process, app })
            })
            .collect();

        Ok(ScanPass { observed, detections })
    }

    /// Keep only detections not reported by the previous call
    pub fn only_new(&mut self, detections: Vec<Detection>) -> Vec<Detection> {
        self.tracker.detect_new_processes(detections, |d| &d.process)
    }

    /// Forget reported detections when `epoch` moved since the last call
    pub fn sync_epoch(&mut self, epoch: u64) {
        if epoch != self.epoch {
            self.epoch = epoch;
            self.tracker.reset();
        }
    }

    /// Watchlist snapshot the last pass matched against
    pub fn watchlist(&self) -> &WatchlistSnapshot {
        self.matcher.watchlist()
    }
}
