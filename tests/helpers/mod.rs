//! Shared fixtures: an engine wired to a scripted process table and a
//! terminator that records instead of signalling.
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

use ficha::daemon::autostart::XdgAutostart;
use ficha::engine::{Engine, EngineSettings};
use ficha::events::ShieldEvent;
use ficha::models::{ProcessDescriptor, SecurityLog, ShieldStatus, TerminationOutcome};
use ficha::monitor::{ProcessSource, ScanError, Scanner, Terminator};
use ficha::shield::{AuthMode, Stealth};
use ficha::store::Database;

/// Credential accepted by the development fallback (length >= 4)
pub const GOOD_CREDENTIAL: &str = "correct horse";
/// Rejected by the development fallback
pub const BAD_CREDENTIAL: &str = "no";

/// Process table that returns whatever the test put in it
#[derive(Clone)]
pub struct FakeSource {
    table: Arc<Mutex<Result<Vec<ProcessDescriptor>, ScanError>>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(Ok(Vec::new()))),
        }
    }

    pub fn set(&self, processes: Vec<ProcessDescriptor>) {
        *self.table.lock().unwrap() = Ok(processes);
    }

    pub fn fail(&self) {
        *self.table.lock().unwrap() = Err(ScanError::ProcessTableUnavailable("sandboxed".into()));
    }
}

impl ProcessSource for FakeSource {
    fn snapshot(&mut self) -> Result<Vec<ProcessDescriptor>, ScanError> {
        self.table.lock().unwrap().clone()
    }
}

pub fn process(pid: u32, name: &str) -> ProcessDescriptor {
    ProcessDescriptor {
        pid,
        name: name.to_string(),
        exe_path: None,
        start_time: 1_700_000_000 + u64::from(pid),
    }
}

/// Records every pid it is asked to kill
pub struct RecordingTerminator {
    killed: Mutex<Vec<u32>>,
    outcome: TerminationOutcome,
}

impl RecordingTerminator {
    pub fn new(outcome: TerminationOutcome) -> Self {
        Self {
            killed: Mutex::new(Vec::new()),
            outcome,
        }
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, pid: u32) -> TerminationOutcome {
        self.killed.lock().unwrap().push(pid);
        self.outcome
    }
}

pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub source: FakeSource,
    pub scanner: Scanner,
    pub terminator: Arc<RecordingTerminator>,
    pub dir: TempDir,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_outcome(TerminationOutcome::Terminated)
    }

    pub fn with_outcome(outcome: TerminationOutcome) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        Self::build(dir, db, outcome)
    }

    /// Engine backed by a database file inside `dir`
    pub fn on_disk(dir: TempDir) -> Self {
        let db = Database::open(&dir.path().join("ficha.db")).unwrap();
        Self::build(dir, db, TerminationOutcome::Terminated)
    }

    fn build(dir: TempDir, db: Database, outcome: TerminationOutcome) -> Self {
        let terminator = Arc::new(RecordingTerminator::new(outcome));
        let settings = EngineSettings {
            auth_mode: AuthMode::DevelopmentFallback { min_length: 4 },
            ..EngineSettings::default()
        };
        let engine = Engine::new(
            Arc::new(db),
            settings,
            Stealth::unsupported("systemd-resolve"),
            terminator.clone(),
            Box::new(XdgAutostart::new(&dir.path().join("autostart"), Path::new("/usr/bin/ficha"))),
        )
        .unwrap();

        let source = FakeSource::new();
        let scanner = engine.new_scanner(Box::new(source.clone()));
        Self {
            engine,
            source,
            scanner,
            terminator,
            dir,
        }
    }

    pub fn sweep(&mut self) -> Option<ficha::engine::SweepReport> {
        self.engine.sweep(&mut self.scanner)
    }

    pub fn unlock(&self) {
        assert!(self.engine.authenticate(GOOD_CREDENTIAL).unwrap());
        self.engine.activate_shield().unwrap();
    }

    pub fn logs(&self) -> Vec<SecurityLog> {
        self.engine.list_security_logs(1000).unwrap()
    }

    pub fn into_dir(self) -> TempDir {
        self.dir
    }
}

/// Everything published since the last drain
pub fn drain(rx: &mut Receiver<ShieldEvent>) -> Vec<ShieldEvent> {
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => seen.push(event),
            Err(TryRecvError::Empty) => return seen,
            Err(e) => panic!("unexpected receive error: {:?}", e),
        }
    }
}

pub fn statuses(events: &[ShieldEvent]) -> Vec<ShieldStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            ShieldEvent::ShieldStatus(status) => Some(*status),
            _ => None,
        })
        .collect()
}
