//! Shield engine: owns the shared state and implements the control surface
//!
//! The engine is shared as `Arc<Engine>` between the scan loop, the idle check,
//! the retention task and every IPC connection. Each component guards its own
//! state with a short critical section; none is held across a signal delivery
//! or a disk write. Writers that must reach disk in order take a separate
//! ordering mutex that readers and the scan path never touch.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::constants::{
    AUTH_GRANT_TTL_SECS, DEFAULT_IDLE_TIMEOUT_MINUTES, DEFAULT_RETENTION_DAYS, DEFAULT_THREAT_DWELL_SECS,
    EVENT_CHANNEL_CAPACITY, POLICY_AUTO_KILL, POLICY_IDLE_LOCK, POLICY_STEALTH_MODE, SETTING_AUTOSTART, SETTING_IDLE_TIMEOUT,
};
use crate::daemon::autostart::Autostart;
use crate::events::{EventBus, ShieldEvent};
use crate::models::{
    AppCandidate, EngineHealth, ProtectedApp, SecurityLog, SecurityPolicy, SeverityKind, ShieldError,
    ShieldStatus, StatusReport, TerminationOutcome,
};
use crate::monitor::candidates;
use crate::monitor::{Detection, ProcessSource, ScanError, Scanner, SkipRules, Terminator};
use crate::shield::auth::{self, AuthError, AuthMode, Authenticator};
use crate::shield::{IdleTracker, PolicyEngine, ShieldStateMachine, Stealth};
use crate::store::{now_timestamp, AuditLog, Database, StoreError, WatchlistStore};

/// Tunables the engine is built with
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub threat_dwell: Duration,
    pub retention_days: u32,
    pub auth_mode: AuthMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            threat_dwell: Duration::from_secs(DEFAULT_THREAT_DWELL_SECS),
            retention_days: DEFAULT_RETENTION_DAYS,
            auth_mode: AuthMode::Unavailable,
        }
    }
}

/// Counters for one enforcement sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub observed: usize,
    pub detected: usize,
    pub terminated: usize,
}

pub struct Engine {
    db: Arc<Database>,
    bus: EventBus,
    watchlist: WatchlistStore,
    audit: AuditLog,
    policies: PolicyEngine,
    state: Arc<ShieldStateMachine>,
    idle: IdleTracker,
    auth: Authenticator,
    /// Set by a successful authentication, consumed by activation
    auth_grant: Mutex<Option<Instant>>,
    stealth: Stealth,
    terminator: Arc<dyn Terminator>,
    autostart: Box<dyn Autostart>,
    scanner_error: Mutex<Option<String>>,
    sweep_requested: Notify,
    /// Bumped when enforcement restarts; processes already handled are
    /// attacked again after a bump
    enforcement_epoch: AtomicU64,
    self_pid: u32,
}

impl Engine {
    /// Load persisted state (seeding defaults on a fresh database) and apply
    /// stealth mode if its policy is on, before any scan runs.
    pub fn new(
        db: Arc<Database>,
        settings: EngineSettings,
        stealth: Stealth,
        terminator: Arc<dyn Terminator>,
        autostart: Box<dyn Autostart>,
    ) -> Result<Arc<Self>, StoreError> {
        let bus = EventBus::new(EVENT_CHANNEL_CAPACITY);

        WatchlistStore::seed_defaults(&db)?;
        let watchlist = WatchlistStore::load(db.clone())?;
        let policies = PolicyEngine::load(db.clone())?;
        let audit = AuditLog::new(db.clone(), bus.clone(), settings.retention_days);
        let idle_timeout = db.get_int_setting(SETTING_IDLE_TIMEOUT, i64::from(DEFAULT_IDLE_TIMEOUT_MINUTES))?;

        let engine = Arc::new(Self {
            state: ShieldStateMachine::new(bus.clone(), settings.threat_dwell),
            idle: IdleTracker::new(idle_timeout),
            auth: Authenticator::new(settings.auth_mode),
            auth_grant: Mutex::new(None),
            db,
            bus,
            watchlist,
            audit,
            policies,
            stealth,
            terminator,
            autostart,
            scanner_error: Mutex::new(None),
            sweep_requested: Notify::new(),
            enforcement_epoch: AtomicU64::new(0),
            self_pid: std::process::id(),
        });

        if engine.policies.is_enabled(POLICY_STEALTH_MODE) {
            engine.apply_stealth(true);
        }

        log::info!(
            "Engine ready: {} protected apps, idle timeout {} min, auth backend {}",
            engine.watchlist.len(),
            engine.idle.timeout_minutes(),
            engine.auth.mode()
        );
        Ok(engine)
    }

    /// Restore the process name and record the stop
    pub fn shutdown(&self) {
        if self.stealth.is_active() {
            self.apply_stealth(false);
        }
        self.audit.append("Shield engine stopped", SeverityKind::Info, None);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ShieldEvent> {
        self.bus.subscribe()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Notified when a sweep should run ahead of the next tick
    pub fn sweep_requested(&self) -> &Notify {
        &self.sweep_requested
    }

    /// Scanner bound to this engine's watchlist
    pub fn new_scanner(&self, source: Box<dyn ProcessSource>) -> Scanner {
        Scanner::new(source, self.watchlist.subscribe())
    }

    // ==================== authentication ====================

    pub fn current_user(&self) -> Result<String, AuthError> {
        auth::current_user()
    }

    /// Verify a credential for the current user. Never changes the status;
    /// success allows one `activate_shield` call within the grant window.
    pub fn authenticate(&self, credential: &str) -> Result<bool, AuthError> {
        self.idle.touch();
        let verified = match self.auth.verify(credential) {
            Ok(verified) => verified,
            Err(e) => {
                log::error!("Credential verification unavailable: {}", e);
                self.audit.append(format!("Authentication unavailable: {}", e), SeverityKind::Error, None);
                return Err(e);
            }
        };

        if verified {
            *self.auth_grant.lock() = Some(Instant::now());
            self.audit.append("Authentication successful", SeverityKind::Success, None);
        } else {
            *self.auth_grant.lock() = None;
            log::warn!("Authentication failed");
            self.audit.append("Failed authentication attempt", SeverityKind::Warning, None);
        }
        Ok(verified)
    }

    fn take_auth_grant(&self) -> bool {
        self.auth_grant
            .lock()
            .take()
            .is_some_and(|granted| granted.elapsed() <= Duration::from_secs(AUTH_GRANT_TTL_SECS))
    }

    // ==================== shield status ====================

    pub fn get_shield_status(&self) -> ShieldStatus {
        self.state.status()
    }

    /// LOCKED -> ACTIVE after a successful authentication
    pub fn activate_shield(&self) -> Result<(), ShieldError> {
        if !self.take_auth_grant() {
            return Err(ShieldError::NotAuthenticated);
        }
        self.idle.touch();
        if self.state.activate() {
            self.audit.append("Shield unlocked, enforcement suspended", SeverityKind::Success, None);
        }
        Ok(())
    }

    /// ACTIVE -> LOCKED and sweep immediately. No-op if already enforcing.
    pub fn lock_shield(&self) {
        self.idle.touch();
        if self.state.lock() {
            self.restart_enforcement();
            self.audit.append("Shield locked, enforcement resumed", SeverityKind::Info, None);
            self.sweep_requested.notify_one();
        }
    }

    /// Lock if the session has been idle past the timeout.
    /// Returns true when this call locked the shield.
    pub fn check_idle(&self) -> bool {
        if !self.policies.is_enabled(POLICY_IDLE_LOCK)
            || self.state.status() != ShieldStatus::Active
            || !self.idle.is_expired()
        {
            return false;
        }

        if !self.state.lock() {
            return false;
        }
        self.restart_enforcement();
        self.bus.publish(ShieldEvent::AutoLocked(true));
        self.audit.append(
            format!(
                "Shield auto-locked after {} minutes of inactivity",
                self.idle.timeout_minutes()
            ),
            SeverityKind::Warning,
            None,
        );
        self.sweep_requested.notify_one();
        true
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            scanner_error: self.scanner_error.lock().clone(),
            auth_mode: self.auth.mode().label().to_string(),
            stealth_supported: self.stealth.is_supported(),
            stealth_active: self.stealth.is_active(),
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            status: self.state.status(),
            health: self.health(),
            idle_timeout_minutes: self.idle.timeout_minutes(),
            idle_seconds: self.idle.idle_for().as_secs(),
            protected_apps: self.watchlist.len(),
        }
    }

    // ==================== watchlist ====================

    pub fn list_protected_apps(&self) -> Vec<ProtectedApp> {
        self.watchlist.list()
    }

    pub fn add_protected_app(
        &self,
        display_name: &str,
        process_key: &str,
        category: &str,
    ) -> Result<ProtectedApp, ShieldError> {
        self.idle.touch();
        let app = self.watchlist.add(display_name, process_key, category)?;
        self.bus.publish(ShieldEvent::AppAdded(app.clone()));
        self.audit.append(
            format!("Added {} to protected apps", app.display_name),
            SeverityKind::Info,
            Some(&app.display_name),
        );
        Ok(app)
    }

    /// Audit history of the app is kept
    pub fn remove_protected_app(&self, id: &str) -> Result<(), ShieldError> {
        self.idle.touch();
        let app = self.watchlist.remove(id)?;
        self.bus.publish(ShieldEvent::AppRemoved(app.id.clone()));
        self.audit.append(
            format!("Removed {} from protected apps", app.display_name),
            SeverityKind::Info,
            Some(&app.display_name),
        );
        Ok(())
    }

    /// Suggestions for the watchlist, excluding keys already protected
    pub fn app_candidates(&self, source: &mut dyn ProcessSource) -> Vec<AppCandidate> {
        let running = match source.snapshot() {
            Ok(processes) => candidates::running_candidates(&processes),
            Err(e) => {
                log::warn!("Running processes unavailable for candidates: {}", e);
                Vec::new()
            }
        };
        let protected: Vec<String> = self.watchlist.list().into_iter().map(|app| app.process_key).collect();

        candidates::merge_candidates(candidates::installed_candidates(), running)
            .into_iter()
            .filter(|candidate| !protected.contains(&candidate.process_key.to_lowercase()))
            .collect()
    }

    // ==================== audit log ====================

    pub fn list_security_logs(&self, limit: usize) -> Result<Vec<SecurityLog>, ShieldError> {
        Ok(self.audit.recent(limit)?)
    }

    /// Returns the number of entries removed
    pub fn clear_security_logs(&self) -> Result<usize, ShieldError> {
        self.idle.touch();
        let removed = self.audit.clear()?;
        self.audit.append(
            format!("Security log cleared ({} entries)", removed),
            SeverityKind::Info,
            None,
        );
        Ok(removed)
    }

    /// Delete entries past the retention horizon
    pub fn purge_expired_logs(&self) -> Result<usize, StoreError> {
        self.audit.purge_expired()
    }

    // ==================== policies ====================

    pub fn list_security_policies(&self) -> Vec<SecurityPolicy> {
        self.policies.list()
    }

    /// Flip a policy and apply its side effect. The flip, its persistence,
    /// the stealth change and the event are ordered against other toggles.
    pub fn toggle_security_policy(&self, id: &str) -> Result<SecurityPolicy, ShieldError> {
        self.idle.touch();
        let policy = self.policies.toggle_with(id, |policy| {
            match policy.id.as_str() {
                POLICY_STEALTH_MODE => self.apply_stealth(policy.enabled),
                POLICY_AUTO_KILL => self.restart_enforcement(),
                _ => {}
            }
            self.bus.publish(ShieldEvent::PolicyToggled(policy.clone()));
        })?;

        self.audit.append(
            format!(
                "Policy '{}' {}",
                policy.title,
                if policy.enabled { "enabled" } else { "disabled" }
            ),
            SeverityKind::Info,
            None,
        );
        Ok(policy)
    }

    fn apply_stealth(&self, enabled: bool) {
        let result = if enabled {
            self.stealth.enable()
        } else {
            self.stealth.disable()
        };
        if let Err(e) = result {
            log::warn!("Stealth mode change failed: {}", e);
            self.audit.append(
                format!("Stealth mode could not be applied: {}", e),
                SeverityKind::Warning,
                None,
            );
        }
    }

    // ==================== idle ====================

    pub fn get_idle_timeout(&self) -> u32 {
        self.idle.timeout_minutes()
    }

    pub fn set_idle_timeout(&self, minutes: i64) -> Result<u32, ShieldError> {
        let minutes = self.idle.set_timeout(minutes)?;
        self.idle.touch();
        if let Err(e) = self.db.set_setting(SETTING_IDLE_TIMEOUT, &minutes.to_string()) {
            log::error!("Failed to persist idle timeout: {}", e);
        }
        self.audit.append(
            format!("Idle timeout set to {} minutes", minutes),
            SeverityKind::Info,
            None,
        );
        Ok(minutes)
    }

    pub fn reset_idle_timer(&self) {
        self.idle.touch();
    }

    // ==================== autostart ====================

    pub fn get_autostart_enabled(&self) -> Result<bool, ShieldError> {
        self.autostart
            .is_enabled()
            .map_err(|e| ShieldError::Autostart(format!("{:#}", e)))
    }

    pub fn toggle_autostart(&self, enabled: bool) -> Result<bool, ShieldError> {
        self.idle.touch();
        let result = if enabled {
            self.autostart.enable()
        } else {
            self.autostart.disable()
        };
        result.map_err(|e| ShieldError::Autostart(format!("{:#}", e)))?;

        if let Err(e) = self.db.set_setting(SETTING_AUTOSTART, if enabled { "true" } else { "false" }) {
            log::error!("Failed to persist autostart setting: {}", e);
        }
        self.audit.append(
            if enabled { "Autostart enabled" } else { "Autostart disabled" },
            SeverityKind::Info,
            None,
        );
        Ok(enabled)
    }

    // ==================== enforcement ====================

    fn restart_enforcement(&self) {
        self.enforcement_epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Run one scan pass and enforce on its detections.
    ///
    /// Returns `None` while the shield is ACTIVE or the process table cannot
    /// be read. Policy flags are read once so a toggle applies next sweep.
    /// `detected` counts every match; only processes not handled since the
    /// last lock or auto-kill toggle are enforced.
    pub fn sweep(self: &Arc<Self>, scanner: &mut Scanner) -> Option<SweepReport> {
        let flags = self.policies.enforcement_flags();
        if flags.stealth {
            if let Err(e) = self.stealth.ensure_applied() {
                log::debug!("Stealth re-apply failed: {}", e);
            }
        }

        if !self.state.status().is_enforcing() {
            return None;
        }

        let skip = SkipRules {
            self_pid: self.self_pid,
            disguised_name: flags.stealth.then(|| self.stealth.disguised_name().to_string()),
        };

        let pass = match scanner.scan(&skip) {
            Ok(pass) => {
                self.scan_recovered();
                pass
            }
            Err(e) => {
                self.scan_failed(&e);
                return None;
            }
        };

        let mut report = SweepReport {
            observed: pass.observed,
            detected: pass.detections.len(),
            terminated: 0,
        };

        // Each process is handled once per epoch: one that survives its kill
        // (or keeps running unobserved) is not attacked or audited again
        scanner.sync_epoch(self.enforcement_epoch.load(Ordering::Acquire));
        let fresh = scanner.only_new(pass.detections);

        if flags.auto_kill {
            for detection in &fresh {
                // Unlocked mid-sweep: stop enforcing
                if !self.state.status().is_enforcing() {
                    break;
                }
                if self.enforce(detection) == TerminationOutcome::Terminated {
                    report.terminated += 1;
                }
            }
        } else {
            for detection in &fresh {
                self.observe(detection);
            }
        }

        Some(report)
    }

    /// Kill, then log, then enter THREAT_DETECTED
    fn enforce(self: &Arc<Self>, detection: &Detection) -> TerminationOutcome {
        let Detection { process, app } = detection;
        let outcome = self.terminator.terminate(process.pid);
        self.watchlist.record_attempt(&app.id, &now_timestamp());

        self.audit.append(
            format!("Unauthorized launch attempt: {}", app.display_name),
            SeverityKind::Error,
            Some(&app.display_name),
        );

        match outcome {
            TerminationOutcome::Terminated => {
                log::warn!("Terminated {} (pid {}) matching {}", process.name, process.pid, app.process_key);
                self.audit.append(
                    format!("Process [{}] terminated (PID: {})", process.name, process.pid),
                    SeverityKind::Success,
                    Some(&app.display_name),
                );
                self.bus.publish(ShieldEvent::ProcessKilled {
                    pid: process.pid,
                    name: process.name.clone(),
                });
            }
            TerminationOutcome::PermissionDenied => {
                log::error!("Permission denied terminating {} (pid {})", process.name, process.pid);
                self.audit.append(
                    format!("Permission denied terminating [{}] (PID: {})", process.name, process.pid),
                    SeverityKind::Error,
                    Some(&app.display_name),
                );
            }
            TerminationOutcome::AlreadyExited => {
                log::info!("{} (pid {}) exited before termination", process.name, process.pid);
                self.audit.append(
                    format!("Process [{}] exited before termination (PID: {})", process.name, process.pid),
                    SeverityKind::Info,
                    Some(&app.display_name),
                );
            }
        }

        self.state.record_kill();
        outcome
    }

    /// Auto-kill disabled: report only
    fn observe(&self, detection: &Detection) {
        let Detection { process, app } = detection;
        self.watchlist.record_attempt(&app.id, &now_timestamp());
        log::info!("Observed {} (pid {}) with auto-kill disabled", process.name, process.pid);
        self.audit.append(
            format!(
                "Protected app {} running (PID: {}), auto-kill disabled",
                app.display_name, process.pid
            ),
            SeverityKind::Warning,
            Some(&app.display_name),
        );
    }

    fn scan_failed(&self, error: &ScanError) {
        let mut current = self.scanner_error.lock();
        if current.is_none() {
            log::error!("Process scanning unavailable: {}", error);
        }
        *current = Some(error.to_string());
    }

    fn scan_recovered(&self) {
        if let Some(previous) = self.scanner_error.lock().take() {
            log::info!("Process scanning recovered (was: {})", previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessDescriptor;
    use tempfile::tempdir;

    struct NoopTerminator;

    impl Terminator for NoopTerminator {
        fn terminate(&self, _pid: u32) -> TerminationOutcome {
            TerminationOutcome::Terminated
        }
    }

    struct EmptySource;

    impl ProcessSource for EmptySource {
        fn snapshot(&mut self) -> Result<Vec<ProcessDescriptor>, ScanError> {
            Ok(vec![ProcessDescriptor {
                pid: 7,
                name: "gimp".into(),
                exe_path: None,
                start_time: 0,
            }])
        }
    }

    fn engine(dir: &std::path::Path) -> Arc<Engine> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let settings = EngineSettings {
            auth_mode: AuthMode::DevelopmentFallback { min_length: 4 },
            ..EngineSettings::default()
        };
        Engine::new(
            db,
            settings,
            Stealth::unsupported("systemd-resolve"),
            Arc::new(NoopTerminator),
            Box::new(crate::daemon::autostart::XdgAutostart::new(dir, std::path::Path::new("/usr/bin/ficha"))),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_engine_seeds_defaults() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        assert_eq!(engine.get_shield_status(), ShieldStatus::Locked);
        assert_eq!(engine.list_protected_apps().len(), 6);
        assert_eq!(engine.list_security_policies().len(), 4);
        assert_eq!(engine.get_idle_timeout(), DEFAULT_IDLE_TIMEOUT_MINUTES);
    }

    #[test]
    fn test_activate_requires_authentication() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        assert!(matches!(engine.activate_shield(), Err(ShieldError::NotAuthenticated)));
        assert!(!engine.authenticate("abc").unwrap());
        assert!(matches!(engine.activate_shield(), Err(ShieldError::NotAuthenticated)));

        assert!(engine.authenticate("correct horse").unwrap());
        engine.activate_shield().unwrap();
        assert_eq!(engine.get_shield_status(), ShieldStatus::Active);

        // The grant is single use
        engine.lock_shield();
        assert!(matches!(engine.activate_shield(), Err(ShieldError::NotAuthenticated)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_grant_expires() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        assert!(engine.authenticate("correct horse").unwrap());
        tokio::time::advance(Duration::from_secs(AUTH_GRANT_TTL_SECS + 1)).await;
        assert!(matches!(engine.activate_shield(), Err(ShieldError::NotAuthenticated)));
    }

    #[test]
    fn test_idle_timeout_persisted_and_validated() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        assert_eq!(engine.set_idle_timeout(3).unwrap(), 3);
        assert!(matches!(engine.set_idle_timeout(11), Err(ShieldError::InvalidIdleTimeout(11))));
        assert_eq!(engine.get_idle_timeout(), 3);
        assert_eq!(engine.db.get_int_setting(SETTING_IDLE_TIMEOUT, 0).unwrap(), 3);
    }

    #[test]
    fn test_autostart_toggle() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        assert!(!engine.get_autostart_enabled().unwrap());
        assert!(engine.toggle_autostart(true).unwrap());
        assert!(engine.get_autostart_enabled().unwrap());
        assert!(!engine.toggle_autostart(false).unwrap());
        assert!(!engine.get_autostart_enabled().unwrap());
    }

    #[test]
    fn test_clear_logs_leaves_single_entry() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.lock_shield();
        engine.authenticate("no").unwrap();

        engine.clear_security_logs().unwrap();
        let logs = engine.list_security_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].event.starts_with("Security log cleared"));
    }

    #[test]
    fn test_candidates_exclude_protected_keys() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.add_protected_app("GIMP", "gimp", "Graphics").unwrap();

        let candidates = engine.app_candidates(&mut EmptySource);
        assert!(candidates.iter().all(|c| c.process_key != "gimp"));
    }

    #[test]
    fn test_health_reports_auth_mode() {
        let dir = tempdir().unwrap();
        let health = engine(dir.path()).health();
        assert_eq!(health.auth_mode, "development-fallback");
        assert!(!health.stealth_supported);
        assert!(health.scanner_error.is_none());
    }
}
