//! Enforcement behavior of the engine against a scripted process table

mod helpers;

use std::time::Duration;

use ficha::constants::{DEFAULT_THREAT_DWELL_SECS, POLICY_AUTO_KILL, POLICY_STEALTH_MODE};
use ficha::events::ShieldEvent;
use ficha::models::{SeverityKind, ShieldStatus, TerminationOutcome};
use helpers::{drain, process, statuses, TestEngine};

const DWELL: Duration = Duration::from_secs(DEFAULT_THREAT_DWELL_SECS);

#[tokio::test(start_paused = true)]
async fn test_locked_shield_kills_then_reverts_after_dwell() {
    let mut t = TestEngine::new();
    let mut rx = t.engine.subscribe();
    t.source.set(vec![process(100, "brave"), process(101, "bash")]);

    let report = t.sweep().expect("locked shield sweeps");
    assert_eq!(report.observed, 2);
    assert_eq!(report.detected, 1);
    assert_eq!(report.terminated, 1);
    assert_eq!(t.terminator.killed(), vec![100]);
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::ThreatDetected);

    let events = drain(&mut rx);
    assert_eq!(statuses(&events), vec![ShieldStatus::ThreatDetected]);
    assert!(events.contains(&ShieldEvent::ProcessKilled {
        pid: 100,
        name: "brave".into()
    }));

    tokio::time::sleep(DWELL + Duration::from_millis(100)).await;
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Locked);
    assert_eq!(statuses(&drain(&mut rx)), vec![ShieldStatus::Locked]);
}

#[tokio::test(start_paused = true)]
async fn test_kill_writes_attempt_and_outcome_entries() {
    let mut t = TestEngine::new();
    t.source.set(vec![process(100, "brave")]);
    t.sweep();

    let logs = t.logs();
    let attempt = logs
        .iter()
        .find(|l| l.event == "Unauthorized launch attempt: Brave Browser")
        .expect("attempt entry");
    assert_eq!(attempt.severity_kind, SeverityKind::Error);
    assert_eq!(attempt.related_app.as_deref(), Some("Brave Browser"));

    let outcome = logs
        .iter()
        .find(|l| l.event == "Process [brave] terminated (PID: 100)")
        .expect("outcome entry");
    assert_eq!(outcome.severity_kind, SeverityKind::Success);

    let brave = t
        .engine
        .list_protected_apps()
        .into_iter()
        .find(|a| a.process_key == "brave")
        .unwrap();
    assert!(brave.last_attempt.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_variant_process_names_are_matched() {
    let mut t = TestEngine::new();
    t.source.set(vec![
        process(200, "brave-browser"),
        process(201, "Discord"),
        process(202, "bravery"),
    ]);

    let report = t.sweep().unwrap();
    assert_eq!(report.terminated, 2);
    let mut killed = t.terminator.killed();
    killed.sort_unstable();
    assert_eq!(killed, vec![200, 201]);
}

#[tokio::test(start_paused = true)]
async fn test_active_shield_never_terminates() {
    let mut t = TestEngine::new();
    t.unlock();
    t.source.set(vec![process(100, "brave"), process(101, "steam")]);

    assert!(t.sweep().is_none());
    assert!(t.terminator.killed().is_empty());
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_lock_resumes_enforcement_and_requests_sweep() {
    let mut t = TestEngine::new();
    t.unlock();
    t.source.set(vec![process(100, "brave")]);
    assert!(t.sweep().is_none());

    t.engine.lock_shield();
    tokio::time::timeout(Duration::from_secs(1), t.engine.sweep_requested().notified())
        .await
        .expect("lock requests an immediate sweep");

    assert_eq!(t.sweep().unwrap().terminated, 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_outcome_enters_threat_detected() {
    let mut t = TestEngine::with_outcome(TerminationOutcome::PermissionDenied);
    let mut rx = t.engine.subscribe();
    t.source.set(vec![process(100, "steam")]);

    let report = t.sweep().unwrap();
    assert_eq!(report.terminated, 0);
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::ThreatDetected);

    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, ShieldEvent::ProcessKilled { .. })));
    assert!(t
        .logs()
        .iter()
        .any(|l| l.event.starts_with("Permission denied terminating [steam]")));
}

#[tokio::test(start_paused = true)]
async fn test_unkillable_process_handled_once_until_relock() {
    let mut t = TestEngine::with_outcome(TerminationOutcome::PermissionDenied);
    let mut rx = t.engine.subscribe();
    t.source.set(vec![process(100, "steam")]);

    for _ in 0..10 {
        let report = t.sweep().unwrap();
        assert_eq!(report.detected, 1);
    }

    assert_eq!(t.terminator.killed(), vec![100]);
    let steam_entries = t
        .logs()
        .iter()
        .filter(|l| l.related_app.as_deref() == Some("Steam"))
        .count();
    assert_eq!(steam_entries, 2);
    assert_eq!(statuses(&drain(&mut rx)), vec![ShieldStatus::ThreatDetected]);

    // Same pid, new process
    t.source.set(vec![ficha::models::ProcessDescriptor {
        start_time: 1,
        ..process(100, "steam")
    }]);
    t.sweep();
    assert_eq!(t.terminator.killed(), vec![100, 100]);

    // Locking again retries what is still running
    tokio::time::sleep(DWELL + Duration::from_millis(100)).await;
    t.unlock();
    t.engine.lock_shield();
    t.sweep();
    assert_eq!(t.terminator.killed(), vec![100, 100, 100]);
}

#[tokio::test(start_paused = true)]
async fn test_auto_kill_disabled_observes_once() {
    let mut t = TestEngine::new();
    let policy = t.engine.toggle_security_policy(POLICY_AUTO_KILL).unwrap();
    assert!(!policy.enabled);

    t.source.set(vec![process(100, "slack")]);
    t.sweep();
    t.sweep();

    assert!(t.terminator.killed().is_empty());
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Locked);
    let observed = t
        .logs()
        .iter()
        .filter(|l| l.event.starts_with("Protected app Slack running"))
        .count();
    assert_eq!(observed, 1);

    // A restarted process is a new observation
    t.source.set(vec![process(300, "slack")]);
    t.sweep();
    let observed = t
        .logs()
        .iter()
        .filter(|l| l.event.starts_with("Protected app Slack running"))
        .count();
    assert_eq!(observed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_watchlist_changes_apply_to_next_sweep() {
    let mut t = TestEngine::new();
    t.source.set(vec![process(100, "gimp")]);
    assert_eq!(t.sweep().unwrap().detected, 0);

    let app = t.engine.add_protected_app("GIMP", "gimp", "Graphics").unwrap();
    assert_eq!(t.sweep().unwrap().terminated, 1);

    tokio::time::sleep(DWELL + Duration::from_millis(100)).await;
    t.engine.remove_protected_app(&app.id).unwrap();
    assert_eq!(t.sweep().unwrap().detected, 0);
    assert_eq!(t.terminator.killed(), vec![100]);
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_process_table_reported_in_health() {
    let mut t = TestEngine::new();
    t.source.fail();

    assert!(t.sweep().is_none());
    assert!(t.sweep().is_none());
    let error = t.engine.health().scanner_error.expect("scanner error reported");
    assert!(error.contains("sandboxed"));
    assert!(t.terminator.killed().is_empty());

    t.source.set(vec![process(100, "brave")]);
    assert_eq!(t.sweep().unwrap().terminated, 1);
    assert!(t.engine.health().scanner_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disguised_name_skipped_while_stealth_enabled() {
    let mut t = TestEngine::new();
    t.engine
        .add_protected_app("Resolver", "systemd-resolve", "Other")
        .unwrap();
    t.source.set(vec![process(400, "systemd-resolve")]);

    t.engine.toggle_security_policy(POLICY_STEALTH_MODE).unwrap();
    assert_eq!(t.sweep().unwrap().detected, 0);

    t.engine.toggle_security_policy(POLICY_STEALTH_MODE).unwrap();
    assert_eq!(t.sweep().unwrap().terminated, 1);
}

#[tokio::test(start_paused = true)]
async fn test_own_process_never_matched() {
    let mut t = TestEngine::new();
    t.engine.add_protected_app("Self", "self-test", "Other").unwrap();
    t.source.set(vec![process(std::process::id(), "self-test")]);

    assert_eq!(t.sweep().unwrap().detected, 0);
}
