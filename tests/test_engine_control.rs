//! Control surface: authentication, idle lock, watchlist and persistence

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use ficha::constants::{POLICY_AUTO_KILL, POLICY_IDLE_LOCK};
use ficha::events::ShieldEvent;
use ficha::models::{SeverityKind, ShieldError, ShieldStatus};
use ficha::monitor::SkipRules;
use ficha::shield::PolicyEngine;
use ficha::store::Database;
use helpers::{drain, process, statuses, FakeSource, TestEngine, BAD_CREDENTIAL, GOOD_CREDENTIAL};

#[test]
fn test_wrong_credential_leaves_status_unchanged() {
    let t = TestEngine::new();
    let mut rx = t.engine.subscribe();

    assert!(!t.engine.authenticate(BAD_CREDENTIAL).unwrap());
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Locked);
    assert!(matches!(t.engine.activate_shield(), Err(ShieldError::NotAuthenticated)));
    assert!(statuses(&drain(&mut rx)).is_empty());

    let failed = t
        .logs()
        .into_iter()
        .find(|l| l.event == "Failed authentication attempt")
        .expect("failed attempt audited");
    assert_eq!(failed.severity_kind, SeverityKind::Warning);
}

#[test]
fn test_authenticate_alone_does_not_unlock() {
    let t = TestEngine::new();
    assert!(t.engine.authenticate(GOOD_CREDENTIAL).unwrap());
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Locked);

    t.engine.activate_shield().unwrap();
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Active);
}

#[test]
fn test_failed_attempt_revokes_pending_grant() {
    let t = TestEngine::new();
    assert!(t.engine.authenticate(GOOD_CREDENTIAL).unwrap());
    assert!(!t.engine.authenticate(BAD_CREDENTIAL).unwrap());
    assert!(matches!(t.engine.activate_shield(), Err(ShieldError::NotAuthenticated)));
}

#[test]
fn test_activate_and_lock_publish_one_transition_each() {
    let t = TestEngine::new();
    let mut rx = t.engine.subscribe();

    t.unlock();
    t.engine.lock_shield();
    t.engine.lock_shield();

    assert_eq!(
        statuses(&drain(&mut rx)),
        vec![ShieldStatus::Active, ShieldStatus::Locked]
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_locks_exactly_once() {
    let t = TestEngine::new();
    t.engine.set_idle_timeout(1).unwrap();
    t.unlock();
    let mut rx = t.engine.subscribe();

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(!t.engine.check_idle());
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Active);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(t.engine.check_idle());
    assert!(!t.engine.check_idle());
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Locked);

    let events: Vec<ShieldEvent> = drain(&mut rx)
        .into_iter()
        .filter(|e| !matches!(e, ShieldEvent::SecurityLog(_)))
        .collect();
    assert_eq!(
        events,
        vec![
            ShieldEvent::ShieldStatus(ShieldStatus::Locked),
            ShieldEvent::AutoLocked(true)
        ]
    );
    assert!(t
        .logs()
        .iter()
        .any(|l| l.event == "Shield auto-locked after 1 minutes of inactivity"));
}

#[tokio::test(start_paused = true)]
async fn test_activity_resets_idle_timer() {
    let t = TestEngine::new();
    t.engine.set_idle_timeout(1).unwrap();
    t.unlock();

    tokio::time::advance(Duration::from_secs(50)).await;
    t.engine.reset_idle_timer();
    tokio::time::advance(Duration::from_secs(50)).await;
    assert!(!t.engine.check_idle());
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_idle_lock_policy_disabled_keeps_shield_active() {
    let t = TestEngine::new();
    t.engine.set_idle_timeout(1).unwrap();
    t.engine.toggle_security_policy(POLICY_IDLE_LOCK).unwrap();
    t.unlock();

    tokio::time::advance(Duration::from_secs(120)).await;
    assert!(!t.engine.check_idle());
    assert_eq!(t.engine.get_shield_status(), ShieldStatus::Active);
}

#[test]
fn test_idle_timeout_bounds() {
    let t = TestEngine::new();
    for invalid in [0, 11, -3] {
        assert!(matches!(
            t.engine.set_idle_timeout(invalid),
            Err(ShieldError::InvalidIdleTimeout(v)) if v == invalid
        ));
    }
    assert_eq!(t.engine.set_idle_timeout(10).unwrap(), 10);
    assert_eq!(t.engine.set_idle_timeout(1).unwrap(), 1);
    assert_eq!(t.engine.get_idle_timeout(), 1);
}

#[test]
fn test_duplicate_keys_rejected_case_insensitively() {
    let t = TestEngine::new();
    let before = t.engine.list_protected_apps().len();

    let err = t.engine.add_protected_app("Brave Again", "BRAVE", "Browser").unwrap_err();
    assert!(matches!(err, ShieldError::DuplicateKey(_)));
    assert_eq!(err.code(), 409);
    assert_eq!(t.engine.list_protected_apps().len(), before);
}

#[test]
fn test_add_then_remove_restores_watchlist() {
    let t = TestEngine::new();
    let mut rx = t.engine.subscribe();
    let before: Vec<String> = t.engine.list_protected_apps().into_iter().map(|a| a.id).collect();

    let app = t.engine.add_protected_app("GIMP", "gimp", "Graphics").unwrap();
    assert!(t.engine.list_protected_apps().iter().any(|a| a.id == app.id));

    t.engine.remove_protected_app(&app.id).unwrap();
    let after: Vec<String> = t.engine.list_protected_apps().into_iter().map(|a| a.id).collect();
    assert_eq!(before, after);

    let events = drain(&mut rx);
    assert!(events.contains(&ShieldEvent::AppAdded(app.clone())));
    assert!(events.contains(&ShieldEvent::AppRemoved(app.id.clone())));

    let err = t.engine.remove_protected_app(&app.id).unwrap_err();
    assert_eq!(err.code(), 404);
}

#[test]
fn test_unknown_policy_toggle_is_not_found() {
    let t = TestEngine::new();
    let err = t.engine.toggle_security_policy("no-such-policy").unwrap_err();
    assert!(matches!(err, ShieldError::NotFound { .. }));
}

#[test]
fn test_policy_toggle_publishes_and_audits() {
    let t = TestEngine::new();
    let mut rx = t.engine.subscribe();

    let policy = t.engine.toggle_security_policy(POLICY_AUTO_KILL).unwrap();
    assert!(!policy.enabled);
    assert!(drain(&mut rx).contains(&ShieldEvent::PolicyToggled(policy.clone())));
    assert!(t
        .logs()
        .iter()
        .any(|l| l.event == format!("Policy '{}' disabled", policy.title)));
}

#[test]
fn test_security_log_newest_first_and_limited() {
    let t = TestEngine::new();
    t.engine.add_protected_app("One", "one", "Other").unwrap();
    t.engine.add_protected_app("Two", "two", "Other").unwrap();

    let logs = t.engine.list_security_logs(1).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].event, "Added Two to protected apps");
}

#[test]
fn test_concurrent_mutations_never_tear_the_watchlist() {
    let t = TestEngine::new();
    let engine = Arc::clone(&t.engine);
    let seeded = engine.list_protected_apps().len();

    // One running process for every key the workers will ever add
    let source = FakeSource::new();
    source.set(
        (0..4)
            .flat_map(|worker| (0..25).map(move |i| (worker, i)))
            .enumerate()
            .map(|(n, (worker, i))| process(500_000 + n as u32, &format!("app-{}-{}", worker, i)))
            .collect(),
    );
    let mut scanner = engine.new_scanner(Box::new(source));

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let engine = Arc::clone(&engine);
            scope.spawn(move || {
                for i in 0..25 {
                    let key = format!("app-{}-{}", worker, i);
                    let app = engine.add_protected_app(&key, &key, "Other").unwrap();
                    if i % 5 == 0 {
                        engine.remove_protected_app(&app.id).unwrap();
                    }
                }
            });
        }

        let reader = Arc::clone(&engine);
        scope.spawn(move || {
            for _ in 0..200 {
                let apps = reader.list_protected_apps();
                let mut keys: Vec<&str> = apps.iter().map(|a| a.process_key.as_str()).collect();
                let total = keys.len();
                keys.sort_unstable();
                keys.dedup();
                assert_eq!(keys.len(), total, "duplicate key in listing");

                let pass = scanner.scan(&SkipRules::default()).unwrap();
                let snapshot = scanner.watchlist();
                assert!(snapshot.len() >= seeded && snapshot.len() <= seeded + 100);

                let mut keys: Vec<&str> = snapshot.iter().map(|a| a.process_key.as_str()).collect();
                keys.sort_unstable();
                keys.dedup();
                assert_eq!(keys.len(), snapshot.len(), "duplicate key in scan snapshot");

                // The whole pass matched against exactly this snapshot
                let added = snapshot.iter().filter(|a| a.process_key.starts_with("app-")).count();
                assert_eq!(pass.detections.len(), added);
                assert!(pass
                    .detections
                    .iter()
                    .all(|d| snapshot.iter().any(|a| a.id == d.app.id)));
            }
        });
    });

    // 4 workers x 25 adds, 5 of each worker's entries removed
    assert_eq!(engine.list_protected_apps().len(), seeded + 4 * 20);
}

#[test]
fn test_concurrent_policy_toggles_stay_ordered_and_persisted() {
    let t = TestEngine::on_disk(tempfile::tempdir().unwrap());
    let mut rx = t.engine.subscribe();
    let db_path = t.dir.path().join("ficha.db");
    let mut published = Vec::new();

    for round in 0..30 {
        std::thread::scope(|scope| {
            for _ in 0..3 {
                let engine = Arc::clone(&t.engine);
                scope.spawn(move || engine.toggle_security_policy(POLICY_AUTO_KILL).unwrap());
            }
        });

        published.extend(drain(&mut rx).into_iter().filter_map(|event| match event {
            ShieldEvent::PolicyToggled(policy) => Some(policy.enabled),
            _ => None,
        }));

        let on_disk = PolicyEngine::load(Arc::new(Database::open(&db_path).unwrap())).unwrap();
        assert_eq!(
            on_disk.is_enabled(POLICY_AUTO_KILL),
            t.engine
                .list_security_policies()
                .iter()
                .any(|p| p.id == POLICY_AUTO_KILL && p.enabled),
            "round {}",
            round
        );
    }

    // Enabled by default, so events alternate starting from disabled
    assert_eq!(published.len(), 90);
    for (n, enabled) in published.iter().enumerate() {
        assert_eq!(*enabled, n % 2 == 1);
    }
}

#[test]
fn test_state_survives_restart() {
    let t = TestEngine::on_disk(tempfile::tempdir().unwrap());
    let app = t.engine.add_protected_app("GIMP", "gimp", "Graphics").unwrap();
    t.engine.toggle_security_policy(POLICY_AUTO_KILL).unwrap();
    t.engine.set_idle_timeout(4).unwrap();
    t.engine.shutdown();
    let dir = t.into_dir();

    let reopened = TestEngine::on_disk(dir);
    assert!(reopened.engine.list_protected_apps().iter().any(|a| a.id == app.id));
    assert!(!reopened
        .engine
        .list_security_policies()
        .iter()
        .find(|p| p.id == POLICY_AUTO_KILL)
        .unwrap()
        .enabled);
    assert_eq!(reopened.engine.get_idle_timeout(), 4);
    assert_eq!(reopened.engine.get_shield_status(), ShieldStatus::Locked);
    assert!(reopened.logs().iter().any(|l| l.event == "Shield engine stopped"));
}
