//! Daemon runtime: wires the engine to the OS and runs its background tasks
//!
//! - Configuration loading and validation
//! - Scan loop, idle check and audit retention tasks
//! - Inter-process communication for the CLI and other clients
//! - Autostart integration and structured logging

pub mod autostart;
pub mod config;
pub mod ipc;
pub mod logging;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::daemon::autostart::XdgAutostart;
use crate::daemon::config::DaemonConfiguration;
use crate::daemon::ipc::IpcServer;
use crate::daemon::logging::{DaemonLogger, LogLevel};
use crate::engine::{Engine, EngineSettings};
use crate::events::ShieldEvent;
use crate::models::SeverityKind;
use crate::monitor::{Scanner, SignalTerminator, SysinfoSource};
use crate::shield::{AuthMode, Stealth};
use crate::store::Database;

/// How long shutdown waits for background tasks to finish their current step
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Open the database, falling back to memory so the shield still enforces
fn open_database(path: &Path, logger: &DaemonLogger) -> Result<Database> {
    match Database::open(path) {
        Ok(db) => Ok(db),
        Err(e) => {
            logger.log_error(
                &format!("Failed to open database {}: {}", path.display(), e),
                Some("running with in-memory storage; changes will not persist"),
            )?;
            Database::open_in_memory().context("Failed to open in-memory database")
        }
    }
}

/// Run the daemon in the foreground until SIGINT or SIGTERM
pub async fn run_daemon(config_path: Option<PathBuf>) -> Result<()> {
    let (config, loaded_from) =
        DaemonConfiguration::load(config_path.as_deref()).context("Failed to load configuration")?;
    let logger = DaemonLogger::new(LogLevel::Info);

    let socket_path = config.socket_path()?;
    if tokio::net::UnixStream::connect(&socket_path).await.is_ok() {
        anyhow::bail!(
            "Daemon already running (socket {} is accepting connections)",
            socket_path.display()
        );
    }

    let database_path = config.database_path()?;
    let db = Arc::new(open_database(&database_path, &logger)?);

    let auth_mode = AuthMode::resolve(
        &config.auth.pam_service,
        config.auth.allow_development_fallback,
        config.auth.min_fallback_length,
    );
    let settings = EngineSettings {
        threat_dwell: config.threat_dwell(),
        retention_days: config.audit.retention_days,
        auth_mode,
    };
    let autostart = XdgAutostart::for_current_user()?;

    let engine = Engine::new(
        db,
        settings,
        Stealth::new(&config.stealth.disguised_name),
        Arc::new(SignalTerminator),
        Box::new(autostart),
    )
    .context("Failed to initialize shield engine")?;

    logger.log_startup(loaded_from.as_deref(), &database_path, std::process::id())?;
    engine.audit().append("Shield engine started", SeverityKind::Info, None);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scanner = engine.new_scanner(Box::new(SysinfoSource::new()));
    let tasks: Vec<JoinHandle<()>> = vec![
        tokio::spawn(run_scan_loop(
            engine.clone(),
            scanner,
            config.scan_interval(),
            shutdown_rx.clone(),
        )),
        tokio::spawn(run_idle_loop(engine.clone(), config.idle_check_interval(), shutdown_rx.clone())),
        tokio::spawn(run_retention_loop(engine.clone(), config.purge_interval(), shutdown_rx.clone())),
        tokio::spawn(run_event_logger(engine.clone(), logger.clone(), shutdown_rx.clone())),
    ];

    let ipc_server = IpcServer::new(socket_path, engine.clone());
    let ipc_shutdown = shutdown_rx.clone();

    let reason = tokio::select! {
        reason = shutdown_signal() => reason.to_string(),
        result = ipc_server.start(ipc_shutdown) => match result {
            Ok(()) => "IPC server ended".to_string(),
            Err(e) => {
                logger.log_error(&format!("{:#}", e), Some("ipc"))?;
                "IPC server failed".to_string()
            }
        },
    };

    logger.log_shutdown(&reason)?;
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            log::warn!("Background task did not stop within {:?}", SHUTDOWN_GRACE);
        }
    }

    engine.shutdown();
    drop(ipc_server);
    Ok(())
}

/// Completes on the first SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "Received SIGINT",
            _ = terminate.recv() => "Received SIGTERM",
        },
        Err(e) => {
            log::warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            "Received SIGINT"
        }
    }
}

/// Sweep on every tick and whenever the engine requests one (e.g. on lock).
/// A slow sweep delays the next tick; sweeps never overlap.
async fn run_scan_loop(
    engine: Arc<Engine>,
    mut scanner: Scanner,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = engine.sweep_requested().notified() => {}
            _ = shutdown.changed() => break,
        }

        let sweep_engine = engine.clone();
        let result = tokio::task::spawn_blocking(move || {
            let report = sweep_engine.sweep(&mut scanner);
            (scanner, report)
        })
        .await;

        scanner = match result {
            Ok((scanner, report)) => {
                if let Some(report) = report.filter(|r| r.detected > 0) {
                    log::debug!(
                        "Sweep: {} processes, {} matched, {} terminated",
                        report.observed,
                        report.detected,
                        report.terminated
                    );
                }
                scanner
            }
            Err(e) => {
                log::error!("Sweep task failed: {}", e);
                engine.new_scanner(Box::new(SysinfoSource::new()))
            }
        };
    }
}

async fn run_idle_loop(engine: Arc<Engine>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if engine.check_idle() {
                    log::info!("Idle timeout elapsed, shield locked");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Purge expired audit entries at startup and then periodically
async fn run_retention_loop(engine: Arc<Engine>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let purge_engine = engine.clone();
        match tokio::task::spawn_blocking(move || purge_engine.purge_expired_logs()).await {
            Ok(Ok(0)) => {}
            Ok(Ok(purged)) => log::info!("Purged {} expired audit entries", purged),
            Ok(Err(e)) => log::error!("Audit retention purge failed: {}", e),
            Err(e) => log::error!("Audit retention task failed: {}", e),
        }
    }
}

/// Mirror status transitions and kills into the structured daemon log
async fn run_event_logger(engine: Arc<Engine>, logger: DaemonLogger, mut shutdown: watch::Receiver<bool>) {
    use tokio::sync::broadcast::error::RecvError;

    let mut events = engine.subscribe();
    loop {
        let event = tokio::select! {
            received = events.recv() => received,
            _ = shutdown.changed() => break,
        };

        let result = match event {
            Ok(ShieldEvent::ShieldStatus(status)) => logger.log_status_change(status),
            Ok(ShieldEvent::ProcessKilled { pid, name }) => logger.log_termination(pid, &name),
            Ok(_) => Ok(()),
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Event logger fell behind, {} events skipped", skipped);
                Ok(())
            }
            Err(RecvError::Closed) => break,
        };
        if let Err(e) = result {
            log::warn!("Failed to write structured log entry: {}", e);
        }
    }
}
