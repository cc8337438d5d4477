//! Structured daemon logging
//!
//! Lifecycle and enforcement events are written through the `log` facade as
//! `message | {json}` lines so they can be grepped or parsed from the journal.

use anyhow::Result;
use log::{error, info, warn};
use serde_json::json;

use crate::constants::DAEMON_CATEGORY;
use crate::models::ShieldStatus;

/// Install the `env_logger` backend. `RUST_LOG` overrides the default level.
pub fn init_logging(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    // A second init (e.g. in tests) keeps the first logger
    let _ = env_logger::Builder::from_env(env).format_timestamp_millis().try_init();
}

/// Structured event logger for the daemon
#[derive(Debug, Clone)]
pub struct DaemonLogger {
    level: LogLevel,
}

/// Log levels for daemon operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
}

impl DaemonLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    /// Log daemon startup event
    pub fn log_startup(&self, config_path: Option<&std::path::Path>, database_path: &std::path::Path, pid: u32) -> Result<()> {
        let message = json!({
            "event": "daemon_startup",
            "pid": pid,
            "version": env!("FICHA_BUILD_VERSION"),
            "git_hash": env!("GIT_HASH"),
            "config_path": config_path.map(|p| p.display().to_string()),
            "database_path": database_path.display().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Daemon started", &message)
    }

    /// Log daemon shutdown event
    pub fn log_shutdown(&self, reason: &str) -> Result<()> {
        let message = json!({
            "event": "daemon_shutdown",
            "reason": reason,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Daemon shutting down", &message)
    }

    pub fn log_status_change(&self, status: ShieldStatus) -> Result<()> {
        let message = json!({
            "event": "shield_status",
            "status": status,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, &format!("Shield {}", status), &message)
    }

    /// Log a process the shield killed. Failed attempts only reach the
    /// audit log and the engine's own error lines.
    pub fn log_termination(&self, pid: u32, process_name: &str) -> Result<()> {
        let message = json!({
            "event": "process_terminated",
            "pid": pid,
            "process_name": process_name,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Warn, &format!("Blocked {} (pid {})", process_name, pid), &message)
    }

    /// Log error events
    pub fn log_error(&self, error_message: &str, context: Option<&str>) -> Result<()> {
        let message = json!({
            "event": "error",
            "message": error_message,
            "context": context,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Error, error_message, &message)
    }

    fn log_structured(&self, level: LogLevel, message: &str, data: &serde_json::Value) -> Result<()> {
        if !self.should_log(level) {
            return Ok(());
        }

        let full_message = format!("{} | {}", message, data);
        match level {
            LogLevel::Error => error!(target: DAEMON_CATEGORY, "{}", full_message),
            LogLevel::Warn => warn!(target: DAEMON_CATEGORY, "{}", full_message),
            LogLevel::Info => info!(target: DAEMON_CATEGORY, "{}", full_message),
        }

        Ok(())
    }

    fn should_log(&self, level: LogLevel) -> bool {
        matches!(
            (self.level, level),
            (LogLevel::Error, LogLevel::Error)
                | (LogLevel::Warn, LogLevel::Error | LogLevel::Warn)
                | (LogLevel::Info, _)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filtering() {
        let errors_only = DaemonLogger::new(LogLevel::Error);
        assert!(errors_only.should_log(LogLevel::Error));
        assert!(!errors_only.should_log(LogLevel::Warn));
        assert!(!errors_only.should_log(LogLevel::Info));

        let warn = DaemonLogger::new(LogLevel::Warn);
        assert!(warn.should_log(LogLevel::Warn));
        assert!(!warn.should_log(LogLevel::Info));

        let all = DaemonLogger::new(LogLevel::Info);
        assert!(all.should_log(LogLevel::Info));
        assert!(all.should_log(LogLevel::Error));
    }

    #[test]
    fn test_structured_events_do_not_fail() {
        init_logging("debug");
        let logger = DaemonLogger::new(LogLevel::Info);
        logger.log_status_change(ShieldStatus::Locked).unwrap();
        logger.log_termination(42, "brave").unwrap();
        logger.log_error("boom", Some("test")).unwrap();
        logger.log_shutdown("test").unwrap();
    }
}
