//! Configuration management for daemon mode
//!
//! Handles TOML configuration parsing, defaults and validation. Every field is
//! optional in the file; a missing file means all defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    APP_NAME, CONFIG_FILE_NAME, DATABASE_FILE_NAME, DEFAULT_DISGUISED_NAME, DEFAULT_IDLE_CHECK_INTERVAL_MS,
    DEFAULT_MIN_FALLBACK_LENGTH, DEFAULT_PAM_SERVICE, DEFAULT_PURGE_INTERVAL_SECS, DEFAULT_RETENTION_DAYS,
    DEFAULT_SCAN_INTERVAL_MS, DEFAULT_THREAT_DWELL_SECS, IPC_SOCKET_NAME, SCAN_INTERVAL_MAX_MS, SCAN_INTERVAL_MIN_MS,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// Note: bounds must match SCAN_INTERVAL_MIN_MS/MAX_MS in constants.rs
    #[error("Invalid scan interval: {0} ms. Must be between 100 and 60000 ms")]
    InvalidScanInterval(u64),
    #[error("Invalid idle check interval: {0} ms. Must be at least 100 ms")]
    InvalidIdleCheckInterval(u64),
    #[error("Invalid threat dwell: {0} s. Must be between 1 and 60 seconds")]
    InvalidThreatDwell(u64),
    #[error("Invalid retention: {0} days. Must be at least 1 day")]
    InvalidRetention(u32),
    #[error("Invalid minimum fallback credential length: {0}. Must be at least 1")]
    InvalidFallbackLength(usize),
    #[error("Disguised process name must not be empty")]
    EmptyDisguisedName,
    #[error("Could not determine the user {0} directory")]
    NoUserDirectory(&'static str),
}

/// Main daemon configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfiguration {
    pub daemon: DaemonSettings,
    pub audit: AuditSettings,
    pub auth: AuthSettings,
    pub stealth: StealthSettings,
}

/// Core daemon runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSettings {
    /// Scan period while the shield enforces (100-60000 ms)
    pub scan_interval_ms: u64,
    pub idle_check_interval_ms: u64,
    /// How long THREAT_DETECTED lasts
    pub threat_dwell_secs: u64,
    /// Defaults to the user data directory
    pub database_path: Option<PathBuf>,
    /// Defaults to the user runtime directory
    pub socket_path: Option<PathBuf>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            idle_check_interval_ms: DEFAULT_IDLE_CHECK_INTERVAL_MS,
            threat_dwell_secs: DEFAULT_THREAT_DWELL_SECS,
            database_path: None,
            socket_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditSettings {
    pub retention_days: u32,
    pub purge_interval_secs: u64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            purge_interval_secs: DEFAULT_PURGE_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSettings {
    /// PAM service used when built with `pam-auth`
    pub pam_service: String,
    /// Allow the development credential fallback in release builds
    pub allow_development_fallback: bool,
    pub min_fallback_length: usize,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            pam_service: DEFAULT_PAM_SERVICE.to_string(),
            allow_development_fallback: false,
            min_fallback_length: DEFAULT_MIN_FALLBACK_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StealthSettings {
    pub disguised_name: String,
}

impl Default for StealthSettings {
    fn default() -> Self {
        Self {
            disguised_name: DEFAULT_DISGUISED_NAME.to_string(),
        }
    }
}

impl DaemonConfiguration {
    /// `$XDG_CONFIG_HOME/ficha/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoUserDirectory("config"))?;
        Ok(dir.join(APP_NAME).join(CONFIG_FILE_NAME))
    }

    /// Parse and validate a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path must exist; the default path may be absent
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load_from_file(path)?, Some(path.to_path_buf())));
        }
        match Self::default_config_path() {
            Ok(path) if path.exists() => Ok((Self::load_from_file(&path)?, Some(path))),
            _ => Ok((Self::default(), None)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let daemon = &self.daemon;
        if !(SCAN_INTERVAL_MIN_MS..=SCAN_INTERVAL_MAX_MS).contains(&daemon.scan_interval_ms) {
            return Err(ConfigError::InvalidScanInterval(daemon.scan_interval_ms));
        }
        if daemon.idle_check_interval_ms < SCAN_INTERVAL_MIN_MS {
            return Err(ConfigError::InvalidIdleCheckInterval(daemon.idle_check_interval_ms));
        }
        if !(1..=60).contains(&daemon.threat_dwell_secs) {
            return Err(ConfigError::InvalidThreatDwell(daemon.threat_dwell_secs));
        }
        if self.audit.retention_days == 0 {
            return Err(ConfigError::InvalidRetention(self.audit.retention_days));
        }
        if self.auth.min_fallback_length == 0 {
            return Err(ConfigError::InvalidFallbackLength(self.auth.min_fallback_length));
        }
        if self.stealth.disguised_name.trim().is_empty() {
            return Err(ConfigError::EmptyDisguisedName);
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.scan_interval_ms)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.idle_check_interval_ms)
    }

    pub fn threat_dwell(&self) -> Duration {
        Duration::from_secs(self.daemon.threat_dwell_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.audit.purge_interval_secs.max(1))
    }

    /// `$XDG_DATA_HOME/ficha/ficha.db` unless overridden
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.daemon.database_path {
            return Ok(path.clone());
        }
        let dir = dirs::data_dir().ok_or(ConfigError::NoUserDirectory("data"))?;
        Ok(dir.join(APP_NAME).join(DATABASE_FILE_NAME))
    }

    /// User-scoped socket: `$XDG_RUNTIME_DIR/ficha.sock`, else the data directory
    pub fn socket_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.daemon.socket_path {
            return Ok(path.clone());
        }
        if let Some(dir) = dirs::runtime_dir() {
            return Ok(dir.join(IPC_SOCKET_NAME));
        }
        let dir = dirs::data_dir().ok_or(ConfigError::NoUserDirectory("data"))?;
        Ok(dir.join(APP_NAME).join(IPC_SOCKET_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = DaemonConfiguration::default();
        config.validate().unwrap();
        assert_eq!(config.scan_interval(), Duration::from_millis(1000));
        assert_eq!(config.threat_dwell(), Duration::from_secs(3));
        assert_eq!(config.stealth.disguised_name, "systemd-resolve");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config("[daemon]\nscan_interval_ms = 250\n\n[auth]\nallow_development_fallback = true\n");
        let config = DaemonConfiguration::load_from_file(file.path()).unwrap();

        assert_eq!(config.daemon.scan_interval_ms, 250);
        assert_eq!(config.daemon.threat_dwell_secs, DEFAULT_THREAT_DWELL_SECS);
        assert!(config.auth.allow_development_fallback);
        assert_eq!(config.audit.retention_days, DEFAULT_RETENTION_DAYS);
    }

    #[test]
    fn test_scan_interval_out_of_range_rejected() {
        let file = write_config("[daemon]\nscan_interval_ms = 50\n");
        let err = DaemonConfiguration::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidScanInterval(50)));
        assert!(err.to_string().contains("Must be between 100 and 60000 ms"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let file = write_config("[daemon]\npolling_interval = 1.0\n");
        assert!(matches!(
            DaemonConfiguration::load_from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = DaemonConfiguration::load(Some(Path::new("/nonexistent/ficha.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_path_overrides() {
        let file = write_config("[daemon]\ndatabase_path = \"/tmp/f.db\"\nsocket_path = \"/tmp/f.sock\"\n");
        let config = DaemonConfiguration::load_from_file(file.path()).unwrap();
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/f.db"));
        assert_eq!(config.socket_path().unwrap(), PathBuf::from("/tmp/f.sock"));
    }

    #[test]
    fn test_empty_disguised_name_rejected() {
        let mut config = DaemonConfiguration::default();
        config.stealth.disguised_name = "  ".into();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyDisguisedName)));
    }
}
