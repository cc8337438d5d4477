//! Global constants for ficha
//!
//! Centralized location for application-wide constants

/// Application identifier used for data directories, the IPC socket name and log targets
pub const APP_NAME: &str = "ficha";

/// Logger target for daemon lifecycle records
pub const DAEMON_CATEGORY: &str = "ficha::daemon";

/// Database file name inside the user data directory
pub const DATABASE_FILE_NAME: &str = "ficha.db";

/// Configuration file name inside the user config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// IPC socket file name
pub const IPC_SOCKET_NAME: &str = "ficha.sock";

/// XDG autostart desktop entry name
pub const AUTOSTART_ENTRY_NAME: &str = "ficha.desktop";

/// Subcommand that runs the daemon in the foreground
pub const DAEMON_RUN_SUBCOMMAND: &str = "run";

/// Default scan interval in milliseconds
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 1000;

/// Scan interval bounds in milliseconds.
/// Note: must match the message of ConfigError::InvalidScanInterval
pub const SCAN_INTERVAL_MIN_MS: u64 = 100;
pub const SCAN_INTERVAL_MAX_MS: u64 = 60_000;

/// How long THREAT_DETECTED is shown before reverting to LOCKED
pub const DEFAULT_THREAT_DWELL_SECS: u64 = 3;

/// How often the idle tracker checks for an expired session
pub const DEFAULT_IDLE_CHECK_INTERVAL_MS: u64 = 5000;

/// Idle timeout bounds in minutes
pub const IDLE_TIMEOUT_MIN_MINUTES: u32 = 1;
pub const IDLE_TIMEOUT_MAX_MINUTES: u32 = 10;
pub const DEFAULT_IDLE_TIMEOUT_MINUTES: u32 = 10;

/// Audit log retention horizon
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// How often the retention purge runs
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 3600;

/// Rows deleted per purge batch; the connection is released between batches
pub const PURGE_BATCH_SIZE: usize = 500;

/// Validity of a successful authentication before it must be consumed by an unlock
pub const AUTH_GRANT_TTL_SECS: u64 = 60;

/// Minimum credential length accepted by the development fallback
pub const DEFAULT_MIN_FALLBACK_LENGTH: usize = 4;

/// PAM service used to verify credentials
pub const DEFAULT_PAM_SERVICE: &str = "login";

/// Process name adopted while stealth mode is enabled
pub const DEFAULT_DISGUISED_NAME: &str = "systemd-resolve";

/// Capacity of the push notification channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Settings table keys
pub const SETTING_IDLE_TIMEOUT: &str = "idle_timeout";
pub const SETTING_AUTOSTART: &str = "autostart";

/// Stable ids of the seeded security policies
pub const POLICY_AUTO_KILL: &str = "auto-kill";
pub const POLICY_STEALTH_MODE: &str = "stealth-mode";
pub const POLICY_ROOT_ACCESS_PREVENTION: &str = "root-access-prevention";
pub const POLICY_IDLE_LOCK: &str = "idle-lock";
