//! Persistence layer
//!
//! One SQLite database per user holding four tables:
//! - protected_apps: the watchlist
//! - security_logs: the audit trail
//! - security_policies: policy set and toggle state
//! - settings: key/value engine settings
//!
//! The in-memory components (watchlist, policy engine) stay authoritative for
//! the session; this module only mirrors them to disk.

pub mod audit;
pub mod watchlist;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::models::{PolicySeverity, ProtectedApp, SecurityLog, SecurityPolicy, SeverityKind};

pub use audit::AuditLog;
pub use watchlist::WatchlistStore;

/// Errors raised by the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to create data directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}

/// Handle to the engine database
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

/// Current time in the canonical, lexicographically sortable timestamp format
pub fn now_timestamp() -> String {
    format_timestamp(chrono::Utc::now())
}

pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl Database {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Volatile database used when the on-disk one is unavailable, and by tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        db.initialize_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        // Audit appends must be on disk before the call returns
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS protected_apps (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                process_key TEXT NOT NULL UNIQUE COLLATE NOCASE,
                category TEXT NOT NULL,
                last_attempt TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS security_logs (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                event TEXT NOT NULL,
                severity_kind TEXT NOT NULL,
                related_app TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_security_logs_timestamp ON security_logs(timestamp);

            CREATE TABLE IF NOT EXISTS security_policies (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                severity TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    // ==================== protected_apps ====================

    /// Watchlist in insertion order
    pub fn load_apps(&self) -> Result<Vec<ProtectedApp>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, display_name, process_key, category, last_attempt, created_at
             FROM protected_apps ORDER BY rowid ASC",
        )?;

        let apps = stmt
            .query_map([], |row| {
                Ok(ProtectedApp {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    process_key: row.get(2)?,
                    category: row.get(3)?,
                    last_attempt: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(apps)
    }

    pub fn count_apps(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM protected_apps", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn insert_app(&self, app: &ProtectedApp) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO protected_apps (id, display_name, process_key, category, last_attempt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                app.id,
                app.display_name,
                app.process_key,
                app.category,
                app.last_attempt,
                app.created_at
            ],
        )?;
        Ok(())
    }

    /// Returns whether a row was deleted
    pub fn delete_app(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM protected_apps WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub fn update_last_attempt(&self, id: &str, timestamp: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE protected_apps SET last_attempt = ?1 WHERE id = ?2",
            params![timestamp, id],
        )?;
        Ok(())
    }

    // ==================== security_logs ====================

    pub fn insert_log(&self, log: &SecurityLog) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO security_logs (id, timestamp, event, severity_kind, related_app)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.id,
                log.timestamp,
                log.event,
                log.severity_kind.as_str(),
                log.related_app
            ],
        )?;
        Ok(())
    }

    /// Newest entries first
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<SecurityLog>, StoreError> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, event, severity_kind, related_app
                 FROM security_logs ORDER BY rowid DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(id, timestamp, event, kind, related_app)| {
                let severity_kind = kind.parse::<SeverityKind>().map_err(|message| StoreError::Corrupt {
                    table: "security_logs",
                    message,
                })?;
                Ok(SecurityLog {
                    id,
                    timestamp,
                    event,
                    severity_kind,
                    related_app,
                })
            })
            .collect()
    }

    /// Delete at most `batch` entries older than `cutoff`; returns the number deleted
    pub fn purge_logs_before(&self, cutoff: &str, batch: usize) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM security_logs WHERE rowid IN (
                SELECT rowid FROM security_logs WHERE timestamp < ?1 LIMIT ?2
            )",
            params![cutoff, batch as i64],
        )?;
        Ok(deleted)
    }

    pub fn clear_logs(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM security_logs", [])?)
    }

    // ==================== security_policies ====================

    pub fn load_policies(&self) -> Result<Vec<SecurityPolicy>, StoreError> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, title, description, enabled, severity FROM security_policies ORDER BY rowid ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)? != 0,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(id, title, description, enabled, severity)| {
                let severity = severity.parse::<PolicySeverity>().map_err(|message| StoreError::Corrupt {
                    table: "security_policies",
                    message,
                })?;
                Ok(SecurityPolicy {
                    id,
                    title,
                    description,
                    enabled,
                    severity,
                })
            })
            .collect()
    }

    /// Insert a policy unless one with the same id exists
    pub fn insert_policy_if_missing(&self, policy: &SecurityPolicy) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO security_policies (id, title, description, enabled, severity)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                policy.id,
                policy.title,
                policy.description,
                policy.enabled as i64,
                policy.severity.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn set_policy_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE security_policies SET enabled = ?1 WHERE id = ?2",
            params![enabled as i64, id],
        )?;
        Ok(())
    }

    // ==================== settings ====================

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_bool_setting(&self, key: &str, default: bool) -> Result<bool, StoreError> {
        Ok(self.get_setting(key)?.map(|v| v == "true").unwrap_or(default))
    }

    /// Unparseable values fall back to the default
    pub fn get_int_setting(&self, key: &str, default: i64) -> Result<i64, StoreError> {
        Ok(self
            .get_setting(key)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }
}
