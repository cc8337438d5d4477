//! Audit log: durable append, live republish, age-based retention

use std::sync::Arc;

use crate::events::{EventBus, ShieldEvent};
use crate::models::{SecurityLog, SeverityKind};
use crate::store::{format_timestamp, now_timestamp, Database, StoreError};
use crate::constants::PURGE_BATCH_SIZE;

pub struct AuditLog {
    db: Arc<Database>,
    bus: EventBus,
    retention: chrono::Duration,
}

impl AuditLog {
    pub fn new(db: Arc<Database>, bus: EventBus, retention_days: u32) -> Self {
        Self {
            db,
            bus,
            retention: chrono::Duration::days(i64::from(retention_days)),
        }
    }

    /// Append an entry. The row is written before the entry is published; a
    /// failed write goes to the process log and the entry is still published.
    pub fn append(&self, event: impl Into<String>, severity_kind: SeverityKind, related_app: Option<&str>) -> SecurityLog {
        let entry = SecurityLog {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_timestamp(),
            event: event.into(),
            severity_kind,
            related_app: related_app.map(str::to_string),
        };

        if let Err(e) = self.db.insert_log(&entry) {
            log::error!("Failed to persist audit entry '{}': {}", entry.event, e);
        }

        self.bus.publish(ShieldEvent::SecurityLog(entry.clone()));
        entry
    }

    /// Newest entries first
    pub fn recent(&self, limit: usize) -> Result<Vec<SecurityLog>, StoreError> {
        self.db.recent_logs(limit)
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        self.db.clear_logs()
    }

    /// Delete entries older than the retention horizon in small batches,
    /// releasing the connection between batches so appends interleave.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let cutoff = format_timestamp(chrono::Utc::now() - self.retention);
        let mut total = 0;
        loop {
            let deleted = self.db.purge_logs_before(&cutoff, PURGE_BATCH_SIZE)?;
            total += deleted;
            if deleted < PURGE_BATCH_SIZE {
                break;
            }
            std::thread::yield_now();
        }
        Ok(total)
    }
}
