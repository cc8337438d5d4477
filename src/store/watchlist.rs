//! Watchlist store
//!
//! The in-memory list is authoritative. Each mutation is applied under a short
//! critical section and published on the store-changed channel; the scanner
//! reads immutable `Arc` snapshots from it, so a tick always sees a whole list.
//!
//! Adds and removes are mirrored to disk in mutation order under `persist`.
//! A new row is written before its entry is published, so a launch stamp from
//! the scan path always finds the row and never has to wait for `persist`.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::{ProtectedApp, ShieldError};
use crate::store::{now_timestamp, Database, StoreError};

/// Immutable watchlist snapshot
pub type WatchlistSnapshot = Arc<Vec<ProtectedApp>>;

/// Apps protected on a fresh database: (display name, process key, category)
const DEFAULT_APPS: &[(&str, &str, &str)] = &[
    ("Brave Browser", "brave", "Browser"),
    ("Google Chrome", "chrome", "Browser"),
    ("Firefox", "firefox", "Browser"),
    ("Discord", "discord", "Communication"),
    ("Slack", "slack", "Productivity"),
    ("Steam", "steam", "Gaming"),
];

pub struct WatchlistStore {
    db: Arc<Database>,
    entries: Mutex<Vec<ProtectedApp>>,
    /// Serializes add/remove writes so they land in mutation order
    persist: Mutex<()>,
    changes: watch::Sender<WatchlistSnapshot>,
}

/// Canonical form of a process key
pub fn normalize_key(process_key: &str) -> String {
    process_key.trim().to_lowercase()
}

impl WatchlistStore {
    /// Load the watchlist from disk
    pub fn load(db: Arc<Database>) -> Result<Self, StoreError> {
        let entries = db.load_apps()?;
        let (changes, _) = watch::channel(Arc::new(entries.clone()));
        Ok(Self {
            db,
            entries: Mutex::new(entries),
            persist: Mutex::new(()),
            changes,
        })
    }

    /// Populate an empty database with the default watchlist
    pub fn seed_defaults(db: &Database) -> Result<(), StoreError> {
        if db.count_apps()? > 0 {
            return Ok(());
        }
        for (display_name, process_key, category) in DEFAULT_APPS {
            db.insert_app(&new_app(display_name, process_key, category))?;
        }
        Ok(())
    }

    /// Entries in insertion order
    pub fn list(&self) -> Vec<ProtectedApp> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> WatchlistSnapshot {
        self.changes.borrow().clone()
    }

    /// Store-changed notifications; every receiver starts at the current list
    pub fn subscribe(&self) -> watch::Receiver<WatchlistSnapshot> {
        self.changes.subscribe()
    }

    pub fn add(&self, display_name: &str, process_key: &str, category: &str) -> Result<ProtectedApp, ShieldError> {
        let display_name = display_name.trim();
        let process_key = normalize_key(process_key);
        if display_name.is_empty() {
            return Err(ShieldError::InvalidInput("display name must not be empty".to_string()));
        }
        if process_key.is_empty() {
            return Err(ShieldError::InvalidInput("process key must not be empty".to_string()));
        }

        let app = new_app(display_name, &process_key, category.trim());

        // Every add holds `persist`, so the key cannot be taken between the
        // check and the push
        let _persist = self.persist.lock();
        if self.entries.lock().iter().any(|existing| existing.process_key == process_key) {
            return Err(ShieldError::DuplicateKey(process_key));
        }

        if let Err(e) = self.db.insert_app(&app) {
            log::error!("Failed to persist protected app {}: {}", app.process_key, e);
        }

        let mut entries = self.entries.lock();
        entries.push(app.clone());
        self.changes.send_replace(Arc::new(entries.clone()));

        Ok(app)
    }

    /// Remove an entry; returns the removed app
    pub fn remove(&self, id: &str) -> Result<ProtectedApp, ShieldError> {
        let _persist = self.persist.lock();
        let removed = {
            let mut entries = self.entries.lock();
            let index = entries
                .iter()
                .position(|app| app.id == id)
                .ok_or_else(|| ShieldError::NotFound {
                    kind: "Protected app",
                    id: id.to_string(),
                })?;
            let removed = entries.remove(index);
            self.changes.send_replace(Arc::new(entries.clone()));
            removed
        };

        if let Err(e) = self.db.delete_app(id) {
            log::error!("Failed to delete protected app {} from storage: {}", removed.process_key, e);
        }

        Ok(removed)
    }

    /// Stamp the last detected launch; returns false if the entry is gone.
    /// Called from the scan path only, so stamps never race each other.
    pub fn record_attempt(&self, id: &str, timestamp: &str) -> bool {
        {
            let mut entries = self.entries.lock();
            match entries.iter_mut().find(|app| app.id == id) {
                Some(app) => app.last_attempt = Some(timestamp.to_string()),
                None => return false,
            }
            self.changes.send_replace(Arc::new(entries.clone()));
        }

        if let Err(e) = self.db.update_last_attempt(id, timestamp) {
            log::error!("Failed to persist last attempt for {}: {}", id, e);
        }
        true
    }
}

fn new_app(display_name: &str, process_key: &str, category: &str) -> ProtectedApp {
    ProtectedApp {
        id: uuid::Uuid::new_v4().to_string(),
        display_name: display_name.to_string(),
        process_key: normalize_key(process_key),
        category: if category.is_empty() { "Other".to_string() } else { category.to_string() },
        last_attempt: None,
        created_at: now_timestamp(),
    }
}
