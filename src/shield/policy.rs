//! Policy engine
//!
//! Holds the full policy set in memory; reads are a short shared lock so the
//! scanner can consult `enabled` before every enforcement decision. Toggles
//! are mirrored to the database after the read/write lock is released, under
//! a separate mutex that keeps flips and their writes in the same order.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::constants::{POLICY_AUTO_KILL, POLICY_IDLE_LOCK, POLICY_ROOT_ACCESS_PREVENTION, POLICY_STEALTH_MODE};
use crate::models::{PolicySeverity, SecurityPolicy, ShieldError};
use crate::store::{Database, StoreError};

/// Policies seeded on first start
pub fn default_policies() -> Vec<SecurityPolicy> {
    vec![
        SecurityPolicy {
            id: POLICY_AUTO_KILL.to_string(),
            title: "Auto-kill unauthorized apps".to_string(),
            description: "Immediately terminate any protected application launched without authorization".to_string(),
            enabled: true,
            severity: PolicySeverity::High,
        },
        SecurityPolicy {
            id: POLICY_STEALTH_MODE.to_string(),
            title: "Stealth Mode".to_string(),
            description: "Disguise the shield process name from casual process listings".to_string(),
            enabled: false,
            severity: PolicySeverity::Medium,
        },
        SecurityPolicy {
            id: POLICY_ROOT_ACCESS_PREVENTION.to_string(),
            title: "Root Access Prevention".to_string(),
            description: "Block unauthorized sudo/root elevation attempts".to_string(),
            enabled: true,
            severity: PolicySeverity::High,
        },
        SecurityPolicy {
            id: POLICY_IDLE_LOCK.to_string(),
            title: "Session Lock on Idle".to_string(),
            description: "Automatically lock the shield after the idle timeout elapses".to_string(),
            enabled: true,
            severity: PolicySeverity::Low,
        },
    ]
}

/// Policy flags read by the scanner at the start of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcementFlags {
    pub auto_kill: bool,
    pub stealth: bool,
}

pub struct PolicyEngine {
    db: Arc<Database>,
    policies: RwLock<Vec<SecurityPolicy>>,
    /// Serializes toggles from flip through persistence
    persist: Mutex<()>,
}

impl PolicyEngine {
    /// Seed missing default policies and load the set
    pub fn load(db: Arc<Database>) -> Result<Self, StoreError> {
        for policy in default_policies() {
            db.insert_policy_if_missing(&policy)?;
        }
        let policies = db.load_policies()?;
        Ok(Self {
            db,
            policies: RwLock::new(policies),
            persist: Mutex::new(()),
        })
    }

    pub fn list(&self) -> Vec<SecurityPolicy> {
        self.policies.read().clone()
    }

    /// Unknown ids are reported as disabled
    pub fn is_enabled(&self, id: &str) -> bool {
        self.policies
            .read()
            .iter()
            .find(|policy| policy.id == id)
            .is_some_and(|policy| policy.enabled)
    }

    /// Both enforcement flags from a single read
    pub fn enforcement_flags(&self) -> EnforcementFlags {
        let policies = self.policies.read();
        let enabled = |id: &str| policies.iter().any(|p| p.id == id && p.enabled);
        EnforcementFlags {
            auto_kill: enabled(POLICY_AUTO_KILL),
            stealth: enabled(POLICY_STEALTH_MODE),
        }
    }

    /// Flip a policy; returns the updated policy
    pub fn toggle(&self, id: &str) -> Result<SecurityPolicy, ShieldError> {
        self.toggle_with(id, |_| {})
    }

    /// Flip a policy, persist it, then run `on_change` before the next toggle
    /// may start. Readers are never blocked by the write or by `on_change`.
    pub fn toggle_with(
        &self,
        id: &str,
        on_change: impl FnOnce(&SecurityPolicy),
    ) -> Result<SecurityPolicy, ShieldError> {
        let _persist = self.persist.lock();
        let updated = {
            let mut policies = self.policies.write();
            let policy = policies
                .iter_mut()
                .find(|policy| policy.id == id)
                .ok_or_else(|| ShieldError::NotFound {
                    kind: "Security policy",
                    id: id.to_string(),
                })?;
            policy.enabled = !policy.enabled;
            policy.clone()
        };

        if let Err(e) = self.db.set_policy_enabled(&updated.id, updated.enabled) {
            log::error!("Failed to persist policy {}: {}", updated.id, e);
        }

        on_change(&updated);
        Ok(updated)
    }
}
