//! Data models module
//!
//! Defines core data structures:
//! - ProtectedApp: Watchlist entry subject to kill-on-sight enforcement
//! - SecurityLog: Immutable audit trail record
//! - SecurityPolicy: Toggleable policy gating enforcement
//! - ShieldStatus: Process-wide session state
//! - ProcessDescriptor: One observed live process

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A watchlisted application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedApp {
    /// Stable opaque identifier (UUID v4)
    pub id: String,
    /// Human readable name
    pub display_name: String,
    /// Lowercased canonical name used for matching, unique across the watchlist
    pub process_key: String,
    /// Free-form grouping (Browser, Gaming, ...)
    pub category: String,
    /// RFC 3339 timestamp of the last detected launch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<String>,
    /// RFC 3339 creation timestamp
    pub created_at: String,
}

/// Severity of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityKind {
    Info,
    Warning,
    Error,
    Success,
}

impl SeverityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityKind::Info => "info",
            SeverityKind::Warning => "warning",
            SeverityKind::Error => "error",
            SeverityKind::Success => "success",
        }
    }
}

impl FromStr for SeverityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(SeverityKind::Info),
            "warning" => Ok(SeverityKind::Warning),
            "error" => Ok(SeverityKind::Error),
            "success" => Ok(SeverityKind::Success),
            other => Err(format!("unknown severity kind '{}'", other)),
        }
    }
}

impl fmt::Display for SeverityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit trail record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLog {
    pub id: String,
    /// RFC 3339 UTC timestamp
    pub timestamp: String,
    pub event: String,
    pub severity_kind: SeverityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_app: Option<String>,
}

/// Severity of a security policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySeverity {
    Low,
    Medium,
    High,
}

impl PolicySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicySeverity::Low => "low",
            PolicySeverity::Medium => "medium",
            PolicySeverity::High => "high",
        }
    }
}

impl FromStr for PolicySeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(PolicySeverity::Low),
            "medium" => Ok(PolicySeverity::Medium),
            "high" => Ok(PolicySeverity::High),
            other => Err(format!("unknown policy severity '{}'", other)),
        }
    }
}

/// A toggleable security policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    pub id: String,
    pub title: String,
    pub description: String,
    pub enabled: bool,
    pub severity: PolicySeverity,
}

/// Process-wide shield state, owned by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShieldStatus {
    /// Enforcing; watchlisted processes are killed
    Locked,
    /// Unlocked by an authenticated operator; detection is inert
    Active,
    /// Transient state shown right after a kill, reverts to Locked
    ThreatDetected,
}

impl ShieldStatus {
    /// True for every state in which the scanner enforces the watchlist
    pub fn is_enforcing(&self) -> bool {
        !matches!(self, ShieldStatus::Active)
    }
}

impl fmt::Display for ShieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShieldStatus::Locked => "LOCKED",
            ShieldStatus::Active => "ACTIVE",
            ShieldStatus::ThreatDetected => "THREAT_DETECTED",
        })
    }
}

/// One observed live process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescriptor {
    /// Process ID (PID)
    pub pid: u32,
    /// Command name as reported by the OS (may be truncated, e.g. 15 chars on Linux)
    pub name: String,
    /// Full path to the executable, when readable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe_path: Option<PathBuf>,
    /// Process start time as Unix timestamp (seconds since epoch).
    /// Combined with PID, this uniquely identifies a process even across PID reuse.
    pub start_time: u64,
}

/// Result of a forced termination attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationOutcome {
    Terminated,
    PermissionDenied,
    AlreadyExited,
}

/// Suggested watchlist entry discovered from running or installed programs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCandidate {
    pub display_name: String,
    pub process_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe_path: Option<String>,
    pub category: String,
}

/// Engine health as reported alongside the shield status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    /// Set while the process table cannot be enumerated at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner_error: Option<String>,
    /// Credential backend in use
    pub auth_mode: String,
    /// Whether stealth mode can be applied on this platform
    pub stealth_supported: bool,
    /// Whether the process name is currently disguised
    pub stealth_active: bool,
}

/// Snapshot returned by the status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ShieldStatus,
    pub health: EngineHealth,
    pub idle_timeout_minutes: u32,
    pub idle_seconds: u64,
    pub protected_apps: usize,
}

/// Errors surfaced synchronously by the control surface
#[derive(Debug, thiserror::Error)]
pub enum ShieldError {
    #[error("An application with process key '{0}' is already protected")]
    DuplicateKey(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Note: bounds must match IDLE_TIMEOUT_MIN/MAX_MINUTES in constants.rs
    #[error("Invalid idle timeout: {0}. Must be between 1 and 10 minutes")]
    InvalidIdleTimeout(i64),
    #[error("Shield cannot be activated without a successful authentication")]
    NotAuthenticated,
    #[error("Autostart integration failed: {0}")]
    Autostart(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] crate::store::StoreError),
}

impl ShieldError {
    /// Numeric code used on the IPC wire
    pub fn code(&self) -> u32 {
        match self {
            ShieldError::DuplicateKey(_) => 409,
            ShieldError::NotFound { .. } => 404,
            ShieldError::InvalidInput(_) | ShieldError::InvalidIdleTimeout(_) => 400,
            ShieldError::NotAuthenticated => 401,
            ShieldError::Autostart(_) | ShieldError::Storage(_) => 500,
        }
    }
}
