//! Output formatting for the command-line client
//!
//! Every formatter returns the text so the caller decides where it goes;
//! `--json` output bypasses these and prints the daemon payload as-is.

use anyhow::Result;
use serde::Serialize;

use crate::events::ShieldEvent;
use crate::models::{AppCandidate, ProtectedApp, SecurityLog, SecurityPolicy, StatusReport};

/// Pretty-printed JSON for `--json`
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn format_status(report: &StatusReport) -> String {
    let mut lines = vec![
        format!("Shield: {}", report.status),
        format!("Protected apps: {}", report.protected_apps),
        format!(
            "Idle: {}s of {} min",
            report.idle_seconds, report.idle_timeout_minutes
        ),
        format!("Authentication: {}", report.health.auth_mode),
    ];

    let stealth = match (report.health.stealth_supported, report.health.stealth_active) {
        (false, _) => "unsupported",
        (true, true) => "active",
        (true, false) => "inactive",
    };
    lines.push(format!("Stealth: {}", stealth));

    match &report.health.scanner_error {
        Some(error) => lines.push(format!("Scanner: FAILING ({})", error)),
        None => lines.push("Scanner: ok".to_string()),
    }

    lines.join("\n")
}

pub fn format_apps(apps: &[ProtectedApp]) -> String {
    if apps.is_empty() {
        return "No protected applications.".to_string();
    }

    let mut out = format!("{} protected applications:\n", apps.len());
    for app in apps {
        out.push_str(&format!(
            "\n{} [{}]\n  Process: {}\n  Id: {}\n  Last attempt: {}\n",
            app.display_name,
            app.category,
            app.process_key,
            app.id,
            app.last_attempt.as_deref().unwrap_or("never"),
        ));
    }
    out.trim_end().to_string()
}

pub fn format_log_entry(entry: &SecurityLog) -> String {
    let mut line = format!(
        "[{}] {:<7} {}",
        entry.timestamp,
        entry.severity_kind.as_str().to_uppercase(),
        entry.event
    );
    if let Some(app) = &entry.related_app {
        line.push_str(&format!(" ({})", app));
    }
    line
}

pub fn format_logs(entries: &[SecurityLog]) -> String {
    if entries.is_empty() {
        return "Security log is empty.".to_string();
    }
    entries
        .iter()
        .map(format_log_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_policies(policies: &[SecurityPolicy]) -> String {
    policies
        .iter()
        .map(|p| {
            format!(
                "[{}] {} ({}, {})\n    {}",
                if p.enabled { "x" } else { " " },
                p.title,
                p.id,
                p.severity.as_str(),
                p.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_candidates(candidates: &[AppCandidate]) -> String {
    if candidates.is_empty() {
        return "No candidate applications found.".to_string();
    }

    let mut out = String::from("Applications you can protect:\n");
    for candidate in candidates {
        out.push_str(&format!(
            "\n  {:<24} {:<20} {}",
            candidate.display_name, candidate.process_key, candidate.category
        ));
        if let Some(path) = &candidate.exe_path {
            out.push_str(&format!("\n  {:<24} {}", "", path));
        }
    }
    out
}

/// One line per push notification for `watch`
pub fn format_event(event: &ShieldEvent) -> String {
    match event {
        ShieldEvent::SecurityLog(entry) => format!("log     {}", format_log_entry(entry)),
        ShieldEvent::ShieldStatus(status) => format!("status  Shield is now {}", status),
        ShieldEvent::AppAdded(app) => format!("apps    Added {} ({})", app.display_name, app.process_key),
        ShieldEvent::AppRemoved(id) => format!("apps    Removed {}", id),
        ShieldEvent::ProcessKilled { pid, name } => format!("kill    {} (PID: {})", name, pid),
        ShieldEvent::AutoLocked(_) => "idle    Shield auto-locked after inactivity".to_string(),
        ShieldEvent::PolicyToggled(policy) => format!(
            "policy  {} {}",
            policy.title,
            if policy.enabled { "enabled" } else { "disabled" }
        ),
    }
}
