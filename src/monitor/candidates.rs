//! Watchlist suggestions from running processes and well-known installed programs

use std::collections::HashSet;
use std::path::Path;

use crate::models::{AppCandidate, ProcessDescriptor};

/// Directories searched for well-known desktop programs
const INSTALL_SEARCH_PATHS: &[&str] = &[
    "/usr/bin",
    "/usr/local/bin",
    "/snap/bin",
    "/var/lib/flatpak/exports/bin",
];

/// (binary, display name, category)
const KNOWN_APPS: &[(&str, &str, &str)] = &[
    ("firefox", "Firefox", "Browser"),
    ("google-chrome", "Google Chrome", "Browser"),
    ("google-chrome-stable", "Google Chrome", "Browser"),
    ("chromium", "Chromium", "Browser"),
    ("chromium-browser", "Chromium", "Browser"),
    ("brave", "Brave Browser", "Browser"),
    ("brave-browser", "Brave Browser", "Browser"),
    ("brave-browser-stable", "Brave Browser", "Browser"),
    ("code", "Visual Studio Code", "Development"),
    ("discord", "Discord", "Communication"),
    ("slack", "Slack", "Communication"),
    ("spotify", "Spotify", "Media"),
    ("vlc", "VLC Media Player", "Media"),
    ("steam", "Steam", "Gaming"),
    ("gimp", "GIMP", "Graphics"),
    ("obs", "OBS Studio", "Media"),
    ("telegram", "Telegram", "Communication"),
    ("telegram-desktop", "Telegram", "Communication"),
    ("zoom", "Zoom", "Communication"),
];

/// Name prefixes of kernel threads, init and shell processes never offered as candidates
const SYSTEM_PREFIXES: &[&str] = &[
    "systemd", "kthreadd", "kworker", "ksoftirqd", "rcu_", "migration", "watchdog", "cpuhp",
    "kdevtmpfs", "netns", "khungtaskd", "oom_reaper", "writeback", "kcompactd", "crypto",
    "kblockd", "kswapd", "init", "bash", "sh", "dbus", "upstart", "snapd",
];

fn is_system_process(name: &str) -> bool {
    SYSTEM_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// "telegram-desktop" -> "Telegram Desktop"
pub fn format_display_name(process_name: &str) -> String {
    process_name
        .split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Running processes, one per command name, sorted by display name
pub fn running_candidates(processes: &[ProcessDescriptor]) -> Vec<AppCandidate> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<AppCandidate> = processes
        .iter()
        .filter(|process| !is_system_process(&process.name))
        .filter(|process| seen.insert(process.name.clone()))
        .map(|process| AppCandidate {
            display_name: format_display_name(&process.name),
            process_key: process.name.to_lowercase(),
            exe_path: process.exe_path.as_ref().map(|p| p.display().to_string()),
            category: "Running".to_string(),
        })
        .collect();

    candidates.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    candidates
}

/// Well-known programs present under `search_paths`
pub fn installed_candidates_in(search_paths: &[&Path]) -> Vec<AppCandidate> {
    let mut apps: Vec<AppCandidate> = KNOWN_APPS
        .iter()
        .filter_map(|(binary, display_name, category)| {
            search_paths
                .iter()
                .map(|dir| dir.join(binary))
                .find(|path| path.exists())
                .map(|path| AppCandidate {
                    display_name: display_name.to_string(),
                    process_key: binary.to_string(),
                    exe_path: Some(path.display().to_string()),
                    category: category.to_string(),
                })
        })
        .collect();

    apps.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    apps
}

pub fn installed_candidates() -> Vec<AppCandidate> {
    let paths: Vec<&Path> = INSTALL_SEARCH_PATHS.iter().map(Path::new).collect();
    installed_candidates_in(&paths)
}

/// Installed programs first, then running processes not already listed
pub fn merge_candidates(installed: Vec<AppCandidate>, running: Vec<AppCandidate>) -> Vec<AppCandidate> {
    let mut seen: HashSet<String> = installed.iter().map(|c| c.process_key.clone()).collect();
    let mut merged = installed;
    merged.extend(running.into_iter().filter(|c| seen.insert(c.process_key.clone())));
    merged
}
