//! Watchlist matching for observed processes
//!
//! A process matches a watchlist entry when, ignoring case:
//! - its command name equals the entry's process key, or
//! - the key's token sequence appears contiguously in the command name's tokens, or
//! - its executable base name equals the key, or starts with the key immediately
//!   followed by a separator.
//!
//! Tokens are maximal runs of alphanumeric characters. Token matching is what
//! lets `brave` match `brave-browser-stable` while rejecting `bravely-different`;
//! plain substring search would accept both.

use crate::models::{ProcessDescriptor, ProtectedApp};
use crate::store::watchlist::{normalize_key, WatchlistSnapshot};

/// Characters that may follow a key at the start of an executable base name
const NAME_SEPARATORS: &[char] = &['-', '_', '.', ' '];

/// Split a lowercased name into alphanumeric tokens
pub fn tokenize(name: &str) -> Vec<&str> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect()
}

fn contains_token_run(haystack: &[&str], needle: &[&str]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

fn exe_base_name(process: &ProcessDescriptor) -> Option<String> {
    process
        .exe_path
        .as_ref()
        .and_then(|path| path.file_name())
        .map(|name| name.to_string_lossy().to_lowercase())
}

fn base_name_matches(base_name: &str, key: &str) -> bool {
    base_name == key
        || base_name
            .strip_prefix(key)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|next| NAME_SEPARATORS.contains(&next))
}

/// Check a single process against a single process key
pub fn process_matches_key(process: &ProcessDescriptor, process_key: &str) -> bool {
    let key = normalize_key(process_key);
    if key.is_empty() {
        return false;
    }
    let key_tokens = tokenize(&key);
    let name = process.name.to_lowercase();
    let base_name = exe_base_name(process);

    matches_prepared(&name, base_name.as_deref(), &key, &key_tokens)
}

fn matches_prepared(name: &str, base_name: Option<&str>, key: &str, key_tokens: &[&str]) -> bool {
    if name == key {
        return true;
    }
    if contains_token_run(&tokenize(name), key_tokens) {
        return true;
    }
    base_name.is_some_and(|base| base_name_matches(base, key))
}

/// Pure matching function: first entry in watchlist order wins
pub fn match_process<'a>(process: &ProcessDescriptor, watchlist: &'a [ProtectedApp]) -> Option<&'a ProtectedApp> {
    watchlist
        .iter()
        .find(|app| process_matches_key(process, &app.process_key))
}

/// Lookup table rebuilt whenever the watchlist changes, so keys are
/// normalized and tokenized once rather than on every tick.
#[derive(Debug, Clone)]
pub struct Matcher {
    watchlist: WatchlistSnapshot,
    keys: Vec<(String, Vec<String>)>,
}

impl Matcher {
    pub fn new(watchlist: WatchlistSnapshot) -> Self {
        let keys = watchlist
            .iter()
            .map(|app| {
                let key = normalize_key(&app.process_key);
                let tokens = tokenize(&key).into_iter().map(str::to_string).collect();
                (key, tokens)
            })
            .collect();
        Self { watchlist, keys }
    }

    pub fn watchlist(&self) -> &WatchlistSnapshot {
        &self.watchlist
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Same result as `match_process` against the snapshot
    pub fn find(&self, process: &ProcessDescriptor) -> Option<&ProtectedApp> {
        if self.keys.is_empty() {
            return None;
        }
        let name = process.name.to_lowercase();
        let name_tokens = tokenize(&name);
        let base_name = exe_base_name(process);

        self.keys
            .iter()
            .position(|(key, key_tokens)| {
                if key.is_empty() {
                    return false;
                }
                let key_tokens: Vec<&str> = key_tokens.iter().map(String::as_str).collect();
                name == *key
                    || contains_token_run(&name_tokens, &key_tokens)
                    || base_name.as_deref().is_some_and(|base| base_name_matches(base, key))
            })
            .map(|index| &self.watchlist[index])
    }
}
