//! `.env` file loader.
//!
//! Parses `KEY=VALUE` lines into a plain map without ever touching the
//! process environment; secrets are handed to subprocesses explicitly via
//! `Command::env`, never inherited. A missing file yields an empty map so
//! every key falls back to its "disabled" default.
//!
//! The default-path load is cached for the lifetime of the process. Loads
//! from an explicit path (tests, tooling) bypass the cache.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

/// Default location, relative to the working directory the service runs in.
pub const DEFAULT_ENV_PATH: &str = ".env";

static CACHE: OnceLock<Mutex<Option<HashMap<String, String>>>> = OnceLock::new();

fn cache() -> &'static Mutex<Option<HashMap<String, String>>> {
    CACHE.get_or_init(|| Mutex::new(None))
}

/// Load (and cache) the map from [`DEFAULT_ENV_PATH`].
pub fn load_default() -> HashMap<String, String> {
    let mut slot = cache().lock().unwrap();
    if let Some(map) = slot.as_ref() {
        return map.clone();
    }
    let map = load_from(Path::new(DEFAULT_ENV_PATH));
    *slot = Some(map.clone());
    map
}

/// Drop the cached default-path map. Test hook.
pub fn reset_cache() {
    *cache().lock().unwrap() = None;
}

/// Load a map from an explicit path, bypassing the cache.
pub fn load_from(path: &Path) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(raw) => parse(&raw),
        Err(_) => HashMap::new(),
    }
}

/// Parse `.env` file contents.
///
/// Rules:
/// - blank lines and `#` comment lines are skipped
/// - each remaining line splits on the first `=`
/// - a value wrapped in matching single or double quotes is used verbatim
///   (outer quotes stripped, no inline-comment handling inside)
/// - otherwise a ` #` sequence starts an inline comment and the suffix drops
pub fn parse(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim_end();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), clean_value(value));
    }
    out
}

fn clean_value(raw: &str) -> String {
    let v = raw.trim();
    if v.len() >= 2 {
        let first = v.as_bytes()[0];
        let last = v.as_bytes()[v.len() - 1];
        if first == last && (first == b'"' || first == b'\'') {
            return v[1..v.len() - 1].to_string();
        }
    }
    match v.find(" #") {
        Some(idx) => v[..idx].trim_end().to_string(),
        None => v.to_string(),
    }
}
