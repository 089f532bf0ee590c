//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{
    MAILBOX_CAPACITY_RANGE, MAX_MESSAGE_SIZE_RANGE, PONG_WAIT_MS_RANGE, RelaySettings,
    TOKEN_TTL_SECS_RANGE,
};

/// Resolve the default settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = read_layered(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `RELAY_*` overrides read through `lookup`.
///
/// Unparseable or out-of-range values are ignored, leaving the file or
/// default value in place. Ranges are the ones [`RelaySettings::validate`]
/// enforces.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("RELAY_PORT").and_then(|v| parse_range(&v, 0u16, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = read("RELAY_ALLOWED_ORIGINS") {
        settings.server.allowed_origins = v
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_owned)
            .collect();
    }
    if let Some(v) = read("RELAY_MAX_MESSAGE_SIZE")
        .and_then(|v| parse_within(&v, &MAX_MESSAGE_SIZE_RANGE))
        .and_then(|v| usize::try_from(v).ok())
    {
        settings.connection.max_message_size = v;
    }
    if let Some(v) = read("RELAY_PONG_WAIT_MS").and_then(|v| parse_within(&v, &PONG_WAIT_MS_RANGE)) {
        settings.connection.pong_wait_ms = v;
    }
    if let Some(v) = read("RELAY_MAILBOX_CAPACITY")
        .and_then(|v| parse_within(&v, &MAILBOX_CAPACITY_RANGE))
        .and_then(|v| usize::try_from(v).ok())
    {
        settings.connection.mailbox_capacity = v;
    }
    if let Some(v) = read("RELAY_TOKEN_TTL_SECS").and_then(|v| parse_within(&v, &TOKEN_TTL_SECS_RANGE)) {
        settings.auth.token_ttl_secs = v;
    }
    if let Some(v) = read("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("RELAY_LOG_JSON").and_then(|v| parse_bool(&v)) {
        settings.logging.json = v;
    }
}

/// Parse a boolean flag (`true`/`1`/`yes`/`on`, `false`/`0`/`no`/`off`).
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse an integer and keep it only if it falls within `[min, max]`.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    val.trim()
        .parse::<T>()
        .ok()
        .filter(|v| *v >= min && *v <= max)
}

fn parse_within(val: &str, range: &RangeInclusive<u64>) -> Option<u64> {
    parse_range(val, *range.start(), *range.end())
}
