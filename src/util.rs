//! Utility functions and helpers.

use chrono::{DateTime, Utc};
use std::path::Path;

/// Source of "now" for timestamps written to the registry.
///
/// Production code uses [`SystemClock`]; tests inject a controllable clock so
/// ordering by `last_activity` is deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Human-readable age of a timestamp relative to `now` ("3d ago", "2h ago", "5m ago").
pub fn format_age(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(ts);
    if delta.num_days() > 0 {
        return format!("{}d ago", delta.num_days());
    }
    let hours = delta.num_hours().max(0);
    if hours > 0 {
        return format!("{}h ago", hours);
    }
    format!("{}m ago", delta.num_minutes().max(0))
}

/// Replace a leading home directory with `~` for display.
pub fn shorten_home(path: &str, home: Option<&Path>) -> String {
    let Some(home) = home.and_then(|h| h.to_str()) else {
        return path.to_string();
    };
    if home.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(home) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("~{}", rest),
        _ => path.to_string(),
    }
}
