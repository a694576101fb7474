use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::util::format_age;

/// Reserved prefix for every tmux session clux creates.
pub const SESSION_PREFIX: &str = "clux-";

/// Maximum length of a session name.
pub const MAX_NAME_LEN: usize = 50;

static SESSION_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").expect("valid session name regex"));

/// A logical session tracked in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub working_directory: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    /// Name of the backing tmux session, if one was ever assigned
    pub tmux_session: Option<String>,
    /// Claude Code's own session UUID, once discovered
    pub claude_session_id: Option<String>,
}

impl Session {
    pub fn is_archived(&self) -> bool {
        self.status == SessionStatus::Archived
    }

    pub fn age(&self, now: DateTime<Utc>) -> String {
        format_age(self.last_activity, now)
    }

    /// tmux name to use for this session, deriving one if the row has none
    pub fn tmux_name(&self) -> String {
        self.tmux_session
            .clone()
            .unwrap_or_else(|| make_tmux_name(&self.name, &self.working_directory))
    }
}

/// Status derived from observing tmux
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No tmux process
    #[default]
    Idle,
    /// tmux process exists, no client attached
    Detached,
    /// tmux process exists with a client attached
    Active,
    /// Soft-deleted; only `restore` leaves this state
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Detached => "detached",
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Active => "●",
            Self::Detached | Self::Idle => "○",
            Self::Archived => "◌",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "detached" => Ok(Self::Detached),
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// A live tmux session as reported by `tmux list-sessions`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxSession {
    pub name: String,
    pub attached: bool,
    pub windows: u32,
}

/// A Claude Code session found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeSessionCandidate {
    pub id: String,
    pub modified: DateTime<Utc>,
}

/// Validate a session name.
///
/// Names are 1-50 characters, start with an ASCII letter or digit, and
/// otherwise contain only letters, digits, hyphens and underscores.
pub fn validate_session_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Session name cannot be empty".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!(
            "Session name must be {} characters or less",
            MAX_NAME_LEN
        ));
    }
    if !SESSION_NAME_PATTERN.is_match(name) {
        return Err("Session name must start with alphanumeric and contain only letters, numbers, hyphens, and underscores".to_string());
    }
    Ok(())
}

/// Generate the tmux session name for a session.
///
/// Includes a short hash of the directory so the same session name in two
/// directories maps to two tmux sessions.
pub fn make_tmux_name(session_name: &str, working_directory: &str) -> String {
    let digest = Sha256::digest(working_directory.as_bytes());
    let dir_hash: String = digest
        .iter()
        .take(3)
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("{}{}-{}", SESSION_PREFIX, session_name, dir_hash)
}
