//! Claude Code session discovery
//!
//! Claude keeps one log directory per working directory:
//! ~/.claude/projects/
//! ├── -home-user-project-path/     # Folder name = path with / and _ → -
//! │   ├── {uuid}.jsonl             # Session conversation log
//! │   └── {uuid}/                  # Session directory
//!
//! The modification time of each entry is the only recency signal, so
//! attributing a fresh Claude session to the clux session that launched it
//! is a "newest entry after launch" heuristic. Two agents started in the
//! same directory at the same moment can be misattributed.

pub mod stream;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Paths;
use crate::data::ClaudeSessionCandidate;

static SESSION_ENTRY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})(\.jsonl)?$")
        .expect("valid session entry regex")
});

/// Resolve `working_directory` to an absolute path without requiring it to exist.
pub fn resolve_path(working_directory: &Path) -> PathBuf {
    fs::canonicalize(working_directory)
        .or_else(|_| std::path::absolute(working_directory))
        .unwrap_or_else(|_| working_directory.to_path_buf())
}

/// Convert a working directory to Claude's project directory name,
/// e.g. `/home/user/my_project` → `-home-user-my-project`.
pub fn project_dir_name(working_directory: &Path) -> String {
    let path = resolve_path(working_directory);
    let path_str = path.to_string_lossy();
    let trimmed = path_str.strip_prefix('/').unwrap_or(&path_str);
    format!("-{}", trimmed.replace(['/', '_'], "-"))
}

/// Reader for Claude's per-project session logs
#[derive(Debug, Clone)]
pub struct ClaudeProjects {
    root: PathBuf,
}

impl ClaudeProjects {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_paths(paths: &Paths) -> Self {
        Self::new(paths.claude_projects_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Log directory Claude uses for `working_directory` (may not exist yet)
    pub fn project_log_dir(&self, working_directory: &Path) -> PathBuf {
        self.root.join(project_dir_name(working_directory))
    }

    /// Most recently modified session for a directory
    pub fn latest_session(&self, working_directory: &Path) -> Option<String> {
        newest(self.scan(working_directory)).map(|c| c.id)
    }

    /// Newest session modified strictly after `after`
    pub fn session_after(&self, working_directory: &Path, after: DateTime<Utc>) -> Option<String> {
        newest(
            self.scan(working_directory)
                .into_iter()
                .filter(|c| c.modified > after),
        )
        .map(|c| c.id)
    }

    /// Sessions for a directory, newest first, at most `limit`
    pub fn list_sessions(&self, working_directory: &Path, limit: usize) -> Vec<ClaudeSessionCandidate> {
        let mut sessions = self.scan(working_directory);
        sessions.sort_by(|a, b| b.modified.cmp(&a.modified));
        sessions.truncate(limit);
        sessions
    }

    /// Every UUID-named entry in the project log directory with its mtime.
    ///
    /// A missing directory or an unreadable entry is not an error.
    fn scan(&self, working_directory: &Path) -> Vec<ClaudeSessionCandidate> {
        let project_dir = self.project_log_dir(working_directory);
        let entries = match fs::read_dir(&project_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("No Claude project dir at {}: {}", project_dir.display(), e);
                return Vec::new();
            }
        };

        // `{uuid}.jsonl` and `{uuid}/` describe the same session
        let mut by_id: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut order = Vec::new();

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(captures) = SESSION_ENTRY_PATTERN.captures(name) else {
                continue;
            };
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry {}: {}", name, e);
                    continue;
                }
            };

            let id = captures[1].to_lowercase();
            match by_id.get_mut(&id) {
                Some(existing) => {
                    if modified > *existing {
                        *existing = modified;
                    }
                }
                None => {
                    by_id.insert(id.clone(), modified);
                    order.push(id);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|id| {
                let modified = by_id.remove(&id)?;
                Some(ClaudeSessionCandidate { id, modified })
            })
            .collect()
    }
}

/// Newest candidate; on equal timestamps the last one scanned wins.
fn newest(candidates: impl IntoIterator<Item = ClaudeSessionCandidate>) -> Option<ClaudeSessionCandidate> {
    candidates.into_iter().fold(None, |best, candidate| match best {
        Some(best) if best.modified > candidate.modified => Some(best),
        _ => Some(candidate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_dir_name_replaces_separators_and_underscores() {
        assert_eq!(
            project_dir_name(Path::new("/home/user/my_project")),
            "-home-user-my-project"
        );
    }

    #[test]
    fn test_project_dir_name_is_stable() {
        let p = Path::new("/definitely/not/on/disk");
        assert_eq!(project_dir_name(p), project_dir_name(p));
        assert_eq!(project_dir_name(p), "-definitely-not-on-disk");
    }

    #[test]
    fn test_entry_pattern() {
        let uuid = "0b7e5a2c-1f3d-4c5e-9a8b-7c6d5e4f3a2b";
        assert!(SESSION_ENTRY_PATTERN.is_match(uuid));
        assert!(SESSION_ENTRY_PATTERN.is_match(&format!("{}.jsonl", uuid)));
        assert!(!SESSION_ENTRY_PATTERN.is_match(&format!("{}.json", uuid)));
        assert!(!SESSION_ENTRY_PATTERN.is_match("settings.json"));
    }
}
