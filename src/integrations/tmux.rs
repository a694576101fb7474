//! tmux integration
//!
//! Everything clux does to processes goes through the [`Multiplexer`] trait.
//! [`Tmux`] shells out to the tmux CLI; tests substitute an in-memory fake.
//!
//! Read-only queries never fail: if tmux is missing or no server is running
//! they report "no sessions". Mutating calls fail with
//! [`CluxError::TmuxUnavailable`] when the binary cannot be executed.

use std::collections::HashMap;
use std::io;
use std::process::{Command, Output};

use crate::data::TmuxSession;
use crate::error::{CluxError, Result};

/// Point-in-time view of all live tmux sessions, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    sessions: HashMap<String, TmuxSession>,
}

impl Snapshot {
    pub fn from_sessions(sessions: impl IntoIterator<Item = TmuxSession>) -> Self {
        Self {
            sessions: sessions.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TmuxSession> {
        self.sessions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn is_attached(&self, name: &str) -> bool {
        self.get(name).map(|s| s.attached).unwrap_or(false)
    }

    pub fn remove(&mut self, name: &str) -> Option<TmuxSession> {
        self.sessions.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

pub trait Multiplexer {
    /// One bulk query for every live session.
    fn snapshot(&self) -> Snapshot;

    /// Create a detached session rooted at `working_directory`.
    fn create(&self, name: &str, working_directory: &str) -> Result<()>;

    /// Type `keys` into the session followed by Enter.
    fn send_keys(&self, name: &str, keys: &str) -> Result<()>;

    /// Attach in the foreground; blocks until the client detaches or the session ends.
    fn attach(&self, name: &str) -> Result<i32>;

    /// Point the current tmux client at another session.
    fn switch_client(&self, name: &str) -> Result<()>;

    fn kill(&self, name: &str) -> Result<()>;

    /// Full scrollback, truncated to the last `max_lines` lines.
    fn capture_pane(&self, name: &str, max_lines: usize) -> String;

    /// Best-effort message on the tmux status line.
    fn display_message(&self, message: &str);

    fn exists(&self, name: &str, snapshot: Option<&Snapshot>) -> bool {
        match snapshot {
            Some(snapshot) => snapshot.contains(name),
            None => self.snapshot().contains(name),
        }
    }

    fn is_attached(&self, name: &str, snapshot: Option<&Snapshot>) -> bool {
        match snapshot {
            Some(snapshot) => snapshot.is_attached(name),
            None => self.snapshot().is_attached(name),
        }
    }
}

/// The real tmux CLI
#[derive(Debug, Clone)]
pub struct Tmux {
    binary: String,
}

impl Default for Tmux {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl Tmux {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check if tmux is available on the system
    pub fn available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-V")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Run a mutating tmux command, mapping a missing binary and non-zero exits to errors.
    fn run(&self, mut cmd: Command, what: &str) -> Result<Output> {
        let output = cmd.output().map_err(spawn_error)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!("tmux {} failed: {}", what, stderr);
            return Err(CluxError::Tmux(format!("{}: {}", what, stderr)));
        }
        Ok(output)
    }
}

fn spawn_error(err: io::Error) -> CluxError {
    if err.kind() == io::ErrorKind::NotFound {
        CluxError::TmuxUnavailable
    } else {
        CluxError::Io(err)
    }
}

impl Multiplexer for Tmux {
    fn snapshot(&self) -> Snapshot {
        let output = self
            .command()
            .args([
                "list-sessions",
                "-F",
                "#{session_name}:#{session_attached}:#{session_windows}",
            ])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Snapshot::from_sessions(parse_list_sessions(&String::from_utf8_lossy(&output.stdout)))
            }
            Ok(output) => {
                // No server running / no sessions is the normal empty state
                tracing::debug!(
                    "tmux list-sessions exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Snapshot::default()
            }
            Err(e) => {
                tracing::warn!("Failed to run tmux list-sessions: {}", e);
                Snapshot::default()
            }
        }
    }

    fn create(&self, name: &str, working_directory: &str) -> Result<()> {
        let mut cmd = self.command();
        // Creating from inside tmux otherwise fails with "sessions should be nested with care"
        cmd.env_remove("TMUX")
            .args(["new-session", "-d", "-s", name, "-c", working_directory]);
        self.run(cmd, "new-session")?;
        tracing::debug!("Created tmux session: {}", name);
        Ok(())
    }

    fn send_keys(&self, name: &str, keys: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["send-keys", "-t", name, keys, "Enter"]);
        self.run(cmd, "send-keys")?;
        Ok(())
    }

    fn attach(&self, name: &str) -> Result<i32> {
        let status = self
            .command()
            .args(["attach-session", "-t", name])
            .status()
            .map_err(spawn_error)?;
        Ok(status.code().unwrap_or(1))
    }

    fn switch_client(&self, name: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["switch-client", "-t", name]);
        self.run(cmd, "switch-client")?;
        Ok(())
    }

    fn kill(&self, name: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["kill-session", "-t", name]);
        self.run(cmd, "kill-session")?;
        tracing::debug!("Killed tmux session: {}", name);
        Ok(())
    }

    fn capture_pane(&self, name: &str, max_lines: usize) -> String {
        let output = self
            .command()
            .args(["capture-pane", "-t", name, "-p", "-S", "-", "-E", "-"])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                tail_lines(&String::from_utf8_lossy(&output.stdout), max_lines)
            }
            Ok(output) => {
                tracing::debug!(
                    "Failed to capture pane content: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                String::new()
            }
            Err(e) => {
                tracing::warn!("Failed to run tmux capture-pane: {}", e);
                String::new()
            }
        }
    }

    fn display_message(&self, message: &str) {
        if let Err(e) = self.command().args(["display-message", message]).output() {
            tracing::debug!("Failed to display tmux message: {}", e);
        }
    }
}

/// Parse `name:attached:windows` lines from `tmux list-sessions -F`.
///
/// Session names may themselves contain `:`, so the two numeric fields are
/// taken from the right.
pub fn parse_list_sessions(stdout: &str) -> Vec<TmuxSession> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.rsplitn(3, ':');
            let windows = parts.next()?.trim().parse().ok()?;
            let attached = parts.next()?.trim();
            let name = parts.next()?;
            Some(TmuxSession {
                name: name.to_string(),
                // session_attached is a client count
                attached: attached.parse::<u32>().map(|n| n > 0).unwrap_or(false),
                windows,
            })
        })
        .collect()
}

/// Last `max_lines` lines of `text`, ignoring trailing blank output.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end_matches('\n').split('\n').collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_sessions() {
        let sessions = parse_list_sessions("clux-foo-abc123:1:2\nother:0:1\n\n");
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "clux-foo-abc123");
        assert!(sessions[0].attached);
        assert_eq!(sessions[0].windows, 2);
        assert!(!sessions[1].attached);
    }

    #[test]
    fn test_parse_list_sessions_name_with_colon_and_garbage() {
        let sessions = parse_list_sessions("weird:name:0:3\nnot-a-session-line\n");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "weird:name");
        assert_eq!(sessions[0].windows, 3);
    }

    #[test]
    fn test_tail_lines_keeps_most_recent() {
        assert_eq!(tail_lines("a\nb\nc\nd\n", 2), "c\nd");
        assert_eq!(tail_lines("a\nb\n", 10), "a\nb");
        assert_eq!(tail_lines("", 5), "");
    }

    #[test]
    fn test_snapshot_lookups() {
        let snapshot = Snapshot::from_sessions(vec![TmuxSession {
            name: "clux-a-000000".to_string(),
            attached: true,
            windows: 1,
        }]);
        assert!(snapshot.contains("clux-a-000000"));
        assert!(snapshot.is_attached("clux-a-000000"));
        assert!(!snapshot.is_attached("missing"));
        assert_eq!(snapshot.len(), 1);
    }
}
