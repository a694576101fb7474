//! Plain-terminal rendering of session lists.

use chrono::{DateTime, Utc};
use crossterm::style::{Color, Stylize};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use unicode_width::UnicodeWidthStr;

use crate::data::{Session, SessionStatus};
use crate::util::shorten_home;

/// Column width for session names in list output.
pub const NAME_WIDTH: usize = 20;

/// Column width for the age column.
pub const AGE_WIDTH: usize = 12;

/// Marker shown after sessions that can be resumed.
pub const RESUME_MARKER: &str = "↺";

/// Calculate the display width of text (accounting for Unicode).
pub fn display_width(text: &str) -> usize {
    UnicodeWidthStr::width(text)
}

/// Left-align `text` in a column `width` cells wide.
pub fn pad_to_width(text: &str, width: usize) -> String {
    let used = display_width(text);
    if used >= width {
        return text.to_string();
    }
    format!("{}{}", text, " ".repeat(width - used))
}

fn paint(text: String, color: Color, bold: bool, enabled: bool) -> String {
    if !enabled {
        return text;
    }
    let styled = text.with(color);
    if bold {
        styled.bold().to_string()
    } else {
        styled.to_string()
    }
}

fn status_color(status: SessionStatus) -> Color {
    match status {
        SessionStatus::Active => Color::Green,
        SessionStatus::Detached => Color::Yellow,
        SessionStatus::Idle => Color::White,
        SessionStatus::Archived => Color::DarkGrey,
    }
}

/// One indented line: icon, name, age, status and the resume marker.
pub fn format_session_line(session: &Session, now: DateTime<Utc>, color: bool) -> String {
    // Pad before styling so escape codes do not count toward the width
    let icon = paint(
        session.status.icon().to_string(),
        status_color(session.status),
        false,
        color,
    );
    let name = paint(pad_to_width(&session.name, NAME_WIDTH), Color::Reset, true, color);
    let age = paint(pad_to_width(&session.age(now), AGE_WIDTH), Color::DarkGrey, false, color);
    let status = paint(session.status.to_string(), Color::Cyan, false, color);

    let mut line = format!("  {} {} {} {}", icon, name, age, status);
    if session.claude_session_id.is_some() {
        line.push(' ');
        line.push_str(&paint(RESUME_MARKER.to_string(), Color::Blue, false, color));
    }
    line
}

/// Sessions grouped by working directory: `current_dir` first, the rest alphabetically.
///
/// Within a group the incoming order is kept.
pub fn group_by_directory<'a>(
    sessions: &'a [Session],
    current_dir: &str,
) -> Vec<(&'a str, Vec<&'a Session>)> {
    let mut by_dir: BTreeMap<&str, Vec<&Session>> = BTreeMap::new();
    for session in sessions {
        by_dir
            .entry(session.working_directory.as_str())
            .or_default()
            .push(session);
    }

    let mut groups: Vec<_> = by_dir.into_iter().collect();
    groups.sort_by_key(|(dir, _)| *dir != current_dir);
    groups
}

/// Full `clux list` output.
pub fn render_list(
    sessions: &[Session],
    current_dir: &str,
    home: Option<&Path>,
    now: DateTime<Utc>,
    color: bool,
) -> String {
    let mut out = String::new();
    for (dir, group) in group_by_directory(sessions, current_dir) {
        let shown = shorten_home(dir, home);
        out.push('\n');
        if dir == current_dir {
            out.push_str(&paint(format!("{} (current)", shown), Color::Green, true, color));
        } else {
            out.push_str(&paint(shown, Color::Blue, false, color));
        }
        out.push('\n');
        for session in group {
            out.push_str(&format_session_line(session, now, color));
            out.push('\n');
        }
    }
    out
}

/// The fields `clux list --json` exposes.
#[derive(Debug, Serialize)]
pub struct SessionSummary<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub working_directory: &'a str,
    pub status: SessionStatus,
    pub claude_session_id: Option<&'a str>,
    pub last_activity: DateTime<Utc>,
}

impl<'a> From<&'a Session> for SessionSummary<'a> {
    fn from(session: &'a Session) -> Self {
        Self {
            id: &session.id,
            name: &session.name,
            working_directory: &session.working_directory,
            status: session.status,
            claude_session_id: session.claude_session_id.as_deref(),
            last_activity: session.last_activity,
        }
    }
}

pub fn render_json(sessions: &[Session]) -> serde_json::Result<String> {
    let summaries: Vec<SessionSummary<'_>> = sessions.iter().map(SessionSummary::from).collect();
    serde_json::to_string(&summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(name: &str, dir: &str, claude: Option<&str>) -> Session {
        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        Session {
            id: format!("id-{}", name),
            name: name.to_string(),
            working_directory: dir.to_string(),
            status: SessionStatus::Detached,
            created_at: ts,
            last_activity: ts,
            archived_at: None,
            tmux_session: None,
            claude_session_id: claude.map(String::from),
        }
    }

    #[test]
    fn test_pad_to_width_counts_wide_chars() {
        assert_eq!(pad_to_width("ab", 4), "ab  ");
        assert_eq!(pad_to_width("日本", 6), "日本  ");
        assert_eq!(pad_to_width("toolong", 3), "toolong");
    }

    #[test]
    fn test_session_line_plain() {
        let s = session("api", "/w", Some("abc"));
        let now = s.last_activity + chrono::Duration::hours(2);
        let line = format_session_line(&s, now, false);
        assert!(line.starts_with("  ○ api "));
        assert!(line.contains("2h ago"));
        assert!(line.ends_with("detached ↺"));
    }

    #[test]
    fn test_current_directory_first() {
        let sessions = vec![
            session("a", "/a", None),
            session("z", "/z", None),
            session("m", "/m", None),
        ];
        let dirs: Vec<&str> = group_by_directory(&sessions, "/m")
            .into_iter()
            .map(|(d, _)| d)
            .collect();
        assert_eq!(dirs, vec!["/m", "/a", "/z"]);
    }

    #[test]
    fn test_json_fields() {
        let sessions = vec![session("api", "/w", None)];
        let value: serde_json::Value = serde_json::from_str(&render_json(&sessions).unwrap()).unwrap();
        assert_eq!(value[0]["name"], "api");
        assert_eq!(value[0]["status"], "detached");
        assert!(value[0]["claude_session_id"].is_null());
    }
}
