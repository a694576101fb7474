//! Tests for Claude print-mode stream parsing and the timeout-bounded runner

use clux::integrations::claude::stream::{
    execute, OutputMode, StreamAccumulator, TIMEOUT_EXIT_CODE,
};

mod accumulator {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collects_text_blocks_only() {
        let mut acc = StreamAccumulator::new();
        let emitted = acc.ingest_line(
            r#"{"type":"assistant","message":{"content":[
                {"type":"text","text":"Hello, "},
                {"type":"tool_use","id":"t1","name":"Bash","input":{}},
                {"type":"text","text":"world"}]}}"#
                .replace('\n', "")
                .as_str(),
        );

        assert_eq!(emitted.as_deref(), Some("Hello, world"));
        assert_eq!(acc.text(), "Hello, world");
    }

    #[test]
    fn test_result_session_id_overrides_init() {
        let mut acc = StreamAccumulator::new();
        acc.ingest_line(r#"{"type":"system","subtype":"init","session_id":"from-init"}"#);
        assert_eq!(acc.session_id(), Some("from-init"));

        acc.ingest_line(r#"{"type":"result","session_id":"from-result","cost_usd":0.1}"#);
        assert_eq!(acc.session_id(), Some("from-result"));
        assert_eq!(acc.cost_usd(), Some(0.1));
    }

    #[test]
    fn test_init_does_not_override_result() {
        let mut acc = StreamAccumulator::new();
        acc.ingest_line(r#"{"type":"result","session_id":"final"}"#);
        acc.ingest_line(r#"{"type":"system","subtype":"init","session_id":"late-init"}"#);
        assert_eq!(acc.session_id(), Some("final"));
    }

    #[test]
    fn test_total_cost_is_fallback() {
        let mut acc = StreamAccumulator::new();
        acc.ingest_line(r#"{"type":"result","total_cost_usd":1.5}"#);
        assert_eq!(acc.cost_usd(), Some(1.5));
    }

    #[test]
    fn test_unknown_and_malformed_lines_are_ignored() {
        let mut acc = StreamAccumulator::new();
        assert_eq!(acc.ingest_line(""), None);
        assert_eq!(acc.ingest_line("not json"), None);
        assert_eq!(acc.ingest_line(r#"{"type":"user","message":{}}"#), None);
        assert_eq!(acc.ingest_line(r#"{"type":"system","subtype":"hook"}"#), None);
        assert_eq!(acc.text(), "");
        assert_eq!(acc.session_id(), None);
    }
}

#[cfg(unix)]
mod runner {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    const EVENTS: &str = r#"echo '{"type":"system","subtype":"init","session_id":"abc"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"one "}]}}'
echo 'garbage'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"two"}]}}'
echo '{"type":"result","session_id":"abc","cost_usd":0.02}'"#;

    #[tokio::test]
    async fn test_text_mode_streams_assistant_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunks = Vec::new();

        let result = execute(
            &sh(EVENTS),
            dir.path(),
            Duration::from_secs(10),
            OutputMode::Text,
            |chunk| chunks.push(chunk.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(chunks, vec!["one ", "two"]);
        assert_eq!(result.text, "one two");
        assert_eq!(result.session_id.as_deref(), Some("abc"));
        assert_eq!(result.cost_usd, Some(0.02));
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.error, None);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_json_mode_passes_raw_lines_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut lines = Vec::new();

        let result = execute(
            &sh(EVENTS),
            dir.path(),
            Duration::from_secs(10),
            OutputMode::Json,
            |line| lines.push(line.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[2], "garbage");
        // Parsing still happens for the result
        assert_eq!(result.text, "one two");
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"printf '\377\376\n'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}'
echo '{"type":"result","session_id":"abc"}'"#;
        let mut lines = Vec::new();

        let result = execute(
            &sh(script),
            dir.path(),
            Duration::from_secs(10),
            OutputMode::Json,
            |line| lines.push(line.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(result.text, "hello");
        assert_eq!(result.session_id.as_deref(), Some("abc"));
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();

        let result = execute(
            &sh("echo 'No conversation found' >&2; exit 3"),
            dir.path(),
            Duration::from_secs(10),
            OutputMode::Text,
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.error.as_deref(), Some("No conversation found"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child_and_keeps_partial_text() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"partial"}]}}'; exec sleep 30"#;

        let result = execute(
            &sh(script),
            dir.path(),
            Duration::from_millis(500),
            OutputMode::Text,
            |_| {},
        )
        .await
        .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(result.error.as_deref(), Some("Timeout expired"));
        assert_eq!(result.text, "partial");
    }

    #[tokio::test]
    async fn test_runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let script = r#"if [ -f marker.txt ]; then echo '{"type":"assistant","message":{"content":[{"type":"text","text":"found"}]}}'; fi"#;

        let result = execute(
            &sh(script),
            dir.path(),
            Duration::from_secs(10),
            OutputMode::Text,
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(result.text, "found");
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let argv = vec!["/nonexistent/claude-binary".to_string()];

        let err = execute(&argv, dir.path(), Duration::from_secs(1), OutputMode::Text, |_| {})
            .await
            .unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
