//! Claude print-mode (`--output-format stream-json`) execution.
//!
//! The child writes one JSON event per line. Only three kinds matter here:
//! assistant messages (text blocks), `system`/`init` (session id) and the
//! final `result` (session id and cost). Everything else is skipped.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Conventional exit status for a command killed by a timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Assistant {
        message: AssistantMessage,
    },
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Result {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Folds stream events into the text, session id and cost of a run.
#[derive(Debug, Default, Clone)]
pub struct StreamAccumulator {
    text: String,
    session_id: Option<String>,
    cost_usd: Option<f64>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw line; returns the assistant text it contributed, if any.
    ///
    /// Blank and malformed lines are ignored.
    pub fn ingest_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<StreamEvent>(line) {
            Ok(event) => self.ingest(event),
            Err(e) => {
                tracing::debug!("Skipping unparseable stream line: {}", e);
                None
            }
        }
    }

    pub fn ingest(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::Assistant { message } => {
                let text: String = message
                    .content
                    .into_iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text),
                        ContentBlock::Other => None,
                    })
                    .collect();
                if text.is_empty() {
                    return None;
                }
                self.text.push_str(&text);
                Some(text)
            }
            StreamEvent::System {
                subtype,
                session_id,
            } => {
                // The result event is authoritative; init only fills a gap
                if subtype.as_deref() == Some("init") && self.session_id.is_none() {
                    self.session_id = session_id;
                }
                None
            }
            StreamEvent::Result {
                session_id,
                cost_usd,
                total_cost_usd,
            } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                self.cost_usd = cost_usd.or(total_cost_usd);
                None
            }
            StreamEvent::Other => None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn cost_usd(&self) -> Option<f64> {
        self.cost_usd
    }
}

/// Result of one print-mode run
#[derive(Debug, Clone, PartialEq)]
pub struct PromptResult {
    pub text: String,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub exit_code: i32,
    pub error: Option<String>,
    pub timed_out: bool,
}

/// Where streamed output goes while the child runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Assistant text only
    Text,
    /// Every raw NDJSON line, unparsed
    Json,
}

/// Spawn `argv` in `cwd`, stream its events into `sink`, and stop it after `timeout`.
///
/// A timeout is not an error: the child is killed and the returned result
/// carries `timed_out = true`, exit code 124 and whatever text arrived before
/// the deadline.
pub async fn execute<F>(
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
    mode: OutputMode,
    mut sink: F,
) -> std::io::Result<PromptResult>
where
    F: FnMut(&str),
{
    let (program, args) = argv.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line")
    })?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("child stderr not captured"))?;

    // Drain stderr concurrently so a chatty child cannot block on a full pipe
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let mut acc = StreamAccumulator::new();
    let run = async {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line,
                Err(e) => {
                    tracing::debug!("Skipping non-UTF-8 stream line: {}", e);
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if mode == OutputMode::Json {
                sink(line.trim());
            }
            if let Some(text) = acc.ingest_line(line) {
                if mode == OutputMode::Text {
                    sink(&text);
                }
            }
        }
        child.wait().await
    };

    let waited = tokio::time::timeout(timeout, run).await;

    let (exit_code, error, timed_out) = match waited {
        Ok(status) => {
            let status = status?;
            let stderr = stderr_task.await.unwrap_or_default();
            let code = status.code().unwrap_or(1);
            let error = (code != 0)
                .then(|| stderr.trim().to_string())
                .filter(|s| !s.is_empty());
            (code, error, false)
        }
        Err(_) => {
            tracing::warn!("Prompt timed out after {}s, killing child", timeout.as_secs());
            if let Err(e) = child.kill().await {
                tracing::debug!("Failed to kill timed-out child: {}", e);
            }
            stderr_task.abort();
            (TIMEOUT_EXIT_CODE, Some("Timeout expired".to_string()), true)
        }
    };

    Ok(PromptResult {
        text: acc.text().to_string(),
        session_id: acc.session_id().map(String::from),
        cost_usd: acc.cost_usd(),
        exit_code,
        error,
        timed_out,
    })
}
