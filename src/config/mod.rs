use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Filesystem locations used by clux.
///
/// Resolved once at startup and passed into each component, so tests can
/// point the registry and the Claude projects root at scratch directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Directory holding `sessions.db`
    pub data_dir: PathBuf,
    /// Location of `config.toml`
    pub config_file: PathBuf,
    /// Claude Code's per-project session logs (`~/.claude/projects`)
    pub claude_projects_dir: PathBuf,
}

impl Paths {
    /// Discover the platform defaults (XDG data/config dirs, `~/.claude/projects`)
    pub fn discover() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "clux")
            .context("Could not determine data and config directories")?;
        let home = dirs::home_dir().context("Could not find home directory")?;

        Ok(Self {
            data_dir: dirs.data_dir().to_path_buf(),
            config_file: dirs.config_dir().join("config.toml"),
            claude_projects_dir: home.join(".claude").join("projects"),
        })
    }

    /// All paths rooted under one directory
    pub fn under(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            config_file: root.join("config").join("config.toml"),
            claude_projects_dir: root.join("claude").join("projects"),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Launch Claude with `--dangerously-skip-permissions` unless `--safe` is given
    #[serde(default = "default_true")]
    pub yolo_mode: bool,
    #[serde(default = "default_claude_command")]
    pub claude_command: String,
    #[serde(default = "default_tmux_command")]
    pub tmux_command: String,
    /// Wall-clock limit for `clux prompt`
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,
    /// Lines shown by `clux peek`
    #[serde(default = "default_preview_lines")]
    pub preview_lines: usize,
}

fn default_true() -> bool {
    true
}

fn default_claude_command() -> String {
    "claude".to_string()
}

fn default_tmux_command() -> String {
    "tmux".to_string()
}

fn default_prompt_timeout() -> u64 {
    900
}

fn default_preview_lines() -> usize {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            yolo_mode: true,
            claude_command: default_claude_command(),
            tmux_command: default_tmux_command(),
            prompt_timeout_secs: default_prompt_timeout(),
            preview_lines: default_preview_lines(),
        }
    }
}

impl Config {
    /// Build the Claude launch command line.
    pub fn claude_command_line(&self, safe: bool, resume: Option<&str>) -> Vec<String> {
        let mut cmd = vec![self.claude_command.clone()];
        if self.yolo_mode && !safe {
            cmd.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(session_id) = resume {
            cmd.push("--resume".to_string());
            cmd.push(session_id.to_string());
        }
        cmd
    }
}

/// Load the config file, writing the defaults on first run.
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        if let Err(e) = save(&config, path) {
            tracing::warn!("Failed to write default config to {}: {}", path.display(), e);
        }
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    Ok(config)
}

pub fn save(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(())
}
