use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use clux::config::{self, Paths};
use clux::display;
use clux::error::CluxError;
use clux::integrations::claude::stream::OutputMode;
use clux::integrations::claude::ClaudeProjects;
use clux::integrations::tmux::{Multiplexer, Tmux};
use clux::manager::{CloseTarget, PromptOptions, SessionManager};
use clux::store::SessionStore;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "clux")]
#[command(about = "Session manager for Claude Code agents running inside tmux")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new Claude session in the current directory
    #[command(alias = "n")]
    New {
        name: String,
        /// Disable YOLO mode for this session
        #[arg(long)]
        safe: bool,
    },

    /// List sessions (the default command)
    #[command(alias = "l")]
    List {
        /// Include archived sessions
        #[arg(long)]
        all: bool,
        /// Only show sessions for the current directory
        #[arg(long)]
        here: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Attach to a session, starting Claude again if it is not running
    #[command(alias = "a")]
    Attach {
        name: String,
        /// Use safe mode if Claude has to be started
        #[arg(long)]
        safe: bool,
    },

    /// Archive a session and stop its tmux process
    Archive { name: String },

    /// Restore an archived session
    Restore { name: String },

    /// Kill a session's tmux process (keeps the session resumable)
    #[command(alias = "k")]
    Kill { name: String },

    /// Archive a session and kill its tmux process in one step
    #[command(alias = "x")]
    Close {
        name: Option<String>,
        /// Look up the session by tmux session name (used by the tmux menu)
        #[arg(long)]
        tmux_name: Option<String>,
    },

    /// Create a session in the same directory as the current one (used by the tmux menu)
    NewHere {
        name: String,
        /// Current tmux session name
        #[arg(long)]
        tmux_name: String,
        #[arg(long)]
        safe: bool,
    },

    /// Switch to the next session in the same directory (used by the tmux menu)
    Next {
        /// Current tmux session name
        #[arg(long)]
        tmux_name: String,
    },

    /// Permanently delete a session
    #[command(alias = "d")]
    Delete {
        name: String,
        /// Delete without confirmation
        #[arg(long)]
        force: bool,
    },

    /// Show sessions in the current directory
    #[command(alias = "s")]
    Status,

    /// Show the last lines of a session's pane
    Peek {
        name: String,
        /// Number of lines to show (defaults to preview_lines from config)
        #[arg(long)]
        lines: Option<usize>,
    },

    /// Send a prompt to a session without attaching
    #[command(alias = "p")]
    Prompt {
        name: String,
        message: String,
        /// Working directory the session belongs to
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Output raw stream-json
        #[arg(long)]
        json: bool,
        /// Timeout in seconds (defaults to prompt_timeout_secs from config)
        #[arg(long)]
        timeout: Option<u64>,
        /// Disable YOLO mode
        #[arg(long)]
        safe: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clux=warn".parse()?),
        )
        .init();

    let paths = Paths::discover()?;
    let config_path = args.config.clone().unwrap_or_else(|| paths.config_file.clone());
    let config = config::load(&config_path)?;

    let store = SessionStore::open(&paths.db_path())
        .with_context(|| format!("Failed to open {}", paths.db_path().display()))?;
    let tmux = Tmux::new(config.tmux_command.clone());
    let manager = SessionManager::new(store, tmux, ClaudeProjects::from_paths(&paths), config);

    let command = args.command.unwrap_or(Command::List {
        all: false,
        here: false,
        json: false,
    });

    if let Err(e) = run(&manager, command).await {
        eprintln!("Error: {:#}", e);
        if let Some(hint) = e.downcast_ref::<CluxError>().and_then(hint) {
            eprintln!("{}", hint);
        }
        std::process::exit(1);
    }
    Ok(())
}

fn hint(err: &CluxError) -> Option<String> {
    match err {
        CluxError::DuplicateSession { name, .. } => {
            Some(format!("Use 'clux attach {}' to resume it.", name))
        }
        CluxError::Archived(name) => Some(format!("Use 'clux restore {}' first.", name)),
        CluxError::NotFound(_) => Some("Use 'clux list --all' to see all sessions.".to_string()),
        _ => None,
    }
}

/// Short status-line text for errors in menu-driven commands
fn menu_message(err: &CluxError) -> String {
    match err {
        CluxError::NotClux(_) => "Not a clux session".to_string(),
        CluxError::NotFound(_) => "Session not found".to_string(),
        CluxError::InvalidName(reason) => format!("Invalid name: {}", reason),
        CluxError::DuplicateSession { name, .. } => format!("Session '{}' already exists", name),
        other => other.to_string(),
    }
}

fn current_dir() -> Result<String> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    resolve_dir(&cwd)
}

fn resolve_dir(dir: &Path) -> Result<String> {
    let resolved = dir
        .canonicalize()
        .with_context(|| format!("Directory does not exist: {}", dir.display()))?;
    Ok(resolved.to_string_lossy().into_owned())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N]: ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn run(manager: &SessionManager, command: Command) -> Result<()> {
    match command {
        Command::New { name, safe } => {
            let cwd = current_dir()?;
            let launch = manager.new_session(&name, &cwd, safe)?;
            println!("Created session: {}", name);
            println!("Attaching to tmux session: {}", launch.tmux_name);
            if let Some(session) = manager.enter(&launch)? {
                if let Some(id) = &session.claude_session_id {
                    println!("Captured Claude session: {}...", short_id(id));
                }
            }
        }

        Command::List { all, here, json } => {
            let cwd = current_dir()?;
            let filter = here.then_some(cwd.as_str());
            let sessions = manager.list(all, filter)?;

            if json {
                println!("{}", display::render_json(&sessions)?);
                return Ok(());
            }
            if sessions.is_empty() {
                println!("No sessions found.");
                if !all {
                    println!("Use --all to include archived sessions.");
                }
                return Ok(());
            }

            let home = dirs::home_dir();
            let color = atty::is(atty::Stream::Stdout);
            print!(
                "{}",
                display::render_list(&sessions, &cwd, home.as_deref(), Utc::now(), color)
            );
        }

        Command::Attach { name, safe } => {
            let cwd = current_dir()?;
            let launch = manager.attach(&name, &cwd, safe)?;
            match &launch.session.claude_session_id {
                Some(id) => println!("Attaching to: {} (Claude {}...)", launch.tmux_name, short_id(id)),
                None => println!("Attaching to: {}", launch.tmux_name),
            }
            manager.enter(&launch)?;
        }

        Command::Archive { name } => {
            manager.archive(&name, &current_dir()?)?;
            println!("Archived: {}", name);
        }

        Command::Restore { name } => {
            manager.restore(&name, &current_dir()?)?;
            println!("Restored: {}", name);
        }

        Command::Kill { name } => {
            manager.kill(&name, &current_dir()?)?;
            println!("Killed: {}", name);
        }

        Command::Close { name, tmux_name } => {
            let cwd;
            let target = match (&tmux_name, &name) {
                (Some(tmux_name), _) => CloseTarget::TmuxName(tmux_name),
                (None, Some(name)) => {
                    cwd = current_dir()?;
                    CloseTarget::Name {
                        name,
                        working_directory: &cwd,
                    }
                }
                (None, None) => anyhow::bail!("Provide a session name or --tmux-name."),
            };
            let session = manager.close(target)?;
            println!("Archived and closed: {}", session.name);
        }

        Command::NewHere {
            name,
            tmux_name,
            safe,
        } => {
            if let Err(e) = manager.new_here(&name, &tmux_name, safe) {
                tracing::debug!("new-here failed: {}", e);
                manager.tmux().display_message(&menu_message(&e));
            }
        }

        Command::Next { tmux_name } => {
            if let Err(e) = manager.next(&tmux_name) {
                tracing::debug!("next failed: {}", e);
                manager.tmux().display_message(&menu_message(&e));
            }
        }

        Command::Delete { name, force } => {
            let cwd = current_dir()?;
            if manager.store().get(&name, &cwd)?.is_none() {
                return Err(CluxError::NotFound(name).into());
            }
            if !force {
                if !atty::is(atty::Stream::Stdin) {
                    anyhow::bail!("Refusing to delete '{}' without a terminal; pass --force", name);
                }
                if !confirm(&format!("Permanently delete session '{}'?", name))? {
                    return Ok(());
                }
            }
            manager.delete(&name, &cwd)?;
            println!("Deleted: {}", name);
        }

        Command::Status => {
            let sessions = manager.status(&current_dir()?)?;
            if sessions.is_empty() {
                println!("No sessions in current directory.");
                return Ok(());
            }
            let color = atty::is(atty::Stream::Stdout);
            let now = Utc::now();
            for session in &sessions {
                println!("{}", display::format_session_line(session, now, color));
            }
        }

        Command::Peek { name, lines } => {
            let content = manager.peek(&name, &current_dir()?, lines)?;
            println!("{}", content);
        }

        Command::Prompt {
            name,
            message,
            dir,
            json,
            timeout,
            safe,
        } => {
            let working_directory = match dir {
                Some(dir) => resolve_dir(&dir)?,
                None => current_dir()?,
            };
            let mode = if json { OutputMode::Json } else { OutputMode::Text };
            let options = PromptOptions {
                mode,
                safe,
                timeout: Duration::from_secs(
                    timeout.unwrap_or(manager.config().prompt_timeout_secs),
                ),
            };

            let result = manager
                .prompt(&name, &working_directory, &message, options, |chunk| {
                    let mut out = io::stdout().lock();
                    let written = match mode {
                        OutputMode::Json => writeln!(out, "{}", chunk),
                        OutputMode::Text => write!(out, "{}", chunk),
                    };
                    if let Err(e) = written.and_then(|_| out.flush()) {
                        tracing::debug!("Failed to write prompt output: {}", e);
                    }
                })
                .await?;

            if mode == OutputMode::Text {
                println!();
            }
            if let Some(error) = &result.error {
                eprintln!("Error: {}", error);
            }
            std::process::exit(result.exit_code);
        }
    }

    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
