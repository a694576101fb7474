//! User-level session operations.
//!
//! Every command the CLI exposes is a method here, composed from the store,
//! the [`Multiplexer`], Claude's project logs and the [`Reconciler`]. The
//! manager never prints; menu-driven commands (`new-here`, `next`) report on
//! the tmux status line because they run without a visible terminal.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::data::{make_tmux_name, validate_session_name, Session, SessionStatus, SESSION_PREFIX};
use crate::error::{CluxError, Result};
use crate::integrations::claude::stream::{self, OutputMode, PromptResult};
use crate::integrations::claude::ClaudeProjects;
use crate::integrations::tmux::{Multiplexer, Snapshot, Tmux};
use crate::navigator;
use crate::reconcile::Reconciler;
use crate::store::SessionStore;

/// A session whose tmux process was just started or found running
#[derive(Debug, Clone)]
pub struct Launch {
    pub session: Session,
    pub tmux_name: String,
    /// Claude sessions modified after this instant belong to this launch
    pub launched_at: DateTime<Utc>,
}

/// How `close` finds its session
#[derive(Debug, Clone, Copy)]
pub enum CloseTarget<'a> {
    Name {
        name: &'a str,
        working_directory: &'a str,
    },
    /// Current tmux session name, as passed by the tmux menu
    TmuxName(&'a str),
}

#[derive(Debug, Clone, Copy)]
pub struct PromptOptions {
    pub mode: OutputMode,
    pub safe: bool,
    pub timeout: Duration,
}

pub struct SessionManager<M: Multiplexer = Tmux> {
    store: SessionStore,
    tmux: M,
    claude: ClaudeProjects,
    config: Config,
}

impl<M: Multiplexer> SessionManager<M> {
    pub fn new(store: SessionStore, tmux: M, claude: ClaudeProjects, config: Config) -> Self {
        Self {
            store,
            tmux,
            claude,
            config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn tmux(&self) -> &M {
        &self.tmux
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reconciler(&self) -> Reconciler<'_, M> {
        Reconciler::new(&self.store, &self.tmux, &self.claude)
    }

    fn lookup(&self, name: &str, working_directory: &str) -> Result<Session> {
        self.store
            .get(name, working_directory)?
            .ok_or_else(|| CluxError::NotFound(format!("'{}' in {}", name, working_directory)))
    }

    fn lookup_tmux(&self, tmux_name: &str) -> Result<Session> {
        if !tmux_name.starts_with(SESSION_PREFIX) {
            return Err(CluxError::NotClux(tmux_name.to_string()));
        }
        self.store
            .get_by_tmux_name(tmux_name)?
            .ok_or_else(|| CluxError::NotFound(tmux_name.to_string()))
    }

    fn launch_command(&self, safe: bool, resume: Option<&str>) -> String {
        self.config.claude_command_line(safe, resume).join(" ")
    }

    fn kill_if_running(&self, session: &Session) -> Result<bool> {
        match session.tmux_session.as_deref() {
            Some(name) if self.tmux.exists(name, None) => {
                self.tmux.kill(name)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Register a session and start Claude in a fresh tmux session.
    ///
    /// If tmux creation fails the registry row is removed again.
    pub fn new_session(&self, name: &str, working_directory: &str, safe: bool) -> Result<Launch> {
        validate_session_name(name).map_err(CluxError::InvalidName)?;

        if self.store.get(name, working_directory)?.is_some() {
            return Err(CluxError::DuplicateSession {
                name: name.to_string(),
                working_directory: working_directory.to_string(),
            });
        }

        let tmux_name = make_tmux_name(name, working_directory);
        if self.tmux.exists(&tmux_name, None) {
            tracing::warn!("tmux session '{}' already exists, killing it", tmux_name);
            if let Err(e) = self.tmux.kill(&tmux_name) {
                tracing::warn!("Failed to kill leftover tmux session {}: {}", tmux_name, e);
            }
        }

        let session = self.store.create(name, working_directory, Some(&tmux_name))?;

        if let Err(e) = self.tmux.create(&tmux_name, working_directory) {
            self.roll_back(&session, None);
            return Err(e);
        }

        let launched_at = self.store.now();
        if let Err(e) = self
            .tmux
            .send_keys(&tmux_name, &self.launch_command(safe, None))
        {
            self.roll_back(&session, Some(&tmux_name));
            return Err(e);
        }
        self.store.set_status(&session.id, SessionStatus::Active)?;

        let session = self.store.get_by_id(&session.id)?.unwrap_or(session);
        Ok(Launch {
            session,
            tmux_name,
            launched_at,
        })
    }

    /// Undo a half-created session: kill its tmux process, if started, and drop the row.
    fn roll_back(&self, session: &Session, tmux_name: Option<&str>) {
        tracing::debug!("Rolling back session {} after tmux failure", session.id);
        if let Some(tmux_name) = tmux_name {
            if let Err(e) = self.tmux.kill(tmux_name) {
                tracing::warn!("Failed to kill tmux session {}: {}", tmux_name, e);
            }
        }
        if let Err(e) = self.store.delete(&session.id) {
            tracing::warn!("Failed to roll back session {}: {}", session.id, e);
        }
    }

    /// Create a sibling of the session running in `current_tmux_name` and switch to it.
    pub fn new_here(&self, name: &str, current_tmux_name: &str, safe: bool) -> Result<Session> {
        let current = self.lookup_tmux(current_tmux_name)?;
        let launch = self.new_session(name, &current.working_directory, safe)?;

        match self.tmux.switch_client(&launch.tmux_name) {
            Ok(()) => self.tmux.display_message(&format!("New session: {}", name)),
            Err(e) => {
                tracing::debug!("switch-client failed: {}", e);
                self.tmux
                    .display_message(&format!("Created but failed to switch: {}", name));
            }
        }
        Ok(launch.session)
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Make sure `session` has a live tmux process running Claude.
    ///
    /// Resumes the known Claude session when there is one. Returns the tmux name.
    pub fn ensure_running(
        &self,
        session: &Session,
        safe: bool,
        snapshot: Option<&Snapshot>,
    ) -> Result<String> {
        let tmux_name = session.tmux_name();
        if session.tmux_session.is_none() {
            // Orphan reaping spares only names some row references
            self.store.set_tmux_session(&session.id, &tmux_name)?;
        }
        if self.tmux.exists(&tmux_name, snapshot) {
            return Ok(tmux_name);
        }

        self.tmux.create(&tmux_name, &session.working_directory)?;
        let resume = session.claude_session_id.as_deref();
        if let Some(id) = resume {
            tracing::debug!("Resuming Claude session {} in {}", id, tmux_name);
        }
        self.tmux
            .send_keys(&tmux_name, &self.launch_command(safe, resume))?;
        self.store.set_status(&session.id, SessionStatus::Active)?;
        Ok(tmux_name)
    }

    /// Prepare an existing session for attaching, starting it if needed.
    pub fn attach(&self, name: &str, working_directory: &str, safe: bool) -> Result<Launch> {
        let mut session = self.lookup(name, working_directory)?;
        if session.is_archived() {
            return Err(CluxError::Archived(name.to_string()));
        }

        let snapshot = self.tmux.snapshot();
        self.reconciler().reconcile(&mut session, &snapshot)?;

        let launched_at = self.store.now();
        let tmux_name = self.ensure_running(&session, safe, Some(&snapshot))?;
        self.store.set_status(&session.id, SessionStatus::Active)?;

        let session = self.store.get_by_id(&session.id)?.unwrap_or(session);
        Ok(Launch {
            session,
            tmux_name,
            launched_at,
        })
    }

    /// Attach in the foreground, then pick up what changed while attached.
    pub fn enter(&self, launch: &Launch) -> Result<Option<Session>> {
        let code = self.tmux.attach(&launch.tmux_name)?;
        tracing::debug!("tmux attach exited with {}", code);
        self.after_detach(&launch.session.id, launch.launched_at)
    }

    /// Capture the Claude id started since `since` and re-derive status.
    pub fn after_detach(&self, id: &str, since: DateTime<Utc>) -> Result<Option<Session>> {
        let Some(mut session) = self.store.get_by_id(id)? else {
            return Ok(None);
        };

        if session.claude_session_id.is_none() {
            let wd = Path::new(&session.working_directory);
            if let Some(claude_id) = self.claude.session_after(wd, since) {
                self.store.set_claude_session_id(&session.id, &claude_id)?;
                session.claude_session_id = Some(claude_id);
            }
        }

        let snapshot = self.tmux.snapshot();
        self.reconciler().reconcile(&mut session, &snapshot)?;
        Ok(Some(session))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn archive(&self, name: &str, working_directory: &str) -> Result<Session> {
        let session = self.lookup(name, working_directory)?;
        self.kill_if_running(&session)?;
        self.store.set_status(&session.id, SessionStatus::Archived)?;
        self.reload(session)
    }

    pub fn restore(&self, name: &str, working_directory: &str) -> Result<Session> {
        let session = self.lookup(name, working_directory)?;
        if !session.is_archived() {
            return Err(CluxError::NotArchived(name.to_string()));
        }
        self.store.restore(&session.id)?;
        self.reload(session)
    }

    /// Stop the tmux process but keep the session resumable.
    pub fn kill(&self, name: &str, working_directory: &str) -> Result<Session> {
        let mut session = self.lookup(name, working_directory)?;
        let tmux_name = match session.tmux_session.clone() {
            Some(tmux_name) if self.tmux.exists(&tmux_name, None) => tmux_name,
            _ => return Err(CluxError::NotRunning(name.to_string())),
        };

        if session.claude_session_id.is_none() {
            self.reconciler().capture_claude_id(&mut session)?;
        }

        self.tmux.kill(&tmux_name)?;
        self.store.set_status(&session.id, SessionStatus::Idle)?;
        self.reload(session)
    }

    /// Archive and kill in one step.
    pub fn close(&self, target: CloseTarget<'_>) -> Result<Session> {
        let mut session = match target {
            CloseTarget::Name {
                name,
                working_directory,
            } => self.lookup(name, working_directory)?,
            CloseTarget::TmuxName(tmux_name) => self.lookup_tmux(tmux_name)?,
        };

        if session.claude_session_id.is_none() {
            self.reconciler().capture_claude_id(&mut session)?;
        }
        self.kill_if_running(&session)?;
        self.store.set_status(&session.id, SessionStatus::Archived)?;
        self.reload(session)
    }

    /// Permanently remove a session, killing its process first.
    pub fn delete(&self, name: &str, working_directory: &str) -> Result<Session> {
        let session = self.lookup(name, working_directory)?;
        self.kill_if_running(&session)?;
        self.store.delete(&session.id)?;
        Ok(session)
    }

    fn reload(&self, session: Session) -> Result<Session> {
        Ok(self.store.get_by_id(&session.id)?.unwrap_or(session))
    }

    // ========================================================================
    // Navigation and views
    // ========================================================================

    /// Switch the tmux client to the next session in the same directory.
    ///
    /// Returns the session switched to, or `None` when it is the only one.
    pub fn next(&self, current_tmux_name: &str) -> Result<Option<Session>> {
        let current = self.lookup_tmux(current_tmux_name)?;
        let siblings = self
            .store
            .list(false, Some(&current.working_directory))?;

        let Some(target) = navigator::next(&current.id, &siblings)? else {
            self.tmux
                .display_message("No other sessions in this project");
            return Ok(None);
        };

        let tmux_name = self.ensure_running(target, false, None)?;
        match self.tmux.switch_client(&tmux_name) {
            Ok(()) => self
                .tmux
                .display_message(&format!("Switched to: {}", target.name)),
            Err(e) => {
                tracing::debug!("switch-client failed: {}", e);
                self.tmux
                    .display_message(&format!("Failed to switch to: {}", target.name));
            }
        }

        Ok(self.store.get_by_id(&target.id)?)
    }

    /// Reconciled sessions, optionally for one directory.
    pub fn list(&self, include_archived: bool, working_directory: Option<&str>) -> Result<Vec<Session>> {
        self.reconciler().refresh(include_archived, working_directory)
    }

    /// Reconciled non-archived sessions of one directory.
    pub fn status(&self, working_directory: &str) -> Result<Vec<Session>> {
        self.list(false, Some(working_directory))
    }

    /// Last lines of the session's pane.
    pub fn peek(&self, name: &str, working_directory: &str, lines: Option<usize>) -> Result<String> {
        let session = self.lookup(name, working_directory)?;
        match session.tmux_session.as_deref() {
            Some(tmux_name) if self.tmux.exists(tmux_name, None) => Ok(self
                .tmux
                .capture_pane(tmux_name, lines.unwrap_or(self.config.preview_lines))),
            _ => Err(CluxError::NotRunning(name.to_string())),
        }
    }

    // ========================================================================
    // Print mode
    // ========================================================================

    /// Send one message to the session's Claude conversation without tmux.
    ///
    /// The interactive process is killed first so two Claude instances never
    /// write to the same conversation.
    pub async fn prompt<F>(
        &self,
        name: &str,
        working_directory: &str,
        message: &str,
        options: PromptOptions,
        sink: F,
    ) -> Result<PromptResult>
    where
        F: FnMut(&str),
    {
        let session = self.lookup(name, working_directory)?;
        let claude_id = session
            .claude_session_id
            .clone()
            .ok_or_else(|| CluxError::NoClaudeSession(name.to_string()))?;

        self.kill_if_running(&session)?;

        let mut argv = self.config.claude_command_line(options.safe, None);
        argv.extend(
            [
                "--print",
                "--verbose",
                "--output-format",
                "stream-json",
                "--resume",
                claude_id.as_str(),
                "-p",
                message,
            ]
            .map(String::from),
        );

        let result = stream::execute(
            &argv,
            Path::new(&session.working_directory),
            options.timeout,
            options.mode,
            sink,
        )
        .await?;

        if result.timed_out {
            return Ok(result);
        }

        self.store.touch_activity(&session.id)?;
        if let Some(new_id) = result.session_id.as_deref() {
            if new_id != claude_id {
                tracing::debug!("Claude session for {} moved to {}", name, new_id);
                self.store.set_claude_session_id(&session.id, new_id)?;
            }
        }
        Ok(result)
    }
}
