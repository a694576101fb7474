//! Keeps registry rows in line with tmux and Claude's session logs.
//!
//! Status is never trusted from the database: it is recomputed from a tmux
//! [`Snapshot`] every time sessions are shown. The Claude session id is a
//! one-way enrichment, backfilled from disk until it is found once.

use std::collections::HashSet;
use std::path::Path;

use crate::data::{Session, SessionStatus, SESSION_PREFIX};
use crate::error::Result;
use crate::integrations::claude::ClaudeProjects;
use crate::integrations::tmux::{Multiplexer, Snapshot};
use crate::store::SessionStore;

/// What a single `reconcile` call wrote to the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub status_changed: bool,
    pub claude_id_captured: bool,
}

impl ReconcileOutcome {
    pub fn wrote(&self) -> bool {
        self.status_changed || self.claude_id_captured
    }
}

/// Status a session should have given the live tmux sessions.
///
/// Archived is sticky. Sessions that were never given a tmux name keep
/// whatever status they have.
pub fn derive_status(session: &Session, snapshot: &Snapshot) -> SessionStatus {
    if session.is_archived() {
        return SessionStatus::Archived;
    }
    match session.tmux_session.as_deref() {
        Some(name) => match snapshot.get(name) {
            Some(live) if live.attached => SessionStatus::Active,
            Some(_) => SessionStatus::Detached,
            None => SessionStatus::Idle,
        },
        None => session.status,
    }
}

pub struct Reconciler<'a, M: Multiplexer> {
    store: &'a SessionStore,
    tmux: &'a M,
    claude: &'a ClaudeProjects,
}

impl<'a, M: Multiplexer> Reconciler<'a, M> {
    pub fn new(store: &'a SessionStore, tmux: &'a M, claude: &'a ClaudeProjects) -> Self {
        Self {
            store,
            tmux,
            claude,
        }
    }

    /// Recompute `session`'s status from `snapshot` and backfill its Claude id.
    ///
    /// `session` is updated in place to match what was persisted.
    pub fn reconcile(&self, session: &mut Session, snapshot: &Snapshot) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        let status = derive_status(session, snapshot);
        if status != session.status {
            tracing::debug!(
                "Session {} status {} -> {}",
                session.name,
                session.status,
                status
            );
            session.last_activity = self.store.set_status(&session.id, status)?;
            session.status = status;
            outcome.status_changed = true;
        }

        if session.claude_session_id.is_none() && self.capture_claude_id(session)? {
            outcome.claude_id_captured = true;
        }

        Ok(outcome)
    }

    /// Look for a Claude session created after this session was; store it on a hit.
    pub fn capture_claude_id(&self, session: &mut Session) -> Result<bool> {
        let found = self
            .claude
            .session_after(Path::new(&session.working_directory), session.created_at);
        match found {
            Some(claude_id) => {
                tracing::debug!("Captured Claude session {} for {}", claude_id, session.name);
                self.store.set_claude_session_id(&session.id, &claude_id)?;
                session.claude_session_id = Some(claude_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Kill `clux-` tmux sessions that no registry row refers to.
    ///
    /// Archived rows count as references. Killed sessions are removed from
    /// `snapshot` so it stays usable for the reconcile pass that follows.
    pub fn reap_orphans(&self, snapshot: &mut Snapshot) -> Result<Vec<String>> {
        let known: HashSet<String> = self
            .store
            .list(true, None)?
            .into_iter()
            .filter_map(|s| s.tmux_session)
            .collect();

        let mut orphans: Vec<String> = snapshot
            .names()
            .filter(|name| name.starts_with(SESSION_PREFIX) && !known.contains(*name))
            .map(String::from)
            .collect();
        orphans.sort();

        let mut killed = Vec::new();
        for name in orphans {
            match self.tmux.kill(&name) {
                Ok(()) => {
                    tracing::info!("Killed orphaned tmux session: {}", name);
                    snapshot.remove(&name);
                    killed.push(name);
                }
                Err(e) => tracing::warn!("Failed to kill orphaned tmux session {}: {}", name, e),
            }
        }
        Ok(killed)
    }

    /// The pre-step of every listing: one snapshot, reap orphans, reconcile each row.
    pub fn refresh(&self, include_archived: bool, working_directory: Option<&str>) -> Result<Vec<Session>> {
        let mut snapshot = self.tmux.snapshot();
        self.reap_orphans(&mut snapshot)?;

        let mut sessions = self.store.list(include_archived, working_directory)?;
        for session in &mut sessions {
            self.reconcile(session, &snapshot)?;
        }
        // Status changes bump last_activity; keep the registry's newest-first order
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }
}
