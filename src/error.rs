//! Error taxonomy shared by the registry, tmux adapter and session manager.

use crate::store::StoreError;
use thiserror::Error;

pub type Result<T, E = CluxError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CluxError {
    #[error("Invalid session name: {0}")]
    InvalidName(String),

    #[error("Session '{name}' already exists in {working_directory}")]
    DuplicateSession {
        name: String,
        working_directory: String,
    },

    #[error("Session not found: {0}")]
    NotFound(String),

    /// The tmux binary could not be executed at all.
    #[error("tmux is not installed. Please install tmux to use clux.")]
    TmuxUnavailable,

    #[error("tmux command failed: {0}")]
    Tmux(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("Session '{0}' is archived")]
    Archived(String),

    #[error("Session '{0}' is not archived")]
    NotArchived(String),

    #[error("Session '{0}' has no running tmux process")]
    NotRunning(String),

    #[error("Session '{0}' has no claude session ID - use interactively first")]
    NoClaudeSession(String),

    #[error("Current session not found in list")]
    NotInList,

    #[error("Not a clux session: {0}")]
    NotClux(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for CluxError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate {
                name,
                working_directory,
            } => Self::DuplicateSession {
                name,
                working_directory,
            },
            other => Self::Store(other),
        }
    }
}
