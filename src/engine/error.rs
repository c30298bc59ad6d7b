use thiserror::Error;

use crate::lifecycle::InvalidTransition;
use crate::storage::StorageError;
use crate::types::{SessionId, SessionStatus};

/// Errors reported synchronously to the caller. Backend failures are not in
/// here: they end the run in the `Error` state and land in `last_error`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("a resume is already pending")]
    ResumeAlreadyPending,
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("session {id} already finished with status {}", .status.as_str())]
    SessionTerminal { id: SessionId, status: SessionStatus },
    #[error("failed to load session: {0}")]
    Storage(#[from] StorageError),
}
