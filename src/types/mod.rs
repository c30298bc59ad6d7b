pub mod message;
pub mod session;

pub use message::AgentMessage;
pub use session::{MatchRecord, SessionRecord};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    Idle,      // Constructed, nothing started
    Running,   // Consuming the backend stream
    Paused,    // Waiting for a resume or stop
    Completed, // Terminal, backend finished or stopped gracefully
    Error,     // Terminal, unrecoverable failure
}

impl AgentState {
    pub fn as_str(&self) -> &str {
        match self {
            AgentState::Idle => "Idle",
            AgentState::Running => "Running",
            AgentState::Paused => "Paused",
            AgentState::Completed => "Completed",
            AgentState::Error => "Error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Completed | AgentState::Error)
    }

    /// The durable status mirroring this state. `Idle` has no session yet.
    pub fn session_status(&self) -> Option<SessionStatus> {
        match self {
            AgentState::Idle => None,
            AgentState::Running => Some(SessionStatus::Running),
            AgentState::Paused => Some(SessionStatus::Paused),
            AgentState::Completed => Some(SessionStatus::Completed),
            AgentState::Error => Some(SessionStatus::Error),
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}
