use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SessionId, SessionStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub value: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable description of one orchestration run.
///
/// Unknown fields are ignored on read so newer writers stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default)]
    pub backend_session_token: Option<String>,
    pub task_description: String,
    #[serde(default)]
    pub user_instructions: Vec<String>,
    #[serde(default)]
    pub matches_found: Vec<MatchRecord>,
    #[serde(default)]
    pub accumulated_cost: f64,
    #[serde(default)]
    pub model_identifier: String,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub message_count: u64,
}

impl SessionRecord {
    pub fn new(target: String, task_description: String, model_identifier: String) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new_v4(),
            target,
            created_at: now,
            updated_at: now,
            status: SessionStatus::Running,
            backend_session_token: None,
            task_description,
            user_instructions: Vec::new(),
            matches_found: Vec::new(),
            accumulated_cost: 0.0,
            model_identifier,
            last_error: None,
            message_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn has_match(&self, value: &str) -> bool {
        self.matches_found.iter().any(|m| m.value == value)
    }

    /// Appends a match unless its value was already recorded.
    /// Returns `true` when the value is new.
    pub fn record_match(&mut self, value: &str, context: &str) -> bool {
        if self.has_match(value) {
            return false;
        }

        self.matches_found.push(MatchRecord {
            value: value.to_string(),
            context: context.to_string(),
            timestamp: Utc::now(),
        });
        self.touch();
        true
    }

    pub fn add_instruction(&mut self, instruction: impl Into<String>) {
        self.user_instructions.push(instruction.into());
        self.touch();
    }

    pub fn add_cost(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.accumulated_cost += cost;
        }
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.touch();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.set_status(SessionStatus::Error);
    }
}
