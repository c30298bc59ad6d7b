pub mod bus;

pub use bus::{handler, EventBus, Handler};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AgentState, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    StateChanged,
    Message,
    ToolStatus,
    MatchFound,
    UserCommand,
    UserInput,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::StateChanged,
        EventKind::Message,
        EventKind::ToolStatus,
        EventKind::MatchFound,
        EventKind::UserCommand,
        EventKind::UserInput,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::StateChanged => "StateChanged",
            EventKind::Message => "Message",
            EventKind::ToolStatus => "ToolStatus",
            EventKind::MatchFound => "MatchFound",
            EventKind::UserCommand => "UserCommand",
            EventKind::UserInput => "UserInput",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    Started,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserCommand {
    Pause,
    Resume { instruction: Option<String> },
    Stop,
}

/// Payload schema, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum EventPayload {
    StateChanged {
        from: AgentState,
        to: AgentState,
        session_id: Option<SessionId>,
    },
    Message {
        text: String,
    },
    ToolStatus {
        tool: String,
        phase: ToolPhase,
        data: Value,
    },
    MatchFound {
        value: String,
        context: String,
    },
    UserCommand {
        command: UserCommand,
    },
    UserInput {
        text: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::StateChanged { .. } => EventKind::StateChanged,
            EventPayload::Message { .. } => EventKind::Message,
            EventPayload::ToolStatus { .. } => EventKind::ToolStatus,
            EventPayload::MatchFound { .. } => EventKind::MatchFound,
            EventPayload::UserCommand { .. } => EventKind::UserCommand,
            EventPayload::UserInput { .. } => EventKind::UserInput,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_follows_payload() {
        let event = Event::new(EventPayload::MatchFound {
            value: "flag{a}".to_string(),
            context: "ctx".to_string(),
        });
        assert_eq!(event.kind(), EventKind::MatchFound);
    }

    #[test]
    fn test_event_wire_shape() {
        let event = Event::new(EventPayload::StateChanged {
            from: AgentState::Idle,
            to: AgentState::Running,
            session_id: None,
        });
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["kind"], "StateChanged");
        assert_eq!(value["payload"]["from"], "Idle");
        assert_eq!(value["payload"]["to"], "Running");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_user_command_parses() {
        let value = json!({
            "kind": "UserCommand",
            "payload": {"command": {"Resume": {"instruction": "try sqli"}}},
            "timestamp": "2026-01-01T00:00:00Z"
        });
        let event: Event = serde_json::from_value(value).unwrap();
        assert_eq!(
            event.payload,
            EventPayload::UserCommand {
                command: UserCommand::Resume {
                    instruction: Some("try sqli".to_string())
                }
            }
        );
    }
}
