use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit yielded by a backend message stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentMessage {
    Text {
        text: String,
    },
    ToolStart {
        tool: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool: String,
        #[serde(default)]
        output: Value,
        #[serde(default)]
        is_error: bool,
    },
    Result {
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        session_token: Option<String>,
    },
    /// Ends the run as failed. Spend accrued before the failure still counts.
    Error {
        message: String,
        #[serde(default)]
        cost_usd: Option<f64>,
    },
}

impl AgentMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_start(tool: impl Into<String>, input: Value) -> Self {
        Self::ToolStart {
            tool: tool.into(),
            input,
        }
    }

    pub fn tool_result(tool: impl Into<String>, output: Value) -> Self {
        Self::ToolResult {
            tool: tool.into(),
            output,
            is_error: false,
        }
    }

    pub fn done() -> Self {
        Self::Result {
            cost_usd: None,
            session_token: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            cost_usd: None,
        }
    }

    pub fn error_with_cost(message: impl Into<String>, cost_usd: f64) -> Self {
        Self::Error {
            message: message.into(),
            cost_usd: Some(cost_usd),
        }
    }

    pub fn kind_str(&self) -> &str {
        match self {
            AgentMessage::Text { .. } => "text",
            AgentMessage::ToolStart { .. } => "tool_start",
            AgentMessage::ToolResult { .. } => "tool_result",
            AgentMessage::Result { .. } => "result",
            AgentMessage::Error { .. } => "error",
        }
    }

    /// `Result` and `Error` end a stream.
    pub fn is_final(&self) -> bool {
        matches!(self, AgentMessage::Result { .. } | AgentMessage::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_constructors() {
        assert_eq!(
            AgentMessage::text("hi"),
            AgentMessage::Text {
                text: "hi".to_string()
            }
        );
        assert!(AgentMessage::done().is_final());
        assert!(AgentMessage::error("boom").is_final());
        assert!(!AgentMessage::tool_start("nmap", json!({})).is_final());
    }

    #[test]
    fn test_wire_format_uses_kind_tag() {
        let value = serde_json::to_value(AgentMessage::tool_start("scan", json!({"port": 80})))
            .unwrap();
        assert_eq!(value["kind"], "tool_start");
        assert_eq!(value["tool"], "scan");

        let parsed: AgentMessage =
            serde_json::from_value(json!({"kind": "result", "cost_usd": 0.25})).unwrap();
        assert_eq!(
            parsed,
            AgentMessage::Result {
                cost_usd: Some(0.25),
                session_token: None
            }
        );

        let parsed: AgentMessage =
            serde_json::from_value(json!({"kind": "error", "message": "quota"})).unwrap();
        assert_eq!(parsed, AgentMessage::error("quota"));
    }
}
