pub mod llm;
pub mod scripted;

pub use llm::{LlmBackend, LlmBackendConfig};
pub use scripted::ScriptedBackend;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

use crate::types::AgentMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("message stream failed: {0}")]
    Stream(String),
    #[error("backend is not connected")]
    NotConnected,
}

/// Owned, single-pass stream of backend messages. It does not borrow the
/// backend, so `query` may be called while it is being consumed.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<AgentMessage, BackendError>> + Send>>;

/// A driver that can be told to do a task and streams back typed messages.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn connect(&mut self) -> Result<(), BackendError>;

    /// Submits instruction text. Must follow a successful `connect`.
    async fn query(&mut self, prompt: &str) -> Result<(), BackendError>;

    /// Returns the message stream for the current connection. The stream
    /// ends after a `Result` or `Error` message or when the transport closes.
    fn receive_messages(&mut self) -> Result<MessageStream, BackendError>;

    /// Best-effort reattach to a previous backend-side session.
    async fn resume(&mut self, _session_token: &str) -> bool {
        false
    }

    fn supports_resume(&self) -> bool {
        false
    }

    fn session_token(&self) -> Option<String> {
        None
    }

    fn model(&self) -> String;

    async fn disconnect(&mut self) {}
}
