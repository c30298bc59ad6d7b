use async_trait::async_trait;
use futures::stream;
use std::sync::{Arc, Mutex};

use super::{Backend, BackendError, MessageStream};
use crate::types::AgentMessage;

/// Deterministic driver that replays a fixed script of messages.
///
/// Every prompt passed to `query` is recorded and can be inspected through
/// the shared handle returned by [`ScriptedBackend::prompts`].
pub struct ScriptedBackend {
    script: Vec<Result<AgentMessage, BackendError>>,
    prompts: Arc<Mutex<Vec<String>>>,
    connected: bool,
    streamed: bool,
    fail_connect: Option<String>,
    fail_query: Option<String>,
    resume_token: Option<String>,
    session_token: Option<String>,
    model: String,
}

impl ScriptedBackend {
    pub fn new(messages: Vec<AgentMessage>) -> Self {
        Self {
            script: messages.into_iter().map(Ok).collect(),
            prompts: Arc::new(Mutex::new(Vec::new())),
            connected: false,
            streamed: false,
            fail_connect: None,
            fail_query: None,
            resume_token: None,
            session_token: None,
            model: "scripted".to_string(),
        }
    }

    /// Appends a transport failure after the scripted messages.
    pub fn with_stream_error(mut self, error: impl Into<String>) -> Self {
        self.script.push(Err(BackendError::Stream(error.into())));
        self
    }

    pub fn failing_connect(mut self, error: impl Into<String>) -> Self {
        self.fail_connect = Some(error.into());
        self
    }

    pub fn failing_query(mut self, error: impl Into<String>) -> Self {
        self.fail_query = Some(error.into());
        self
    }

    /// Accepts `resume` for exactly this token.
    pub fn resumable(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.resume_token = Some(token.clone());
        self.session_token = Some(token);
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn connect(&mut self) -> Result<(), BackendError> {
        if let Some(error) = &self.fail_connect {
            return Err(BackendError::Connection(error.clone()));
        }
        self.connected = true;
        Ok(())
    }

    async fn query(&mut self, prompt: &str) -> Result<(), BackendError> {
        if !self.connected {
            return Err(BackendError::NotConnected);
        }
        if let Some(error) = &self.fail_query {
            return Err(BackendError::Query(error.clone()));
        }
        self.prompts
            .lock()
            .map_err(|_| BackendError::Query("prompt log poisoned".to_string()))?
            .push(prompt.to_string());
        Ok(())
    }

    fn receive_messages(&mut self) -> Result<MessageStream, BackendError> {
        if !self.connected {
            return Err(BackendError::NotConnected);
        }
        if self.streamed {
            return Err(BackendError::Stream(
                "script already consumed; reconnect to replay".to_string(),
            ));
        }
        self.streamed = true;
        Ok(Box::pin(stream::iter(self.script.clone())))
    }

    async fn resume(&mut self, session_token: &str) -> bool {
        self.connected && self.resume_token.as_deref() == Some(session_token)
    }

    fn supports_resume(&self) -> bool {
        self.resume_token.is_some()
    }

    fn session_token(&self) -> Option<String> {
        self.session_token.clone()
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.streamed = false;
    }
}
