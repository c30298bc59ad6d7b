//! Driver that runs a multi-turn conversation against an [`LLMProvider`].
//!
//! `connect` spawns a worker task owning the conversation. Each completion is
//! forwarded as a `Text` message; the worker keeps going with a continuation
//! prompt until a reply carries the completion marker or the turn limit is hit.
//! The outgoing channel holds a single message, so a consumer that stops
//! reading (e.g. while paused) also stops the worker from requesting more
//! completions.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use super::{Backend, BackendError, MessageStream};
use crate::providers::{LLMProvider, Message};
use crate::types::AgentMessage;

type Outgoing = mpsc::Sender<Result<AgentMessage, BackendError>>;

#[derive(Debug, Clone)]
pub struct LlmBackendConfig {
    pub system_prompt: String,
    pub max_turns: usize,
    pub completion_marker: String,
    pub continuation_prompt: String,
}

impl Default for LlmBackendConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are an autonomous security researcher working on an authorized \
                capture-the-flag challenge. Reason step by step, report every flag you find \
                verbatim, and reply with TASK COMPLETE once the objective is met."
                .to_string(),
            max_turns: 20,
            completion_marker: "TASK COMPLETE".to_string(),
            continuation_prompt: "Continue working toward the objective.".to_string(),
        }
    }
}

pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    config: LlmBackendConfig,
    prompts: Option<mpsc::UnboundedSender<String>>,
    messages: Option<mpsc::Receiver<Result<AgentMessage, BackendError>>>,
    worker: Option<JoinHandle<()>>,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self::with_config(provider, LlmBackendConfig::default())
    }

    pub fn with_config(provider: Arc<dyn LLMProvider>, config: LlmBackendConfig) -> Self {
        Self {
            provider,
            config,
            prompts: None,
            messages: None,
            worker: None,
        }
    }

    fn is_connected(&self) -> bool {
        self.prompts.is_some()
    }
}

#[async_trait]
impl Backend for LlmBackend {
    async fn connect(&mut self) -> Result<(), BackendError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.config.max_turns == 0 {
            return Err(BackendError::Connection(
                "max_turns must be at least 1".to_string(),
            ));
        }

        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::channel(1);

        let worker = tokio::spawn(run_conversation(
            self.provider.clone(),
            self.config.clone(),
            prompt_rx,
            message_tx,
        ));

        self.prompts = Some(prompt_tx);
        self.messages = Some(message_rx);
        self.worker = Some(worker);
        Ok(())
    }

    async fn query(&mut self, prompt: &str) -> Result<(), BackendError> {
        let prompts = self.prompts.as_ref().ok_or(BackendError::NotConnected)?;
        prompts
            .send(prompt.to_string())
            .map_err(|_| BackendError::Query("conversation worker has stopped".to_string()))
    }

    fn receive_messages(&mut self) -> Result<MessageStream, BackendError> {
        if !self.is_connected() {
            return Err(BackendError::NotConnected);
        }
        let receiver = self.messages.take().ok_or_else(|| {
            BackendError::Stream("message stream already taken; reconnect first".to_string())
        })?;
        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    fn model(&self) -> String {
        self.provider.model().to_string()
    }

    async fn disconnect(&mut self) {
        self.prompts = None;
        self.messages = None;
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_conversation(
    provider: Arc<dyn LLMProvider>,
    config: LlmBackendConfig,
    mut prompts: mpsc::UnboundedReceiver<String>,
    out: Outgoing,
) {
    let Some(task) = prompts.recv().await else {
        return;
    };

    let mut history = vec![Message::system(&config.system_prompt), Message::user(task)];
    let mut cost = 0.0;
    let mut completed = false;

    for turn in 1..=config.max_turns {
        let completion = match provider.complete(history.clone()).await {
            Ok(completion) => completion,
            Err(e) => {
                log::warn!("completion failed on turn {}: {:#}", turn, e);
                let message = format!("completion failed: {:#}", e);
                let _ = out.send(Ok(AgentMessage::error_with_cost(message, cost))).await;
                return;
            }
        };

        cost += completion.cost_usd(provider.pricing());
        let done = completion.text.contains(&config.completion_marker);
        history.push(Message::assistant(completion.text.clone()));

        if out.send(Ok(AgentMessage::text(completion.text))).await.is_err() {
            return;
        }
        if done {
            completed = true;
            break;
        }

        let mut injected = false;
        while let Ok(prompt) = prompts.try_recv() {
            history.push(Message::user(prompt));
            injected = true;
        }
        if !injected {
            history.push(Message::user(&config.continuation_prompt));
        }
    }

    let last = if completed {
        AgentMessage::Result {
            cost_usd: Some(cost),
            session_token: None,
        }
    } else {
        log::warn!("turn limit of {} reached without completion", config.max_turns);
        AgentMessage::error_with_cost(
            format!("turn limit of {} reached without completion", config.max_turns),
            cost,
        )
    };
    let _ = out.send(Ok(last)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockLLMProvider;
    use futures::StreamExt;

    async fn collect(backend: &mut LlmBackend) -> Vec<AgentMessage> {
        backend
            .receive_messages()
            .unwrap()
            .map(|m| m.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_runs_until_completion_marker() {
        let provider = Arc::new(MockLLMProvider::with_replies(vec![
            "enumerating services".to_string(),
            "found flag{abc} - TASK COMPLETE".to_string(),
        ]));
        let mut backend = LlmBackend::new(provider.clone());
        backend.connect().await.unwrap();
        backend.query("pwn 10.0.0.1").await.unwrap();

        let messages = collect(&mut backend).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], AgentMessage::text("enumerating services"));
        match &messages[2] {
            AgentMessage::Result { cost_usd, .. } => assert!(cost_usd.unwrap() > 0.0),
            other => panic!("expected result, got {:?}", other),
        }

        let requests = provider.requests();
        assert_eq!(requests[0][1], Message::user("pwn 10.0.0.1"));
        assert_eq!(
            requests[1].last().unwrap(),
            &Message::user(LlmBackendConfig::default().continuation_prompt)
        );
    }

    #[tokio::test]
    async fn test_turn_limit_ends_stream() {
        let provider = Arc::new(MockLLMProvider::with_replies(vec!["still going".to_string()]));
        let config = LlmBackendConfig {
            max_turns: 2,
            ..LlmBackendConfig::default()
        };
        let mut backend = LlmBackend::with_config(provider, config);
        backend.connect().await.unwrap();
        backend.query("go").await.unwrap();

        let messages = collect(&mut backend).await;
        assert_eq!(messages.len(), 3);
        match &messages[2] {
            AgentMessage::Error { message, cost_usd } => {
                assert!(message.contains("turn limit of 2"));
                assert!(cost_usd.unwrap() > 0.0);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_queued_prompts_replace_continuation() {
        let provider = Arc::new(MockLLMProvider::with_replies(vec![
            "first".to_string(),
            "TASK COMPLETE".to_string(),
        ]));
        let mut backend = LlmBackend::new(provider.clone());
        backend.connect().await.unwrap();
        backend.query("task").await.unwrap();
        backend.query("check port 8080").await.unwrap();

        collect(&mut backend).await;
        let requests = provider.requests();
        assert_eq!(requests[1].last().unwrap(), &Message::user("check port 8080"));
    }

    #[tokio::test]
    async fn test_provider_failure_yields_error_message() {
        let provider = Arc::new(MockLLMProvider::with_replies(vec![]).then_fail("401 unauthorized"));
        let mut backend = LlmBackend::new(provider);
        backend.connect().await.unwrap();
        backend.query("go").await.unwrap();

        let messages = collect(&mut backend).await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], AgentMessage::Error { message, .. } if message.contains("401")));
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_earlier_cost() {
        let provider = Arc::new(
            MockLLMProvider::with_replies(vec!["recon done".to_string()]).then_fail("503"),
        );
        let mut backend = LlmBackend::new(provider);
        backend.connect().await.unwrap();
        backend.query("go").await.unwrap();

        let messages = collect(&mut backend).await;
        assert_eq!(messages.len(), 2);
        match &messages[1] {
            AgentMessage::Error { message, cost_usd } => {
                assert!(message.contains("503"));
                assert!(cost_usd.unwrap() > 0.0);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requires_connect_and_single_stream() {
        let mut backend = LlmBackend::new(Arc::new(MockLLMProvider::new()));
        assert_eq!(backend.query("x").await, Err(BackendError::NotConnected));
        assert!(!backend.supports_resume());
        assert_eq!(backend.model(), "mock");

        backend.connect().await.unwrap();
        assert!(backend.receive_messages().is_ok());
        assert!(backend.receive_messages().is_err());

        backend.disconnect().await;
        assert_eq!(backend.query("x").await, Err(BackendError::NotConnected));
    }
}
