//! The run state machine and its backend message loop.
//!
//! One orchestrator drives one backend stream. The loop is the only writer of
//! the agent state and the session record; pause, resume, stop and new
//! instructions arrive through [`OrchestratorHandle`] and are observed at
//! message boundaries, never while a message is being handled.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use super::control::{ControlSignals, OrchestratorHandle};
use super::prompt::{build_task_prompt, compose_prompt, CONTINUE_PROMPT};
use super::OrchestratorError;
use crate::backend::{Backend, MessageStream};
use crate::events::{EventBus, ToolPhase};
use crate::lifecycle::{LifecycleEvent, StateMachine};
use crate::matcher::{extract_context, PatternMatcher, CONTEXT_RADIUS};
use crate::storage::SessionStore;
use crate::types::{AgentMessage, AgentState, SessionId, SessionRecord};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on how long a paused loop sleeps between flag checks.
    pub pause_poll_interval: Duration,
    pub context_radius: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pause_poll_interval: Duration::from_millis(250),
            context_radius: CONTEXT_RADIUS,
        }
    }
}

enum Flow {
    Continue,
    Finished,
    Failed(String),
}

enum Outcome {
    Completed,
    Stopped,
    Failed(String),
}

pub struct Orchestrator<B: Backend> {
    backend: B,
    store: Arc<dyn SessionStore>,
    bus: Arc<EventBus>,
    matcher: Arc<dyn PatternMatcher>,
    config: OrchestratorConfig,
    control: Arc<ControlSignals>,
    state: AgentState,
}

impl<B: Backend> Orchestrator<B> {
    pub fn new(
        backend: B,
        store: Arc<dyn SessionStore>,
        bus: Arc<EventBus>,
        matcher: Arc<dyn PatternMatcher>,
    ) -> Self {
        Self {
            backend,
            store,
            bus,
            matcher,
            config: OrchestratorConfig::default(),
            control: Arc::new(ControlSignals::new()),
            state: AgentState::Idle,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle::new(self.control.clone())
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Latest published session record.
    pub fn session(&self) -> Option<SessionRecord> {
        self.control.session()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs a new session against `target` to completion.
    ///
    /// Only precondition violations are returned as errors; a run that fails
    /// in the backend returns its record with status `Error`.
    pub async fn start(
        &mut self,
        target: &str,
        instruction: Option<&str>,
    ) -> Result<SessionRecord, OrchestratorError> {
        StateMachine::next(self.state, LifecycleEvent::Started)?;

        let mut record = SessionRecord::new(
            target.to_string(),
            build_task_prompt(target),
            self.backend.model(),
        );
        if let Some(instruction) = instruction.filter(|i| !i.trim().is_empty()) {
            record.add_instruction(instruction);
        }
        log::info!("starting session {} against {}", record.id, record.target);
        self.persist(&record).await;

        if let Err(e) = self.backend.connect().await {
            return Ok(self.abort(record, e.to_string()).await);
        }
        let prompt = compose_prompt(&record.task_description, &record.user_instructions);
        if let Err(e) = self.backend.query(&prompt).await {
            return Ok(self.abort(record, e.to_string()).await);
        }

        Ok(self.drive(record).await)
    }

    /// Continues a stored, unfinished session, optionally with a new
    /// instruction.
    ///
    /// Reattaches to the backend-side session when the backend supports it;
    /// otherwise the task is re-submitted with every stored instruction.
    pub async fn restore(
        &mut self,
        id: SessionId,
        instruction: Option<&str>,
    ) -> Result<SessionRecord, OrchestratorError> {
        StateMachine::next(self.state, LifecycleEvent::Started)?;

        let mut record = self
            .store
            .load(id)
            .await?
            .ok_or(OrchestratorError::SessionNotFound(id))?;
        if record.status.is_terminal() {
            return Err(OrchestratorError::SessionTerminal {
                id,
                status: record.status,
            });
        }
        log::info!("restoring session {} ({})", record.id, record.status.as_str());

        let instruction = instruction.filter(|i| !i.trim().is_empty());
        if let Some(instruction) = instruction {
            record.add_instruction(instruction);
            self.persist(&record).await;
        }

        if let Err(e) = self.backend.connect().await {
            return Ok(self.abort(record, e.to_string()).await);
        }

        let reattached = match &record.backend_session_token {
            Some(token) if self.backend.supports_resume() => self.backend.resume(token).await,
            _ => false,
        };
        let prompt = if reattached {
            log::info!("backend reattached to session {}", record.id);
            let fresh: Vec<String> = instruction.map(str::to_string).into_iter().collect();
            compose_prompt(CONTINUE_PROMPT, &fresh)
        } else {
            compose_prompt(&record.task_description, &record.user_instructions)
        };
        if let Err(e) = self.backend.query(&prompt).await {
            return Ok(self.abort(record, e.to_string()).await);
        }

        Ok(self.drive(record).await)
    }

    async fn drive(&mut self, mut record: SessionRecord) -> SessionRecord {
        if let Some(token) = self.backend.session_token() {
            record.backend_session_token = Some(token);
        }
        self.transition(&mut record, LifecycleEvent::Started).await;

        let outcome = match self.backend.receive_messages() {
            Ok(stream) => self.consume(&mut record, stream).await,
            Err(e) => Outcome::Failed(e.to_string()),
        };
        self.finish(record, outcome).await
    }

    async fn consume(&mut self, record: &mut SessionRecord, mut stream: MessageStream) -> Outcome {
        let control = self.control.clone();

        loop {
            if control.stop_requested() {
                return Outcome::Stopped;
            }

            if control.take_pause_request() {
                match self.wait_while_paused(record).await {
                    Some(outcome) => return outcome,
                    None => continue,
                }
            }

            if let Err(e) = self.deliver_pending_input(record).await {
                return Outcome::Failed(e);
            }

            let next = tokio::select! {
                biased;
                _ = control.notified() => continue,
                next = stream.next() => next,
            };

            let flow = match next {
                Some(Ok(message)) => self.handle_message(record, message).await,
                Some(Err(e)) => Flow::Failed(e.to_string()),
                None => Flow::Failed("backend stream closed before a result".to_string()),
            };

            match flow {
                Flow::Continue => {}
                Flow::Finished => return Outcome::Completed,
                Flow::Failed(e) => return Outcome::Failed(e),
            }
        }
    }

    async fn handle_message(&mut self, record: &mut SessionRecord, message: AgentMessage) -> Flow {
        record.message_count += 1;

        match message {
            AgentMessage::Text { text } => {
                record.touch();
                self.persist(record).await;
                self.bus.emit_message(text.clone());
                self.scan(record, &text).await;
                Flow::Continue
            }
            AgentMessage::ToolStart { tool, input } => {
                self.bus.emit_tool_status(tool, ToolPhase::Started, input);
                Flow::Continue
            }
            AgentMessage::ToolResult {
                tool,
                output,
                is_error,
            } => {
                let phase = if is_error {
                    ToolPhase::Failed
                } else {
                    ToolPhase::Finished
                };
                self.bus.emit_tool_status(tool, phase, output);
                Flow::Continue
            }
            AgentMessage::Result {
                cost_usd,
                session_token,
            } => {
                if let Some(cost) = cost_usd {
                    record.add_cost(cost);
                }
                if session_token.is_some() {
                    record.backend_session_token = session_token;
                }
                Flow::Finished
            }
            AgentMessage::Error { message, cost_usd } => {
                if let Some(cost) = cost_usd {
                    record.add_cost(cost);
                }
                Flow::Failed(message)
            }
        }
    }

    async fn scan(&self, record: &mut SessionRecord, text: &str) {
        for found in self.matcher.find_matches(text) {
            if record.has_match(&found.value) {
                continue;
            }

            let context = extract_context(text, &found.span, self.config.context_radius);
            record.record_match(&found.value, &context);
            log::info!("session {}: match found: {}", record.id, found.value);
            self.persist(record).await;
            self.bus.emit_match_found(found.value, context);
        }
    }

    /// Returns `None` once resumed, or the outcome that ended the pause.
    async fn wait_while_paused(&mut self, record: &mut SessionRecord) -> Option<Outcome> {
        self.transition(record, LifecycleEvent::PauseReached).await;
        log::info!("session {} paused", record.id);

        let control = self.control.clone();
        loop {
            if control.stop_requested() {
                return Some(Outcome::Stopped);
            }

            if let Some(instruction) = control.take_resume() {
                if let Some(text) = instruction {
                    record.add_instruction(text.clone());
                    if let Err(e) = self.backend.query(&text).await {
                        return Some(Outcome::Failed(e.to_string()));
                    }
                }
                self.transition(record, LifecycleEvent::Resumed).await;
                log::info!("session {} resumed", record.id);
                return None;
            }

            let _ = tokio::time::timeout(self.config.pause_poll_interval, control.notified()).await;
        }
    }

    async fn deliver_pending_input(&mut self, record: &mut SessionRecord) -> Result<(), String> {
        for text in self.control.drain_input() {
            record.add_instruction(text.clone());
            self.persist(record).await;
            self.backend.query(&text).await.map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn finish(&mut self, mut record: SessionRecord, outcome: Outcome) -> SessionRecord {
        // Accepted instructions stay on record even when the run ends first.
        for text in self.control.drain_input() {
            log::warn!(
                "session {} ended before instruction was delivered: {}",
                record.id,
                text
            );
            record.add_instruction(text);
        }

        let event = match outcome {
            Outcome::Completed => LifecycleEvent::BackendFinished,
            Outcome::Stopped => LifecycleEvent::Stopped,
            Outcome::Failed(error) => {
                log::error!("session {} failed: {}", record.id, error);
                record.last_error = Some(error);
                LifecycleEvent::Failed
            }
        };

        self.transition(&mut record, event).await;
        self.backend.disconnect().await;
        log::info!(
            "session {} finished as {} with {} match(es)",
            record.id,
            self.state,
            record.matches_found.len()
        );
        record
    }

    /// Fails a run that never reached `Running`.
    async fn abort(&mut self, record: SessionRecord, error: String) -> SessionRecord {
        self.finish(record, Outcome::Failed(error)).await
    }

    async fn transition(&mut self, record: &mut SessionRecord, event: LifecycleEvent) {
        let from = self.state;
        let to = match StateMachine::transition(&mut self.state, event) {
            Ok(to) => to,
            Err(e) => {
                log::error!("session {}: {}", record.id, e);
                return;
            }
        };

        if let Some(status) = to.session_status() {
            record.set_status(status);
        }
        self.control.publish_state(to);
        self.persist(record).await;
        self.bus.emit_state_changed(from, to, Some(record.id));
    }

    /// Write-through save. Failures are loud but never end the run.
    async fn persist(&self, record: &SessionRecord) {
        self.control.publish_session(record);
        if let Err(e) = self.store.save(record).await {
            log::error!("failed to persist session {}: {}", record.id, e);
        }
    }
}

impl<B: Backend> std::fmt::Debug for Orchestrator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("model", &self.backend.model())
            .field("config", &self.config)
            .finish()
    }
}
