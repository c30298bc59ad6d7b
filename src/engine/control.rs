//! Signals shared between the message loop and the actors steering it.
//!
//! The loop is the only writer of the published state and session snapshot;
//! handles only raise flags and enqueue input, then wake the loop.

use anyhow::anyhow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use super::OrchestratorError;
use crate::events::{handler, EventBus, EventKind, EventPayload, Handler, UserCommand};
use crate::lifecycle::{InvalidTransition, LifecycleEvent};
use crate::types::{AgentState, SessionRecord};

pub struct ControlSignals {
    state: RwLock<AgentState>,
    session: RwLock<Option<SessionRecord>>,
    pause: AtomicBool,
    stop: AtomicBool,
    resume: Mutex<Option<Option<String>>>,
    pending_input: Mutex<VecDeque<String>>,
    wake: Notify,
}

impl ControlSignals {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(AgentState::Idle),
            session: RwLock::new(None),
            pause: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            resume: Mutex::new(None),
            pending_input: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session(&self) -> Option<SessionRecord> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn publish_state(&self, state: AgentState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub(crate) fn publish_session(&self, record: &SessionRecord) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn take_pause_request(&self) -> bool {
        self.pause.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn take_resume(&self) -> Option<Option<String>> {
        self.resume.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub(crate) fn drain_input(&self) -> Vec<String> {
        self.pending_input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }

    fn require(&self, allowed: &[AgentState], event: LifecycleEvent) -> Result<AgentState, OrchestratorError> {
        let from = self.state();
        if allowed.contains(&from) {
            Ok(from)
        } else {
            Err(InvalidTransition { from, event }.into())
        }
    }

    fn wake(&self) {
        self.wake.notify_one();
    }
}

/// Cloneable remote control for a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    signals: Arc<ControlSignals>,
}

impl OrchestratorHandle {
    pub(crate) fn new(signals: Arc<ControlSignals>) -> Self {
        Self { signals }
    }

    pub fn state(&self) -> AgentState {
        self.signals.state()
    }

    /// Live snapshot of the session record, once a run has started.
    pub fn session(&self) -> Option<SessionRecord> {
        self.signals.session()
    }

    /// Asks the loop to pause at the next message boundary.
    pub fn request_pause(&self) -> Result<(), OrchestratorError> {
        self.signals
            .require(&[AgentState::Running], LifecycleEvent::PauseReached)?;
        self.signals.pause.store(true, Ordering::SeqCst);
        self.signals.wake();
        Ok(())
    }

    pub fn resume(&self, instruction: Option<String>) -> Result<(), OrchestratorError> {
        self.signals
            .require(&[AgentState::Paused], LifecycleEvent::Resumed)?;

        let mut slot = self.signals.resume.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(OrchestratorError::ResumeAlreadyPending);
        }
        *slot = Some(instruction.filter(|i| !i.trim().is_empty()));
        drop(slot);

        self.signals.wake();
        Ok(())
    }

    /// Ends the run gracefully at the next message boundary.
    pub fn stop(&self) -> Result<(), OrchestratorError> {
        self.signals.require(
            &[AgentState::Running, AgentState::Paused],
            LifecycleEvent::Stopped,
        )?;
        self.signals.stop.store(true, Ordering::SeqCst);
        self.signals.wake();
        Ok(())
    }

    /// Injects new context. While running it is delivered at the next message
    /// boundary; while paused it resumes the run with it.
    pub fn submit_instruction(&self, text: impl Into<String>) -> Result<(), OrchestratorError> {
        let text = text.into();
        match self.signals.require(
            &[AgentState::Running, AgentState::Paused],
            LifecycleEvent::Resumed,
        )? {
            AgentState::Paused => self.resume(Some(text)),
            _ => {
                self.signals
                    .pending_input
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push_back(text);
                self.signals.wake();
                Ok(())
            }
        }
    }

    /// Routes `UserCommand` and `UserInput` events from `bus` to this handle.
    pub fn attach(&self, bus: &EventBus) -> CommandBridge {
        let handle = self.clone();
        let command = handler(move |event| match &event.payload {
            EventPayload::UserCommand { command } => {
                let result = match command {
                    UserCommand::Pause => handle.request_pause(),
                    UserCommand::Resume { instruction } => handle.resume(instruction.clone()),
                    UserCommand::Stop => handle.stop(),
                };
                result.map_err(|e| anyhow!("user command {:?} rejected: {}", command, e))
            }
            _ => Ok(()),
        });

        let handle = self.clone();
        let input = handler(move |event| match &event.payload {
            EventPayload::UserInput { text } => handle
                .submit_instruction(text.clone())
                .map_err(|e| anyhow!("user input rejected: {}", e)),
            _ => Ok(()),
        });

        bus.subscribe(EventKind::UserCommand, command.clone());
        bus.subscribe(EventKind::UserInput, input.clone());
        CommandBridge { command, input }
    }
}

/// Subscriptions created by [`OrchestratorHandle::attach`].
pub struct CommandBridge {
    command: Handler,
    input: Handler,
}

impl CommandBridge {
    pub fn detach(&self, bus: &EventBus) {
        bus.unsubscribe(EventKind::UserCommand, &self.command);
        bus.unsubscribe(EventKind::UserInput, &self.input);
    }
}
