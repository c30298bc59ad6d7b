use serde::{Deserialize, Serialize};

use crate::types::AgentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Started,
    PauseReached,
    Resumed,
    BackendFinished,
    Failed,
    Stopped,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleEvent::Started => "start",
            LifecycleEvent::PauseReached => "pause",
            LifecycleEvent::Resumed => "resume",
            LifecycleEvent::BackendFinished => "finish",
            LifecycleEvent::Failed => "fail",
            LifecycleEvent::Stopped => "stop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {} while {}", .event.as_str(), .from.as_str())]
pub struct InvalidTransition {
    pub from: AgentState,
    pub event: LifecycleEvent,
}

pub struct StateMachine;

impl StateMachine {
    /// Returns the state reached from `from` on `event`.
    pub fn next(from: AgentState, event: LifecycleEvent) -> Result<AgentState, InvalidTransition> {
        let next = match (from, event) {
            (AgentState::Idle, LifecycleEvent::Started) => AgentState::Running,
            (AgentState::Running, LifecycleEvent::PauseReached) => AgentState::Paused,
            (AgentState::Paused, LifecycleEvent::Resumed) => AgentState::Running,
            (AgentState::Running, LifecycleEvent::BackendFinished) => AgentState::Completed,

            // Connection failures surface before the run leaves Idle.
            (
                AgentState::Idle | AgentState::Running | AgentState::Paused,
                LifecycleEvent::Failed,
            ) => AgentState::Error,

            (AgentState::Running | AgentState::Paused, LifecycleEvent::Stopped) => {
                AgentState::Completed
            }

            _ => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }

    /// Applies `event` to `state` in place.
    pub fn transition(
        state: &mut AgentState,
        event: LifecycleEvent,
    ) -> Result<AgentState, InvalidTransition> {
        let next = Self::next(*state, event)?;
        *state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_to_running() {
        let mut state = AgentState::Idle;
        let result = StateMachine::transition(&mut state, LifecycleEvent::Started);
        assert_eq!(result, Ok(AgentState::Running));
        assert_eq!(state, AgentState::Running);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut state = AgentState::Running;
        StateMachine::transition(&mut state, LifecycleEvent::PauseReached).unwrap();
        assert_eq!(state, AgentState::Paused);
        StateMachine::transition(&mut state, LifecycleEvent::Resumed).unwrap();
        assert_eq!(state, AgentState::Running);
    }

    #[test]
    fn test_running_to_completed() {
        assert_eq!(
            StateMachine::next(AgentState::Running, LifecycleEvent::BackendFinished),
            Ok(AgentState::Completed)
        );
    }

    #[test]
    fn test_failure_from_live_states() {
        for from in [AgentState::Idle, AgentState::Running, AgentState::Paused] {
            assert_eq!(
                StateMachine::next(from, LifecycleEvent::Failed),
                Ok(AgentState::Error)
            );
        }
    }

    #[test]
    fn test_stop_is_graceful() {
        for from in [AgentState::Running, AgentState::Paused] {
            assert_eq!(
                StateMachine::next(from, LifecycleEvent::Stopped),
                Ok(AgentState::Completed)
            );
        }
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut state = AgentState::Running;
        let result = StateMachine::transition(&mut state, LifecycleEvent::Started);
        assert!(result.is_err());
        assert_eq!(state, AgentState::Running);

        let mut state = AgentState::Running;
        assert!(StateMachine::transition(&mut state, LifecycleEvent::Resumed).is_err());
        assert_eq!(state, AgentState::Running);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [AgentState::Completed, AgentState::Error] {
            for event in [
                LifecycleEvent::Started,
                LifecycleEvent::PauseReached,
                LifecycleEvent::Resumed,
                LifecycleEvent::BackendFinished,
                LifecycleEvent::Failed,
                LifecycleEvent::Stopped,
            ] {
                assert!(StateMachine::next(from, event).is_err());
            }
        }
    }

    #[test]
    fn test_error_message() {
        let err = StateMachine::next(AgentState::Completed, LifecycleEvent::Resumed).unwrap_err();
        assert_eq!(err.to_string(), "cannot resume while Completed");
    }
}
