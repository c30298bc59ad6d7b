pub mod control;
pub mod error;
pub mod orchestrator;
pub mod prompt;

pub use control::{CommandBridge, ControlSignals, OrchestratorHandle};
pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use prompt::{build_task_prompt, compose_prompt};
