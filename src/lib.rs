pub mod backend;
pub mod config;
pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod matcher;
pub mod providers;
pub mod storage;
pub mod types;

pub use config::Config;
pub use engine::{Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorHandle};
pub use events::{Event, EventBus, EventKind, EventPayload};
pub use types::*;
