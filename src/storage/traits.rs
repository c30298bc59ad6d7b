use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::{SessionId, SessionRecord};

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session {id} is not valid JSON: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable home of session records, keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts or replaces the record with the same id.
    async fn save(&self, record: &SessionRecord) -> Result<()>;
    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>>;
    /// All readable records, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionRecord>>;
    /// Administrative removal; the orchestrator never calls this.
    async fn delete(&self, id: SessionId) -> Result<bool>;
}

pub(crate) fn sort_recent_first(records: &mut [SessionRecord]) {
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
