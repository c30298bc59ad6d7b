use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::traits::{sort_recent_first, Result, SessionStore};
use crate::types::{SessionId, SessionRecord};

/// Process-local store, mostly for tests and dry runs.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
    writes: Arc<RwLock<u64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far.
    pub fn write_count(&self) -> u64 {
        *self.writes.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(record.id, record.clone());
        *self.writes.write().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<SessionRecord> = sessions.values().cloned().collect();
        sort_recent_first(&mut records);
        Ok(records)
    }

    async fn delete(&self, id: SessionId) -> Result<bool> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.remove(&id).is_some())
    }
}
