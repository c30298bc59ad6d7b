//! One pretty-printed JSON file per session: `{dir}/{session_id}.json`.
//!
//! Writes go to a temp file that is then renamed over the final path, so a
//! crash mid-write leaves the previous version intact.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::traits::{sort_recent_first, Result, SessionStore, StorageError};
use crate::types::{SessionId, SessionRecord};

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn read_record(&self, path: &Path, id: &str) -> Result<Option<SessionRecord>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(path, e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                id: id.to_string(),
                source,
            })
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?;

        let final_path = self.path_for(record.id);
        let temp_path = self.dir.join(format!("{}.json.tmp", record.id));
        let json = serde_json::to_vec_pretty(record)?;

        fs::write(&temp_path, &json)
            .await
            .map_err(|e| StorageError::io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| StorageError::io(&final_path, e))?;

        Ok(())
    }

    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>> {
        self.read_record(&self.path_for(id), &id.to_string()).await
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            match self.read_record(&path, &stem).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("skipping unreadable session file: {}", e),
            }
        }

        sort_recent_first(&mut records);
        Ok(records)
    }

    async fn delete(&self, id: SessionId) -> Result<bool> {
        let path = self.path_for(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }
}
