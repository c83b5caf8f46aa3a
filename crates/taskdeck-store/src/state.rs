use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use taskdeck_core::TaskdeckResult;
use tracing::warn;

/// Persisted compaction bookkeeping: when the last automatic compaction ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionState {
    pub last_compaction_at: Option<DateTime<Utc>>,
}

/// Stores [`CompactionState`] as a small JSON document, rewritten atomically
/// after each successful compaction.
pub struct CompactionStateStore {
    path: PathBuf,
}

impl CompactionStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the persisted state. A missing or unreadable document yields the
    /// default ("never compacted") rather than an error.
    pub async fn load(&self) -> CompactionState {
        if !self.path.exists() {
            return CompactionState::default();
        }
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "Corrupt compaction state, resetting");
                CompactionState::default()
            }),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable compaction state, resetting");
                CompactionState::default()
            }
        }
    }

    pub async fn save(&self, state: &CompactionState) -> TaskdeckResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_state_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = CompactionStateStore::new(dir.path().join("state.json"));
        assert!(store.load().await.last_compaction_at.is_none());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CompactionStateStore::new(dir.path().join("state.json"));

        let state = CompactionState {
            last_compaction_at: Some(Utc::now()),
        };
        store.save(&state).await.unwrap();
        let loaded = store.load().await;
        assert_eq!(loaded.last_compaction_at, state.last_compaction_at);
    }

    #[tokio::test]
    async fn test_corrupt_state_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        let store = CompactionStateStore::new(path);
        assert!(store.load().await.last_compaction_at.is_none());
    }
}
