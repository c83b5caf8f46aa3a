use crate::task::TaskItem;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use taskdeck_core::{TaskdeckError, TaskdeckResult};

/// Persistence seam for the task list.
///
/// The document is always read and written wholesale; partial updates are
/// not part of the contract.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load(&self) -> TaskdeckResult<Vec<TaskItem>>;
    async fn save(&self, tasks: &[TaskItem]) -> TaskdeckResult<()>;
}

/// File-based task store: one pretty-printed JSON array on disk.
///
/// Saves go through a sibling temp file followed by a rename so a crash
/// mid-write never leaves a truncated document behind.
pub struct FileTaskStore {
    path: PathBuf,
}

impl FileTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn load(&self) -> TaskdeckResult<Vec<TaskItem>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        let tasks: Vec<TaskItem> = serde_json::from_str(&data)
            .map_err(|e| TaskdeckError::Store(format!("Failed to parse task list: {e}")))?;
        Ok(tasks)
    }

    async fn save(&self, tasks: &[TaskItem]) -> TaskdeckResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(tasks)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
