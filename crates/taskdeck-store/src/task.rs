use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskdeck_core::normalized_agent;
use uuid::Uuid;

/// Stage of a task in the dispatch lifecycle.
///
/// Tasks flow `Scheduled → Queued → InProgress → Done`, with
/// `InProgress → Queued` as the retry/backoff path. Archival is an
/// orthogonal flag on [`TaskItem`], not a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Staged for execution; auto-promoted to `Queued` by the scheduler.
    Scheduled,
    /// Waiting for its agent to be free.
    Queued,
    /// Dispatched; at most one per agent.
    InProgress,
    /// Finished.
    Done,
}

/// Dispatch priority, ranked urgent-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Dispatches before everything else.
    Urgent,
    /// Above-normal priority.
    High,
    /// The default band.
    #[default]
    Medium,
    /// Dispatches last.
    Low,
}

impl TaskPriority {
    /// Rank used by the dispatch sort; lower dispatches first.
    pub fn rank(self) -> u8 {
        match self {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }
}

/// One line of a task's append-only evidence log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceEntry {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// A unit of work in the backlog.
///
/// Serialized camelCase to stay compatible with the persisted document
/// format this daemon inherited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Case-insensitive agent key; empty-after-trim means unassigned.
    #[serde(default)]
    pub assigned_agent: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Advisory earliest-eligible time; not currently a dispatch gate.
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Gateway session identity; sticky once set so reruns reconnect to the
    /// same conversation.
    #[serde(default)]
    pub execution_session_key: Option<String>,
    /// Append-only, chronological. Entries are never reordered or deleted.
    #[serde(default)]
    pub evidence: Vec<EvidenceEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_color_hex: Option<String>,
}

impl TaskItem {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            assigned_agent: None,
            status: TaskStatus::Scheduled,
            is_archived: false,
            priority: TaskPriority::Medium,
            scheduled_for: None,
            execution_session_key: None,
            evidence: Vec::new(),
            created_at: now,
            updated_at: now,
            project_id: None,
            project_name: None,
            project_color_hex: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn with_project(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        color_hex: Option<String>,
    ) -> Self {
        self.project_id = Some(id.into());
        self.project_name = Some(name.into());
        self.project_color_hex = color_hex;
        self
    }

    /// Refresh `updated_at`; called by every mutation path.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Normalized agent key, or `None` when unassigned.
    pub fn agent_key(&self) -> Option<String> {
        normalized_agent(self.assigned_agent.as_deref())
    }

    /// Whether this task counts toward the active backlog.
    pub fn is_active(&self) -> bool {
        !self.is_archived
            && matches!(
                self.status,
                TaskStatus::Scheduled | TaskStatus::Queued | TaskStatus::InProgress
            )
    }

    /// Title normalized for duplicate grouping: trimmed, lowercased, internal
    /// whitespace collapsed to single spaces.
    pub fn normalized_title(&self) -> String {
        self.title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Append one evidence line and refresh `updated_at`.
    pub fn append_evidence(&mut self, text: impl Into<String>) {
        self.evidence.push(EvidenceEntry {
            at: Utc::now(),
            text: text.into(),
        });
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = TaskItem::new("Ship release notes");
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(!task.is_archived);
        assert!(task.evidence.is_empty());
        assert!(task.is_active());
    }

    #[test]
    fn test_agent_key_normalizes() {
        let task = TaskItem::new("t").with_agent("  Matrix ");
        assert_eq!(task.agent_key().as_deref(), Some("matrix"));

        let blank = TaskItem::new("t").with_agent("   ");
        assert_eq!(blank.agent_key(), None);
    }

    #[test]
    fn test_done_and_archived_are_not_active() {
        let done = TaskItem::new("t").with_status(TaskStatus::Done);
        assert!(!done.is_active());

        let mut archived = TaskItem::new("t").with_status(TaskStatus::Queued);
        archived.is_archived = true;
        assert!(!archived.is_active());
    }

    #[test]
    fn test_normalized_title_collapses_whitespace() {
        let task = TaskItem::new("  Fix   Login\tBug ");
        assert_eq!(task.normalized_title(), "fix login bug");
    }

    #[test]
    fn test_append_evidence_touches() {
        let mut task = TaskItem::new("t");
        let before = task.updated_at;
        task.append_evidence("Run started");
        assert_eq!(task.evidence.len(), 1);
        assert!(task.updated_at >= before);
    }

    #[test]
    fn test_priority_rank_ordering() {
        assert!(TaskPriority::Urgent.rank() < TaskPriority::High.rank());
        assert!(TaskPriority::High.rank() < TaskPriority::Medium.rank());
        assert!(TaskPriority::Medium.rank() < TaskPriority::Low.rank());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"inProgress\"");
    }
}
