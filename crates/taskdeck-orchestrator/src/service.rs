use crate::compaction::{CompactionGroup, CompactionReport};
use crate::events::TaskEvent;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use taskdeck_store::{TaskItem, TaskStatus, TaskStore};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// The authoritative state machine over the task backlog.
///
/// All status transitions, mutation, and compaction go through here. The
/// in-memory list is the source of truth; the whole document is persisted
/// after every mutating call, and persistence failures are logged but never
/// surfaced (the in-memory state stays authoritative until the next save).
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    tasks: Mutex<Vec<TaskItem>>,
    paused: AtomicBool,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskService {
    /// Load the persisted backlog and repair any agent-exclusivity
    /// violations before serving it.
    ///
    /// A corrupt document falls back to an empty list rather than failing
    /// startup. The duplicate-in-progress repair runs unconditionally on
    /// every load, regardless of how the inconsistency arose.
    pub async fn load(store: Arc<dyn TaskStore>) -> Self {
        let mut tasks = match store.load().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Failed to load task list, starting empty");
                Vec::new()
            }
        };
        let repaired = repair_duplicate_in_progress(&mut tasks);
        if repaired {
            info!("Repaired duplicate in-progress tasks on load");
        }

        let (events, _) = broadcast::channel(64);
        let service = Self {
            store,
            tasks: Mutex::new(tasks),
            paused: AtomicBool::new(false),
            events,
        };
        if repaired {
            service.persist().await;
        }
        service
    }

    /// Subscribe to task-list and pause-flag events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the full task list in store order.
    pub fn tasks(&self) -> Vec<TaskItem> {
        self.tasks.lock().clone()
    }

    /// Look up a single task by id.
    pub fn task(&self, id: Uuid) -> Option<TaskItem> {
        self.tasks.lock().iter().find(|t| t.id == id).cloned()
    }

    /// Tasks with the given status, stable store order, archived included.
    pub fn tasks_for_status(&self, status: TaskStatus) -> Vec<TaskItem> {
        self.tasks
            .lock()
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    /// Insert a task built by the caller (see [`TaskItem::new`]) and persist.
    pub async fn create_task(&self, task: TaskItem) -> TaskItem {
        self.tasks.lock().push(task.clone());
        self.persist().await;
        self.emit(TaskEvent::ListChanged);
        task
    }

    /// Full replace by id. Refreshes `updated_at`.
    pub async fn update_task(&self, task: TaskItem) {
        {
            let mut tasks = self.tasks.lock();
            let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) else {
                return;
            };
            *slot = task;
            slot.touch();
        }
        self.persist().await;
        self.emit(TaskEvent::ListChanged);
    }

    /// Apply an in-place transform to the task matching `id`, if present.
    pub async fn mutate_task(&self, id: Uuid, transform: impl FnOnce(&mut TaskItem)) {
        {
            let mut tasks = self.tasks.lock();
            let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
                return;
            };
            transform(task);
            task.touch();
        }
        self.persist().await;
        self.emit(TaskEvent::ListChanged);
    }

    /// Transition a task to a new status.
    ///
    /// Moving to `InProgress` first demotes any other non-archived
    /// in-progress task sharing the same normalized agent back to `Queued`,
    /// so at most one task per agent is ever in progress. Moving to `Done`
    /// publishes a [`TaskEvent::Completed`] for downstream collaborators.
    pub async fn move_task(&self, id: Uuid, to: TaskStatus) {
        let completed = {
            let mut tasks = self.tasks.lock();
            let Some(pos) = tasks.iter().position(|t| t.id == id) else {
                return;
            };

            if to == TaskStatus::InProgress {
                if let Some(agent) = tasks[pos].agent_key() {
                    for other in tasks.iter_mut() {
                        if other.id != id
                            && !other.is_archived
                            && other.status == TaskStatus::InProgress
                            && other.agent_key().as_deref() == Some(agent.as_str())
                        {
                            other.status = TaskStatus::Queued;
                            other.touch();
                        }
                    }
                }
            }

            let task = &mut tasks[pos];
            task.status = to;
            task.touch();
            (to == TaskStatus::Done).then(|| task.clone())
        };

        self.persist().await;
        self.emit(TaskEvent::ListChanged);
        if let Some(task) = completed {
            self.emit(TaskEvent::Completed(task));
        }
    }

    /// Append one evidence line to the task's log. No size cap is enforced
    /// at this layer.
    pub async fn append_task_evidence(&self, id: Uuid, text: impl Into<String>) {
        {
            let mut tasks = self.tasks.lock();
            let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
                return;
            };
            task.append_evidence(text);
        }
        self.persist().await;
        self.emit(TaskEvent::ListChanged);
    }

    /// Remove the task unconditionally.
    pub async fn delete_task(&self, id: Uuid) {
        {
            let mut tasks = self.tasks.lock();
            tasks.retain(|t| t.id != id);
        }
        self.persist().await;
        self.emit(TaskEvent::ListChanged);
    }

    /// Whether new dispatch is currently suppressed. In-flight runs are not
    /// interrupted by pausing.
    pub fn is_execution_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Flip the pause flag; returns the new value.
    pub fn toggle_execution_paused(&self) -> bool {
        let paused = !self.paused.fetch_xor(true, Ordering::SeqCst);
        self.emit(TaskEvent::PauseChanged(paused));
        paused
    }

    /// One backlog-compaction pass.
    ///
    /// Groups active tasks by `{project}|{agent}|{normalized title}` and
    /// merges each duplicate group into a keeper (greatest `updated_at`,
    /// ties broken by newest `created_at`, the same rule the load repair
    /// uses). The keeper records each absorbed task by id in its evidence
    /// log. Merging never takes the active set below
    /// `minimum_active_tasks` and never exceeds `max_merges` in one pass.
    ///
    /// Returns `None` when there is nothing to merge.
    pub async fn compact_backlog_if_needed(
        &self,
        minimum_active_tasks: usize,
        max_merges: usize,
    ) -> Option<CompactionReport> {
        let report = {
            let mut tasks = self.tasks.lock();
            let scanned = tasks.iter().filter(|t| t.is_active()).count();
            if scanned <= minimum_active_tasks {
                return None;
            }
            let mut budget = max_merges.min(scanned - minimum_active_tasks);

            let mut order: Vec<String> = Vec::new();
            let mut groups: HashMap<String, Vec<Uuid>> = HashMap::new();
            for task in tasks.iter().filter(|t| t.is_active()) {
                let key = format!(
                    "{}|{}|{}",
                    task.project_id.as_deref().unwrap_or(""),
                    task.agent_key().unwrap_or_default(),
                    task.normalized_title()
                );
                let members = groups.entry(key.clone()).or_default();
                if members.is_empty() {
                    order.push(key);
                }
                members.push(task.id);
            }

            let mut out_groups = Vec::new();
            let mut removed: HashSet<Uuid> = HashSet::new();
            for key in order {
                if budget == 0 {
                    break;
                }
                let members = &groups[&key];
                if members.len() < 2 {
                    continue;
                }
                let Some(keeper_id) = members.iter().copied().max_by_key(|id| {
                    tasks
                        .iter()
                        .find(|t| t.id == *id)
                        .map(|t| (t.updated_at, t.created_at))
                }) else {
                    continue;
                };

                let mut merged: Vec<(Uuid, String)> = Vec::new();
                for id in members {
                    if *id == keeper_id || budget == 0 {
                        continue;
                    }
                    if let Some(task) = tasks.iter().find(|t| t.id == *id) {
                        merged.push((*id, task.title.clone()));
                        budget -= 1;
                    }
                }
                if merged.is_empty() {
                    continue;
                }

                let Some(keeper) = tasks.iter_mut().find(|t| t.id == keeper_id) else {
                    continue;
                };
                for (id, title) in &merged {
                    keeper.append_evidence(format!("Merged duplicate task {id}: {title}"));
                }
                let project_name = keeper.project_name.clone();
                let assigned_agent = keeper.assigned_agent.clone();

                removed.extend(merged.iter().map(|(id, _)| *id));
                out_groups.push(CompactionGroup {
                    keeper_id,
                    normalized_key: key,
                    merged_ids: merged.into_iter().map(|(id, _)| id).collect(),
                    project_name,
                    assigned_agent,
                });
            }

            if removed.is_empty() {
                return None;
            }
            tasks.retain(|t| !removed.contains(&t.id));

            CompactionReport {
                scanned_active_count: scanned,
                merged_task_count: removed.len(),
                groups: out_groups,
            }
        };

        info!(
            merged = report.merged_task_count,
            scanned = report.scanned_active_count,
            "Compacted task backlog"
        );
        self.persist().await;
        self.emit(TaskEvent::ListChanged);
        Some(report)
    }

    fn emit(&self, event: TaskEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    async fn persist(&self) {
        let snapshot = self.tasks.lock().clone();
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(error = %e, "Failed to persist task list; in-memory state remains authoritative");
        }
    }
}

/// Demote all but one in-progress task per normalized agent.
///
/// The survivor is the most recently updated (ties broken by newest
/// `created_at`); the rest go back to `Queued`. Returns whether anything
/// changed.
fn repair_duplicate_in_progress(tasks: &mut [TaskItem]) -> bool {
    let mut by_agent: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, task) in tasks.iter().enumerate() {
        if task.is_archived || task.status != TaskStatus::InProgress {
            continue;
        }
        let Some(agent) = task.agent_key() else {
            continue;
        };
        by_agent.entry(agent).or_default().push(i);
    }

    let mut changed = false;
    for indices in by_agent.values() {
        if indices.len() < 2 {
            continue;
        }
        let keep = indices
            .iter()
            .copied()
            .max_by_key(|&i| (tasks[i].updated_at, tasks[i].created_at))
            .unwrap_or(indices[0]);
        for &i in indices {
            if i == keep {
                continue;
            }
            tasks[i].status = TaskStatus::Queued;
            tasks[i].touch();
            changed = true;
        }
    }
    changed
}
