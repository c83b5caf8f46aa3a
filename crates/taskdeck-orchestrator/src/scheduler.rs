use crate::events::TaskEvent;
use crate::outcome::{classify_outcome, RunOutcome};
use crate::service::TaskService;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskdeck_gateway::GatewayClient;
use taskdeck_store::{TaskItem, TaskStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cooldown after a run that ended in `[task-continue]`.
const CONTINUE_COOLDOWN_SECS: i64 = 120;
/// Cooldown after a run that ended in `[task-blocked]`.
const BLOCKED_COOLDOWN_SECS: i64 = 60 * 60;
/// Cooldown after a transient run failure.
const TRANSIENT_FAILURE_COOLDOWN_SECS: i64 = 10 * 60;
/// Cooldown after a rate-limit-classified run failure.
const RATE_LIMIT_COOLDOWN_SECS: i64 = 60 * 60;

/// Tuning knobs for [`SchedulerLoop`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between periodic ticks. Event-triggered ticks fire on top
    /// of this whenever the task list changes or the pause flag clears.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(4),
        }
    }
}

/// The recurring dispatch cycle.
///
/// Each tick promotes ready tasks into the queue, resumes stalled
/// in-progress tasks, and starts queued tasks whose agent is free, while
/// keeping at most one active run per task id and per normalized agent.
/// Ticks are skipped entirely while the gateway is disconnected or
/// execution is paused, and a busy-guard makes overlapping ticks a no-op.
pub struct SchedulerLoop {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    service: Arc<TaskService>,
    gateway: Arc<dyn GatewayClient>,
    active_runs: Mutex<HashSet<Uuid>>,
    active_agents: Mutex<HashSet<String>>,
    // Volatile: absence of an entry means always-eligible.
    next_eligible_at: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    tick_running: AtomicBool,
    tick_interval: Duration,
}

impl SchedulerLoop {
    pub fn new(
        service: Arc<TaskService>,
        gateway: Arc<dyn GatewayClient>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                service,
                gateway,
                active_runs: Mutex::new(HashSet::new()),
                active_agents: Mutex::new(HashSet::new()),
                next_eligible_at: Mutex::new(HashMap::new()),
                tick_running: AtomicBool::new(false),
                tick_interval: config.tick_interval,
            }),
        }
    }

    /// Start the background loop: periodic ticks plus event-triggered ticks
    /// on task-list changes and on the pause flag clearing.
    ///
    /// Returns the [`tokio::task::JoinHandle`] so the owner can abort it on
    /// teardown. In-flight gateway calls are not forcibly cancelled; they
    /// complete or fail naturally and release their reservations either way.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let mut events = inner.service.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.tick_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.run_tick().await;
                    }
                    event = events.recv() => match event {
                        Ok(TaskEvent::ListChanged) | Ok(TaskEvent::PauseChanged(false)) => {
                            inner.run_tick().await;
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Scheduler event stream lagged");
                            inner.run_tick().await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    /// Run one dispatch cycle immediately (also used by tests).
    pub async fn run_tick(&self) {
        self.inner.run_tick().await;
    }
}

/// Clears the tick busy-flag on every exit path.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Releases a run's task and agent reservations on every exit path, so a
/// failed handler can never leave an agent permanently blocked.
struct RunReservation<'a> {
    inner: &'a SchedulerInner,
    task_id: Uuid,
    agent: String,
}

impl Drop for RunReservation<'_> {
    fn drop(&mut self) {
        self.inner.active_runs.lock().remove(&self.task_id);
        self.inner.active_agents.lock().remove(&self.agent);
    }
}

impl SchedulerInner {
    async fn run_tick(self: &Arc<Self>) {
        if self.tick_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = TickGuard(&self.tick_running);

        if !self.gateway.is_connected() {
            return;
        }
        if self.service.is_execution_paused() {
            return;
        }

        // Promotion: scheduled is a staging status that auto-queues.
        let ready: Vec<Uuid> = self
            .service
            .tasks()
            .iter()
            .filter(|t| !t.is_archived && t.status == TaskStatus::Scheduled)
            .map(|t| t.id)
            .collect();
        for id in ready {
            self.service.move_task(id, TaskStatus::Queued).await;
            self.service
                .append_task_evidence(id, format!("Auto-queued at {}", short_timestamp()))
                .await;
        }

        let now = Utc::now();
        let mut reserved: HashSet<String> = self.active_agents.lock().clone();

        // Resume pass: in-progress tasks without an active run (left over
        // from a previous process lifetime, or demote/requeue churn).
        for task in self.service.tasks_for_status(TaskStatus::InProgress) {
            if task.is_archived || !self.is_eligible(task.id, now) {
                continue;
            }
            let Some(agent) = task.agent_key() else {
                continue;
            };
            if reserved.contains(&agent) {
                continue;
            }
            reserved.insert(agent);
            self.spawn_run(task.id);
        }

        // Dispatch pass: queued tasks, urgent first, FIFO within a band.
        let mut queued: Vec<TaskItem> = self
            .service
            .tasks_for_status(TaskStatus::Queued)
            .into_iter()
            .filter(|t| !t.is_archived)
            .collect();
        queued.sort_by(dispatch_order);
        for task in queued {
            if !self.is_eligible(task.id, now) {
                continue;
            }
            let Some(agent) = task.agent_key() else {
                continue;
            };
            if reserved.contains(&agent) {
                continue;
            }
            reserved.insert(agent);
            self.service.move_task(task.id, TaskStatus::InProgress).await;
            self.service
                .append_task_evidence(
                    task.id,
                    format!("Dequeued to In Progress at {}", short_timestamp()),
                )
                .await;
            self.spawn_run(task.id);
        }
    }

    fn spawn_run(self: &Arc<Self>, task_id: Uuid) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.start_run(task_id).await;
        });
    }

    /// Execute one run for a task, if it is still runnable and neither the
    /// task nor its agent already has a run in flight.
    async fn start_run(&self, task_id: Uuid) {
        if self.service.is_execution_paused() {
            return;
        }
        let Some(task) = self.service.task(task_id) else {
            return;
        };
        if task.is_archived || task.status != TaskStatus::InProgress {
            return;
        }
        let Some(agent) = task.agent_key() else {
            return;
        };

        // Reserve task and agent together; first caller through wins.
        {
            let mut runs = self.active_runs.lock();
            let mut agents = self.active_agents.lock();
            if runs.contains(&task_id) || agents.contains(&agent) {
                return;
            }
            runs.insert(task_id);
            agents.insert(agent.clone());
        }
        let _release = RunReservation {
            inner: self,
            task_id,
            agent: agent.clone(),
        };

        // Reuse the task's session so the agent keeps its context across
        // runs; persist the key before sending so a crash mid-run leaves it
        // recoverable.
        let session_key = match task.execution_session_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => format!("agent:{agent}:task:{task_id}"),
        };
        self.service
            .mutate_task(task_id, |t| {
                t.execution_session_key = Some(session_key.clone());
            })
            .await;
        self.service
            .append_task_evidence(
                task_id,
                format!("Kickoff sent to {agent} at {}", short_timestamp()),
            )
            .await;

        let kickoff = kickoff_message(&task);
        debug!(task = %task_id, agent = %agent, "Dispatching run");

        match self
            .gateway
            .send_agent_message(&agent, &kickoff, Some(&session_key), true)
            .await
        {
            Ok(reply) => {
                let text = reply.text.trim().to_string();
                if !text.is_empty() {
                    self.service
                        .append_task_evidence(task_id, format!("Final response:\n{text}"))
                        .await;
                }
                self.handle_outcome(task_id, classify_outcome(&text)).await;
            }
            Err(e) => {
                let message = e.to_string();
                warn!(task = %task_id, agent = %agent, error = %message, "Run failed");
                self.service
                    .append_task_evidence(task_id, format!("Run error: {message}"))
                    .await;
                self.service.move_task(task_id, TaskStatus::Queued).await;
                let secs = if is_rate_limit_error(&message) {
                    RATE_LIMIT_COOLDOWN_SECS
                } else {
                    TRANSIENT_FAILURE_COOLDOWN_SECS
                };
                self.set_cooldown(task_id, Utc::now(), secs);
            }
        }
    }

    async fn handle_outcome(&self, task_id: Uuid, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Complete => {
                info!(task = %task_id, "Run complete");
                self.service.move_task(task_id, TaskStatus::Done).await;
            }
            RunOutcome::Continue => {
                self.service.move_task(task_id, TaskStatus::Queued).await;
                self.set_cooldown(task_id, Utc::now(), CONTINUE_COOLDOWN_SECS);
            }
            RunOutcome::Blocked => {
                info!(task = %task_id, "Run reported blocked");
                self.service.move_task(task_id, TaskStatus::Queued).await;
                self.set_cooldown(task_id, Utc::now(), BLOCKED_COOLDOWN_SECS);
            }
        }
    }

    fn is_eligible(&self, task_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.next_eligible_at.lock().get(&task_id) {
            Some(at) => now >= *at,
            None => true,
        }
    }

    fn set_cooldown(&self, task_id: Uuid, from: DateTime<Utc>, seconds: i64) {
        self.next_eligible_at
            .lock()
            .insert(task_id, from + ChronoDuration::seconds(seconds));
    }
}

/// Dispatch order: priority rank, then `updated_at`, then `created_at`, all
/// ascending. Oldest-updated-first gives a FIFO feel within a band.
pub fn dispatch_order(a: &TaskItem, b: &TaskItem) -> CmpOrdering {
    (a.priority.rank(), a.updated_at, a.created_at).cmp(&(
        b.priority.rank(),
        b.updated_at,
        b.created_at,
    ))
}

/// Whether a gateway failure message indicates rate limiting or quota
/// exhaustion (long cooldown) rather than a transient fault.
fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["rate limited", "429", "too many requests", "quota"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Structured kickoff sent to the agent; the reply must end with exactly one
/// of the three outcome markers.
fn kickoff_message(task: &TaskItem) -> String {
    let project_line = match task.project_name.as_deref() {
        Some(name) if !name.is_empty() => format!("Project: {name}"),
        _ => "Project: Unspecified".to_string(),
    };
    let details = task
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or("none");
    format!(
        "[task-start]\n{project_line}\nTask ID: {}\nTask: {}\nTask details: {details}\n\n\
         Continue from existing progress if present.\n\
         End with exactly one marker line:\n\
         [task-complete] or [task-continue] or [task-blocked]",
        task.id, task.title
    )
}

fn short_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
