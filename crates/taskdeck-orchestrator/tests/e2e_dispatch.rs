//! End-to-end dispatch test.
//!
//! Drives the full lifecycle with a mock gateway: scheduled tasks are
//! auto-queued, dequeued by priority, executed against the gateway, and land
//! in the status their reply marker dictates, with at most one run per agent
//! and the session key persisted across runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskdeck_core::TaskdeckResult;
use taskdeck_gateway::{AgentReply, GatewayClient};
use taskdeck_orchestrator::{SchedulerConfig, SchedulerLoop, TaskService};
use taskdeck_store::{FileTaskStore, TaskItem, TaskPriority, TaskStatus};
use tokio::time::sleep;

/// Mock gateway: replies per agent id, records every send, and tracks the
/// peak number of concurrent in-flight sends per agent.
struct MockGateway {
    replies: HashMap<String, String>,
    sent: Mutex<Vec<(String, String, Option<String>)>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<usize>,
}

impl MockGateway {
    fn new(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(agent, reply)| (agent.to_string(), reply.to_string()))
                .collect(),
            sent: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: Mutex::new(0),
        }
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    fn is_connected(&self) -> bool {
        true
    }

    async fn send_agent_message(
        &self,
        agent_id: &str,
        message: &str,
        session_key: Option<&str>,
        _thinking_enabled: bool,
    ) -> TaskdeckResult<AgentReply> {
        {
            let mut in_flight = self.in_flight.lock();
            let count = in_flight.entry(agent_id.to_string()).or_insert(0);
            *count += 1;
            let mut max = self.max_in_flight.lock();
            *max = (*max).max(*count);
        }
        self.sent.lock().push((
            agent_id.to_string(),
            message.to_string(),
            session_key.map(str::to_string),
        ));
        // Give overlapping dispatch a window to manifest.
        sleep(Duration::from_millis(20)).await;
        if let Some(count) = self.in_flight.lock().get_mut(agent_id) {
            *count -= 1;
        }
        Ok(AgentReply {
            text: self
                .replies
                .get(agent_id)
                .cloned()
                .unwrap_or_else(|| "[task-continue]".to_string()),
            session_key: session_key.map(str::to_string),
        })
    }
}

async fn wait_for_status(service: &TaskService, id: uuid::Uuid, status: TaskStatus) {
    for _ in 0..200 {
        if service.task(id).map(|t| t.status) == Some(status) {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "task {id} never reached {status:?}, currently {:?}",
        service.task(id).map(|t| t.status)
    );
}

#[tokio::test]
async fn test_scheduled_task_runs_to_done() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTaskStore::new(tmp.path().join("tasks.json")));
    let service = Arc::new(TaskService::load(store).await);
    let gateway = Arc::new(MockGateway::new(&[("matrix", "finished\n[task-complete]")]));

    let scheduler = SchedulerLoop::new(
        Arc::clone(&service),
        Arc::clone(&gateway) as Arc<dyn GatewayClient>,
        SchedulerConfig::default(),
    );

    let task = service
        .create_task(
            TaskItem::new("Ship the release")
                .with_description("Tag and publish v0.3.0")
                .with_agent("Matrix")
                .with_project("p1", "Apollo", None),
        )
        .await;

    // First tick promotes Scheduled → Queued, then dispatches the run.
    scheduler.run_tick().await;
    wait_for_status(&service, task.id, TaskStatus::Done).await;

    let task = service.task(task.id).unwrap();
    assert!(task
        .evidence
        .iter()
        .any(|e| e.text.starts_with("Auto-queued")));
    assert!(task
        .evidence
        .iter()
        .any(|e| e.text.starts_with("Dequeued to In Progress")));
    assert!(task
        .evidence
        .iter()
        .any(|e| e.text.starts_with("Kickoff sent to matrix")));
    assert!(task
        .evidence
        .iter()
        .any(|e| e.text.contains("finished")));
    assert_eq!(
        task.execution_session_key.as_deref(),
        Some(format!("agent:matrix:task:{}", task.id).as_str())
    );

    let sent = gateway.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "matrix");
    assert!(sent[0].1.starts_with("[task-start]"));
    assert!(sent[0].1.contains("Project: Apollo"));
    assert!(sent[0].1.contains("Tag and publish v0.3.0"));
}

#[tokio::test]
async fn test_one_run_per_agent_and_urgent_first() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTaskStore::new(tmp.path().join("tasks.json")));
    let service = Arc::new(TaskService::load(store).await);
    let gateway = Arc::new(MockGateway::new(&[
        ("matrix", "[task-complete]"),
        ("atlas", "[task-complete]"),
    ]));

    let scheduler = SchedulerLoop::new(
        Arc::clone(&service),
        Arc::clone(&gateway) as Arc<dyn GatewayClient>,
        SchedulerConfig::default(),
    );

    let low = service
        .create_task(
            TaskItem::new("Low for matrix")
                .with_agent("matrix")
                .with_priority(TaskPriority::Low)
                .with_status(TaskStatus::Queued),
        )
        .await;
    let urgent = service
        .create_task(
            TaskItem::new("Urgent for matrix")
                .with_agent("matrix")
                .with_priority(TaskPriority::Urgent)
                .with_status(TaskStatus::Queued),
        )
        .await;
    let other = service
        .create_task(
            TaskItem::new("For atlas")
                .with_agent("atlas")
                .with_status(TaskStatus::Queued),
        )
        .await;

    scheduler.run_tick().await;
    wait_for_status(&service, urgent.id, TaskStatus::Done).await;
    wait_for_status(&service, other.id, TaskStatus::Done).await;
    // The low-priority task waited for the agent; later ticks pick it up
    // once the completed run releases its reservation.
    for _ in 0..200 {
        scheduler.run_tick().await;
        if service.task(low.id).map(|t| t.status) == Some(TaskStatus::Done) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    wait_for_status(&service, low.id, TaskStatus::Done).await;

    assert_eq!(*gateway.max_in_flight.lock(), 1);

    let sent = gateway.sent.lock().clone();
    let matrix_order: Vec<&str> = sent
        .iter()
        .filter(|(agent, _, _)| agent == "matrix")
        .map(|(_, message, _)| message.as_str())
        .collect();
    assert_eq!(matrix_order.len(), 2);
    assert!(matrix_order[0].contains("Urgent for matrix"));
    assert!(matrix_order[1].contains("Low for matrix"));
}

#[tokio::test]
async fn test_blocked_reply_requeues_and_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("tasks.json");
    let task_id;
    {
        let store = Arc::new(FileTaskStore::new(path.clone()));
        let service = Arc::new(TaskService::load(store).await);
        let gateway = Arc::new(MockGateway::new(&[(
            "matrix",
            "need credentials [task-blocked]",
        )]));
        let scheduler = SchedulerLoop::new(
            Arc::clone(&service),
            gateway as Arc<dyn GatewayClient>,
            SchedulerConfig::default(),
        );

        let task = service
            .create_task(
                TaskItem::new("Needs secrets")
                    .with_agent("matrix")
                    .with_status(TaskStatus::Queued),
            )
            .await;
        task_id = task.id;

        scheduler.run_tick().await;
        wait_for_status(&service, task_id, TaskStatus::Queued).await;
        // Backoff is process-local; the task itself is already persisted
        // back in Queued.
        sleep(Duration::from_millis(50)).await;
    }

    let reloaded = TaskService::load(Arc::new(FileTaskStore::new(path))).await;
    let task = reloaded.task(task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task
        .evidence
        .iter()
        .any(|e| e.text.contains("need credentials")));
    assert!(task.execution_session_key.is_some());
}
