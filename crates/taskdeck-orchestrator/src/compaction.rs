use crate::service::TaskService;
use chrono::{Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use taskdeck_gateway::GatewayClient;
use taskdeck_store::{CompactionState, CompactionStateStore};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One merged duplicate-group in a compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionGroup {
    /// The surviving task.
    pub keeper_id: Uuid,
    /// The `{project}|{agent}|{normalized title}` key the group matched on.
    pub normalized_key: String,
    /// Tasks absorbed into the keeper and removed from the backlog.
    pub merged_ids: Vec<Uuid>,
    /// The keeper's project label, for report and notification text.
    pub project_name: Option<String>,
    /// The keeper's agent assignment, for report and notification text.
    pub assigned_agent: Option<String>,
}

/// Summary of one compaction pass over the active backlog.
#[derive(Debug, Clone)]
pub struct CompactionReport {
    /// Active (non-archived, not Done) tasks examined.
    pub scanned_active_count: usize,
    /// Tasks removed by merging.
    pub merged_task_count: usize,
    /// The duplicate groups that merged, in first-appearance order.
    pub groups: Vec<CompactionGroup>,
}

/// Thresholds and pacing for automatic compaction.
#[derive(Debug, Clone)]
pub struct CompactionPolicy {
    /// Active-task count that triggers a pass.
    pub high_water: usize,
    /// Compaction never shrinks the active set below this.
    pub floor: usize,
    /// Most merges allowed in a single pass.
    pub max_merges: usize,
    /// Minimum wall-clock gap between passes.
    pub cooldown: ChronoDuration,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            high_water: 220,
            floor: 180,
            max_merges: 100,
            cooldown: ChronoDuration::minutes(15),
        }
    }
}

/// Threshold-and-cooldown gate around [`TaskService::compact_backlog_if_needed`].
///
/// After each pass it persists `last_compaction_at`, writes a Markdown audit
/// report, and notifies the scope-review agent. Report and notification
/// failures are logged and swallowed; the merge itself is what matters.
pub struct CompactionGovernor {
    service: Arc<TaskService>,
    gateway: Arc<dyn GatewayClient>,
    state_store: CompactionStateStore,
    reports_dir: PathBuf,
    policy: CompactionPolicy,
    state: Mutex<CompactionState>,
}

/// Agent that receives post-compaction review notifications.
const REVIEW_AGENT: &str = "scope";
/// Groups listed in the review notification before truncation.
const NOTIFY_GROUP_LIMIT: usize = 12;

impl CompactionGovernor {
    pub async fn load(
        service: Arc<TaskService>,
        gateway: Arc<dyn GatewayClient>,
        state_store: CompactionStateStore,
        reports_dir: impl Into<PathBuf>,
        policy: CompactionPolicy,
    ) -> Self {
        let state = state_store.load().await;
        Self {
            service,
            gateway,
            state_store,
            reports_dir: reports_dir.into(),
            policy,
            state: Mutex::new(state),
        }
    }

    /// Run one governed evaluation. Returns a human-readable summary when a
    /// pass actually merged something, `None` when gated or nothing merged.
    pub async fn evaluate(&self) -> Option<String> {
        let active = self
            .service
            .tasks()
            .iter()
            .filter(|t| t.is_active())
            .count();
        // Reaching the high-water mark counts, not just exceeding it.
        if active < self.policy.high_water {
            return None;
        }

        let now = Utc::now();
        let mut state = self.state.lock().await;
        if let Some(last) = state.last_compaction_at {
            if now - last < self.policy.cooldown {
                debug!("Compaction still cooling down");
                return None;
            }
        }

        let report = self
            .service
            .compact_backlog_if_needed(self.policy.floor, self.policy.max_merges)
            .await?;

        state.last_compaction_at = Some(now);
        if let Err(e) = self.state_store.save(&state).await {
            warn!(error = %e, "Failed to persist compaction state");
        }
        drop(state);

        let report_path = self.write_report(&report).await;
        info!(
            merged = report.merged_task_count,
            report = %report_path,
            "Compaction pass finished"
        );
        self.notify_review_agent(&report).await;

        Some(format!(
            "Scope compaction pass merged {} tasks to reduce scope creep.",
            report.merged_task_count
        ))
    }

    /// Run [`Self::evaluate`] on a fixed interval until aborted.
    pub fn start(self: Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Some(summary) = self.evaluate().await {
                    info!("{summary}");
                }
            }
        })
    }

    async fn write_report(&self, report: &CompactionReport) -> String {
        let stamp = Utc::now()
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            .replace(':', "-");
        let path = self
            .reports_dir
            .join(format!("scope_compaction_{stamp}.md"));

        let mut body = String::new();
        body.push_str("# Scope compaction report\n\n");
        body.push_str(&format!(
            "- Scanned active tasks: {}\n- Merged tasks: {}\n- Groups: {}\n\n",
            report.scanned_active_count,
            report.merged_task_count,
            report.groups.len()
        ));
        for group in &report.groups {
            body.push_str(&format!(
                "## {}\n\n- Keeper: {}\n- Merged: {}\n- Project: {}\n- Agent: {}\n\n",
                group.normalized_key,
                group.keeper_id,
                group
                    .merged_ids
                    .iter()
                    .map(Uuid::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                group.project_name.as_deref().unwrap_or("-"),
                group.assigned_agent.as_deref().unwrap_or("-"),
            ));
        }

        let result = async {
            tokio::fs::create_dir_all(&self.reports_dir).await?;
            tokio::fs::write(&path, body).await
        }
        .await;
        match result {
            Ok(()) => path.display().to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to write compaction report");
                format!("Failed to write compaction report: {e}")
            }
        }
    }

    /// Best-effort notification so a human-facing agent can review what was
    /// merged. Delivery failure never fails the pass.
    async fn notify_review_agent(&self, report: &CompactionReport) {
        if !self.gateway.is_connected() {
            return;
        }
        let mut message = format!(
            "[scope-compaction-review]\nMerged {} duplicate tasks across {} groups:\n",
            report.merged_task_count,
            report.groups.len()
        );
        for group in report.groups.iter().take(NOTIFY_GROUP_LIMIT) {
            message.push_str(&format!(
                "- Keeper: {} | merged {} | project={} | agent={}\n",
                group.keeper_id,
                group.merged_ids.len(),
                group.project_name.as_deref().unwrap_or("-"),
                group.assigned_agent.as_deref().unwrap_or("-"),
            ));
        }
        if report.groups.len() > NOTIFY_GROUP_LIMIT {
            message.push_str(&format!(
                "… and {} more groups in the report file.\n",
                report.groups.len() - NOTIFY_GROUP_LIMIT
            ));
        }
        if let Err(e) = self
            .gateway
            .send_agent_message(REVIEW_AGENT, &message, None, false)
            .await
        {
            warn!(error = %e, "Failed to notify scope-review agent");
        }
    }
}
