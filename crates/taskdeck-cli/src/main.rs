//! Taskdeck daemon and backlog CLI.

use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskdeck_gateway::{GatewayClient, HttpGatewayClient};
use taskdeck_orchestrator::{
    CompactionGovernor, CompactionPolicy, SchedulerConfig, SchedulerLoop, TaskService,
};
use taskdeck_store::{
    CompactionStateStore, FileTaskStore, TaskItem, TaskPriority, TaskStatus,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskdeck", about = "Taskdeck — agent task orchestration daemon")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "taskdeck.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestration daemon
    Serve,
    /// Inspect and edit the backlog
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// List tasks, optionally filtered by status
    List {
        /// scheduled, queued, inProgress, or done
        #[arg(long)]
        status: Option<String>,
    },
    /// Add a task to the backlog
    Add {
        /// Task title
        title: String,
        /// Agent to run it
        #[arg(long)]
        agent: Option<String>,
        /// urgent, high, medium, or low
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Free-form details passed to the agent
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Deserialize)]
struct TaskdeckConfig {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default)]
    gateway: GatewayConfig,
    #[serde(default)]
    scheduler: SchedulerSection,
    #[serde(default)]
    compaction: CompactionSection,
}

#[derive(Deserialize)]
struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    url: String,
    #[serde(default)]
    token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: None,
        }
    }
}

#[derive(Deserialize)]
struct SchedulerSection {
    #[serde(default = "default_tick_seconds")]
    tick_seconds: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct CompactionSection {
    #[serde(default = "default_high_water")]
    high_water: usize,
    #[serde(default = "default_floor")]
    floor: usize,
    #[serde(default = "default_max_merges")]
    max_merges: usize,
    #[serde(default = "default_cooldown_minutes")]
    cooldown_minutes: i64,
    #[serde(default = "default_evaluate_seconds")]
    evaluate_seconds: u64,
}

impl Default for CompactionSection {
    fn default() -> Self {
        Self {
            high_water: default_high_water(),
            floor: default_floor(),
            max_merges: default_max_merges(),
            cooldown_minutes: default_cooldown_minutes(),
            evaluate_seconds: default_evaluate_seconds(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_gateway_url() -> String {
    "http://127.0.0.1:3100".to_string()
}
fn default_tick_seconds() -> u64 {
    4
}
fn default_high_water() -> usize {
    220
}
fn default_floor() -> usize {
    180
}
fn default_max_merges() -> usize {
    100
}
fn default_cooldown_minutes() -> i64 {
    15
}
fn default_evaluate_seconds() -> u64 {
    60
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // A missing config file runs on defaults; a broken one is an error.
    let config: TaskdeckConfig = match tokio::fs::read_to_string(&cli.config).await {
        Ok(raw) => toml::from_str(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::from_str("")?,
        Err(e) => {
            return Err(anyhow::anyhow!(
                "Failed to read config file '{}': {e}",
                cli.config.display()
            ))
        }
    };

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Task { action } => task_command(config, action).await,
    }
}

async fn serve(config: TaskdeckConfig) -> anyhow::Result<()> {
    let store = Arc::new(FileTaskStore::new(config.data_dir.join("tasks.json")));
    let service = Arc::new(TaskService::load(store).await);
    info!(tasks = service.tasks().len(), "Backlog loaded");

    let gateway = Arc::new(HttpGatewayClient::new(
        config.gateway.url.clone(),
        config.gateway.token.clone(),
    ));
    if let Err(e) = gateway.connect().await {
        warn!(url = %config.gateway.url, error = %e, "Gateway unreachable; dispatch idles until it comes back");
    } else {
        info!(url = %config.gateway.url, "Gateway connected");
    }

    let scheduler = SchedulerLoop::new(
        Arc::clone(&service),
        Arc::clone(&gateway) as Arc<dyn GatewayClient>,
        SchedulerConfig {
            tick_interval: Duration::from_secs(config.scheduler.tick_seconds),
        },
    );
    let scheduler_handle = scheduler.start();

    let governor = Arc::new(
        CompactionGovernor::load(
            Arc::clone(&service),
            Arc::clone(&gateway) as Arc<dyn GatewayClient>,
            CompactionStateStore::new(config.data_dir.join("compaction_state.json")),
            config.data_dir.join("reports"),
            CompactionPolicy {
                high_water: config.compaction.high_water,
                floor: config.compaction.floor,
                max_merges: config.compaction.max_merges,
                cooldown: ChronoDuration::minutes(config.compaction.cooldown_minutes),
            },
        )
        .await,
    );
    let governor_handle =
        governor.start(Duration::from_secs(config.compaction.evaluate_seconds));

    // Reprobe the gateway periodically so a restart on the other side
    // un-idles the scheduler without operator action.
    let health_gateway = Arc::clone(&gateway);
    let health_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            if !health_gateway.is_connected() {
                let _ = health_gateway.connect().await;
            }
        }
    });

    info!("Taskdeck daemon running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    scheduler_handle.abort();
    governor_handle.abort();
    health_handle.abort();
    Ok(())
}

async fn task_command(config: TaskdeckConfig, action: TaskAction) -> anyhow::Result<()> {
    let store = Arc::new(FileTaskStore::new(config.data_dir.join("tasks.json")));
    let service = TaskService::load(store).await;

    match action {
        TaskAction::List { status } => {
            let filter = match status.as_deref() {
                None => None,
                Some(raw) => Some(parse_status(raw)?),
            };
            let tasks: Vec<TaskItem> = match filter {
                Some(status) => service.tasks_for_status(status),
                None => service.tasks(),
            };
            if tasks.is_empty() {
                println!("No tasks.");
                return Ok(());
            }
            for task in &tasks {
                println!(
                    "{}  [{:<10}] {:<8} {}{}",
                    task.id,
                    format!("{:?}", task.status).to_lowercase(),
                    format!("{:?}", task.priority).to_lowercase(),
                    task.title,
                    task.agent_key()
                        .map(|a| format!("  (agent: {a})"))
                        .unwrap_or_default(),
                );
            }
            println!("\nTotal: {} task(s)", tasks.len());
        }
        TaskAction::Add {
            title,
            agent,
            priority,
            description,
        } => {
            let mut task = TaskItem::new(title).with_priority(parse_priority(&priority)?);
            if let Some(agent) = agent {
                task = task.with_agent(agent);
            }
            if let Some(description) = description {
                task = task.with_description(description);
            }
            let task = service.create_task(task).await;
            println!("Created task {}", task.id);
        }
    }
    Ok(())
}

fn parse_status(raw: &str) -> anyhow::Result<TaskStatus> {
    match raw.to_lowercase().as_str() {
        "scheduled" => Ok(TaskStatus::Scheduled),
        "queued" => Ok(TaskStatus::Queued),
        "inprogress" | "in-progress" => Ok(TaskStatus::InProgress),
        "done" => Ok(TaskStatus::Done),
        other => Err(anyhow::anyhow!("Unknown status '{other}'")),
    }
}

fn parse_priority(raw: &str) -> anyhow::Result<TaskPriority> {
    match raw.to_lowercase().as_str() {
        "urgent" => Ok(TaskPriority::Urgent),
        "high" => Ok(TaskPriority::High),
        "medium" => Ok(TaskPriority::Medium),
        "low" => Ok(TaskPriority::Low),
        other => Err(anyhow::anyhow!("Unknown priority '{other}'")),
    }
}
