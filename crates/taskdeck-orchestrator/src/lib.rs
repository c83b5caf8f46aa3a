//! Task orchestration engine: turns a user-authored backlog into dispatched,
//! rate-limited, agent-exclusive execution runs against an external gateway.
//!
//! # Main types
//!
//! - [`TaskService`] — Authoritative state machine over the task list; all
//!   transitions, mutation, and backlog compaction go through it.
//! - [`SchedulerLoop`] — Periodic + event-triggered dispatcher enforcing "at
//!   most one active run per agent".
//! - [`RunOutcome`] — Classification of an agent's final reply.
//! - [`CompactionGovernor`] — Threshold/cooldown gate around automatic
//!   backlog compaction, with audit reports.

/// Backlog compaction governor and report types.
pub mod compaction;
/// Subscription events emitted by the task service.
pub mod events;
/// Free-text outcome classification for agent replies.
pub mod outcome;
/// Dispatch loop, cooldowns, and run execution.
pub mod scheduler;
/// Task state machine, CRUD, and the compaction algorithm.
pub mod service;

pub use compaction::{CompactionGovernor, CompactionGroup, CompactionPolicy, CompactionReport};
pub use events::TaskEvent;
pub use outcome::{classify_outcome, RunOutcome};
pub use scheduler::{SchedulerConfig, SchedulerLoop};
pub use service::TaskService;
