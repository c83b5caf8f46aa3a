//! Task data model and persistence for Taskdeck.
//!
//! Tasks are persisted as a single JSON document that is loaded wholesale at
//! startup and rewritten wholesale (atomic replace) after every mutation.
//!
//! # Main types
//!
//! - [`TaskItem`] — The central backlog entity with status, priority, and an
//!   append-only evidence log.
//! - [`TaskStore`] — Persistence seam for the task list.
//! - [`FileTaskStore`] — JSON-file implementation with atomic replace.
//! - [`CompactionStateStore`] — Small document holding `last_compaction_at`.

/// Compaction bookkeeping persistence.
pub mod state;
/// Task-list persistence.
pub mod store;
/// The task entity and its enums.
pub mod task;

pub use state::{CompactionState, CompactionStateStore};
pub use store::{FileTaskStore, TaskStore};
pub use task::{EvidenceEntry, TaskItem, TaskPriority, TaskStatus};
