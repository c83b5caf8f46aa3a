//! Shared primitives for Taskdeck: the error taxonomy and agent-key
//! normalization used across the store, gateway, and orchestrator crates.

pub mod agent;
pub mod error;

pub use agent::normalized_agent;
pub use error::{TaskdeckError, TaskdeckResult};
