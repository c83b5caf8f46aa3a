//! Gateway boundary for Taskdeck.
//!
//! The gateway is the only egress point to the agent runtime. The core
//! depends solely on the [`GatewayClient`] capability: send one message to
//! an agent, get the final text and session key back.

/// HTTP implementation of the gateway capability.
pub mod http;

pub use http::HttpGatewayClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskdeck_core::TaskdeckResult;

/// Final result of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    /// The agent's final assistant text (may be empty).
    pub text: String,
    /// Session the run was attached to, when the gateway reports one.
    pub session_key: Option<String>,
}

/// The single capability the orchestration core needs from the outside
/// world: deliver a message to an agent and wait for its final reply.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Whether the gateway currently considers itself reachable. The
    /// scheduler skips whole ticks while this is false.
    fn is_connected(&self) -> bool;

    /// Send `message` to `agent_id`, optionally pinned to an existing
    /// session, and wait for the final reply. Errors carry a human-readable
    /// message that ends up in the task's evidence trail.
    async fn send_agent_message(
        &self,
        agent_id: &str,
        message: &str,
        session_key: Option<&str>,
        thinking_enabled: bool,
    ) -> TaskdeckResult<AgentReply>;
}
