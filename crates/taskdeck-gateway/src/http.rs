use crate::{AgentReply, GatewayClient};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use taskdeck_core::{TaskdeckError, TaskdeckResult};
use tracing::{debug, warn};

/// HTTP client for the agent gateway.
///
/// Tracks connectivity with a flag that a [`connect`](Self::connect) health
/// probe sets and that send results keep current, so the scheduler can cheaply
/// check `is_connected` at every tick without a network round trip.
pub struct HttpGatewayClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
    connected: AtomicBool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    agent_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_key: Option<&'a str>,
    thinking: bool,
}

impl HttpGatewayClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
            connected: AtomicBool::new(false),
        }
    }

    /// Probe the gateway health endpoint and update the connected flag.
    pub async fn connect(&self) -> TaskdeckResult<()> {
        let url = format!("{}/v1/health", self.base_url);
        let mut req = self.http.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => {
                self.connected.store(true, Ordering::SeqCst);
                debug!(url = %url, "Gateway reachable");
                Ok(())
            }
            Ok(resp) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TaskdeckError::Gateway(format!(
                    "Health check failed with status {}",
                    resp.status()
                )))
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TaskdeckError::Http(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_agent_message(
        &self,
        agent_id: &str,
        message: &str,
        session_key: Option<&str>,
        thinking_enabled: bool,
    ) -> TaskdeckResult<AgentReply> {
        let url = format!("{}/v1/agent/message", self.base_url);
        let body = SendMessageBody {
            agent_id,
            message,
            session_key,
            thinking: thinking_enabled,
        };

        let mut req = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            TaskdeckError::Http(e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_else(|_| "unknown error".to_string());
            warn!(agent = agent_id, %status, "Gateway rejected message");
            // The status code stays in the message so callers can classify
            // rate limiting (429) by substring.
            return Err(TaskdeckError::Gateway(format!(
                "Gateway error {status}: {detail}"
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        let reply: AgentReply = resp
            .json()
            .await
            .map_err(|e| TaskdeckError::Gateway(format!("Malformed gateway reply: {e}")))?;
        Ok(reply)
    }
}
