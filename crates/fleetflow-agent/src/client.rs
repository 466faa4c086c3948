//! HTTP client for the platform API.

use anyhow::{anyhow, Context, Result};
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use fleetflow_core::models::ProgressUpdate;
use fleetflow_core::services::queue::PendingTask;
use fleetflow_core::services::relay::RelayDisposition;

#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub account_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    pub agent_id: String,
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capabilities: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[allow(dead_code)]
    ok: bool,
    disposition: RelayDisposition,
}

struct Identity {
    agent_id: String,
    token: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    account_key: Option<String>,
    identity: RwLock<Option<Identity>>,
}

impl ApiClient {
    pub fn new(base_url: String, account_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            account_key,
            identity: RwLock::new(None),
        }
    }

    /// Register with the platform and store the issued identity for
    /// subsequent calls. Returns the agent ID the server settled on.
    pub async fn register(&self, req: &RegisterRequest) -> Result<String> {
        let mut request = self
            .http
            .post(format!("{}/api/agents/register", self.base_url))
            .json(req);
        if let Some(key) = &self.account_key {
            request = request.header("x-account-key", key);
        }

        let response: RegisterResponse = request
            .send()
            .await
            .context("registration request failed")?
            .error_for_status()
            .context("registration rejected")?
            .json()
            .await
            .context("malformed registration response")?;

        let agent_id = response.agent_id.clone();
        *self.identity.write().await = Some(Identity {
            agent_id: response.agent_id,
            token: response.token,
        });
        Ok(agent_id)
    }

    /// Pending work orders for this agent, oldest first.
    pub async fn poll(&self) -> Result<Vec<PendingTask>> {
        let (agent_id, token) = self.identity().await?;
        let orders = self
            .http
            .get(format!("{}/api/agents/{agent_id}/tasks", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .context("poll request failed")?
            .error_for_status()
            .context("poll rejected")?
            .json()
            .await
            .context("malformed poll response")?;
        Ok(orders)
    }

    /// Beat once, refreshing the platform's view of this agent's working
    /// directory and capability set.
    pub async fn heartbeat(
        &self,
        working_dir: Option<&str>,
        capabilities: Option<&[String]>,
    ) -> Result<()> {
        let (agent_id, token) = self.identity().await?;
        self.http
            .post(format!("{}/api/agents/{agent_id}/heartbeat", self.base_url))
            .bearer_auth(token)
            .json(&HeartbeatRequest {
                working_dir,
                capabilities,
            })
            .send()
            .await
            .context("heartbeat request failed")?
            .error_for_status()
            .context("heartbeat rejected")?;
        Ok(())
    }

    /// Send a progress/completion event. The returned disposition tells the
    /// caller whether the platform actually applied it.
    pub async fn send_progress(&self, update: &ProgressUpdate) -> Result<RelayDisposition> {
        let (_, token) = self.identity().await?;
        let response: RelayResponse = self
            .http
            .post(format!("{}/api/relay/progress", self.base_url))
            .bearer_auth(token)
            .json(update)
            .send()
            .await
            .context("progress request failed")?
            .error_for_status()
            .context("progress rejected")?
            .json()
            .await
            .context("malformed progress response")?;
        Ok(response.disposition)
    }

    async fn identity(&self) -> Result<(String, String)> {
        let guard = self.identity.read().await;
        let identity = guard
            .as_ref()
            .ok_or_else(|| anyhow!("client is not registered yet"))?;
        Ok((identity.agent_id.clone(), identity.token.clone()))
    }
}
