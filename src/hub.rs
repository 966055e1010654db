//! Hub REST queries - desired state pull and heartbeat
//!
//! The hub, not this agent, is the system of record; these are the two
//! read/announce endpoints the agent is allowed to call directly.

use crate::config::HubConfig;
use crate::error::{AgentError, AgentResult};
use crate::state::DesiredState;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// REST client toward the hub's device API
#[derive(Clone)]
pub struct HubClient {
    base: String,
    device_id: String,
    api_key: String,
    http: reqwest::Client,
}

impl HubClient {
    pub fn new(cfg: &HubConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            base: format!("{}/api/v1", cfg.url.trim_end_matches('/')),
            device_id: cfg.device_id.clone(),
            api_key: cfg.api_key.clone(),
            http,
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("ApiKey {}", self.api_key))
            .header("x-device-id", &self.device_id)
    }

    /// Fetch the hub's stored desired state for this device.
    ///
    /// `Ok(None)` when the route is not open to agents (the caller then
    /// falls back to requesting a push over the session).
    pub async fn fetch_desired_state(&self) -> AgentResult<Option<DesiredState>> {
        let url = format!("{}/devices/{}/state", self.base, self.device_id);
        let resp = self
            .auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            info!("ℹ️  Desired-state REST unavailable ({})", resp.status());
            return Ok(None);
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        if !body.is_object() {
            warn!("⚠️  Desired-state response is not an object");
            return Ok(None);
        }
        Ok(Some(DesiredState::from_value(&body)))
    }

    /// Announce liveness on a fixed period, independent of state sync
    pub async fn post_heartbeat(&self) -> AgentResult<()> {
        let url = format!("{}/devices/{}/heartbeat", self.base, self.device_id);
        let resp = self
            .auth(self.http.post(&url))
            .json(&json!({"status": "ok"}))
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        if resp.status().is_client_error() || resp.status().is_server_error() {
            warn!("⚠️  Heartbeat rejected: {}", resp.status());
        } else {
            debug!("💓 Heartbeat OK");
        }
        Ok(())
    }
}
