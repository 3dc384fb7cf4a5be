use crate::domain::model::{PORT_KEY, SESSION_NAME_KEY, SESSION_SEARCH_ID_KEY};
use crate::utils::error::{CoordinatorError, Result};
use crate::utils::validation::validate_url;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Talks to a running coordinator the same way a game client does.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    client: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Result<Self> {
        validate_url("coordinator_url", base_url)?;
        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the coordinator for a new backend; returns the port it listens on.
    pub async fn create_session(&self, session_name: &str, session_search_id: &str) -> Result<u16> {
        let url = format!("{}/Sessions", self.base_url);
        let mut request = self.client.post(&url).json(&json!({
            (SESSION_NAME_KEY): session_name,
            (SESSION_SEARCH_ID_KEY): session_search_id,
        }));

        // 設定超時
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        tracing::debug!("Requesting session from: {}", url);
        let response = request.send().await?;
        let status = response.status();
        tracing::debug!("Coordinator response status: {}", status);

        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message")
                .to_string();
            return Err(CoordinatorError::CoordinatorRejected {
                status: status.as_u16(),
                message,
            });
        }

        body.get(PORT_KEY)
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| CoordinatorError::CoordinatorRejected {
                status: status.as_u16(),
                message: format!("response has no valid {} field: {}", PORT_KEY, body),
            })
    }
}
