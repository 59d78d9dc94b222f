//! HTTP client SDK for the registry service.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use crate::server::NodeEntry;

/// Errors from registry interactions.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// Register with a URL differing from the stored one.
    #[error("node {0} already registered with a different URL")]
    Conflict(String),

    #[error("node {0} is not registered")]
    NotFound(String),

    #[error("unexpected registry response {status}: {body}")]
    Unexpected { status: StatusCode, body: String },
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First registration: the node starts at full reputation.
    Created,
    /// Same node, same URL: a restart, not a new member.
    AlreadyRegistered,
}

/// Client for the registry HTTP API.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Announce this node. 201 and 200 are both success; 409 means the id
    /// is taken by a different endpoint.
    pub async fn register(
        &self,
        node_id: &str,
        node_url: &str,
    ) -> Result<RegisterOutcome, RegistryError> {
        let response = self
            .http
            .post(format!("{}/register", self.base_url))
            .json(&json!({ "node_id": node_id, "node_url": node_url }))
            .send()
            .await?;
        match response.status() {
            StatusCode::CREATED => Ok(RegisterOutcome::Created),
            StatusCode::OK => Ok(RegisterOutcome::AlreadyRegistered),
            StatusCode::CONFLICT => Err(RegistryError::Conflict(node_id.to_string())),
            status => Err(unexpected(status, response).await),
        }
    }

    pub async fn deregister(&self, node_id: &str) -> Result<(), RegistryError> {
        let response = self
            .http
            .post(format!("{}/deregister", self.base_url))
            .json(&json!({ "node_id": node_id }))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(node_id.to_string())),
            status => Err(unexpected(status, response).await),
        }
    }

    /// The full membership view: `node_id → {url, reputation}`.
    pub async fn nodes(&self) -> Result<HashMap<String, NodeEntry>, RegistryError> {
        let response = self
            .http
            .get(format!("{}/nodes", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn total_nodes(&self) -> Result<usize, RegistryError> {
        let response = self
            .http
            .get(format!("{}/total_nodes", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        Ok(body
            .get("total_nodes")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as usize)
    }

    pub async fn reputation(&self, node_id: &str) -> Result<i64, RegistryError> {
        let response = self
            .http
            .get(format!("{}/reputation/{}", self.base_url, node_id))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response.json().await?;
                Ok(body
                    .get("reputation")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0))
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(node_id.to_string())),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Raise a node's score; `None` uses the server default (+10).
    pub async fn increase_reputation(
        &self,
        node_id: &str,
        amount: Option<i64>,
    ) -> Result<i64, RegistryError> {
        self.adjust("increase", node_id, amount).await
    }

    /// Lower a node's score; `None` uses the server default (−20).
    pub async fn decrease_reputation(
        &self,
        node_id: &str,
        amount: Option<i64>,
    ) -> Result<i64, RegistryError> {
        self.adjust("decrease", node_id, amount).await
    }

    async fn adjust(
        &self,
        direction: &str,
        node_id: &str,
        amount: Option<i64>,
    ) -> Result<i64, RegistryError> {
        let mut payload = json!({ "node_id": node_id });
        if let Some(amount) = amount {
            payload["amount"] = json!(amount);
        }
        let response = self
            .http
            .post(format!("{}/reputation/{}", self.base_url, direction))
            .json(&payload)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response.json().await?;
                let reputation = body
                    .get("reputation")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0);
                debug!(node = %node_id, direction, reputation, "reputation adjusted");
                Ok(reputation)
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(node_id.to_string())),
            status => Err(unexpected(status, response).await),
        }
    }
}

async fn unexpected(status: StatusCode, response: reqwest::Response) -> RegistryError {
    let body = response.text().await.unwrap_or_default();
    RegistryError::Unexpected { status, body }
}
