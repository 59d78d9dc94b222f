//! The registry HTTP service.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Reputation granted on first registration.
pub const DEFAULT_REPUTATION: i64 = 100;

const DEFAULT_INCREASE: i64 = 10;
const DEFAULT_DECREASE: i64 = 20;

/// One registered node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub url: String,
    pub reputation: i64,
    #[serde(skip, default = "Utc::now")]
    pub registered_at: DateTime<Utc>,
}

/// Registry server configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub bind_address: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            cors_enabled: true,
        }
    }
}

#[derive(Clone)]
struct AppState {
    nodes: Arc<RwLock<HashMap<String, NodeEntry>>>,
}

/// The registry service: membership and reputation, authoritative.
pub struct RegistryService {
    config: RegistryConfig,
    state: AppState,
}

impl RegistryService {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: AppState {
                nodes: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    /// Bind and serve. Resolves once the listener is up; the server itself
    /// runs on its own task. Returns the bound address (port 0 resolves).
    pub async fn start(&self) -> Result<std::net::SocketAddr> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "registry service listening");

        let app = self.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "registry server error");
            }
        });
        Ok(local_addr)
    }

    fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/register", post(register_node))
            .route("/deregister", post(deregister_node))
            .route("/nodes", get(list_nodes))
            .route("/total_nodes", get(total_nodes))
            .route("/reputation/increase", post(increase_reputation))
            .route("/reputation/decrease", post(decrease_reputation))
            .route("/reputation/:node_id", get(get_reputation))
            .with_state(self.state.clone());
        if self.config.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }
        router
    }
}

/// Node ids arrive as either strings or bare integers; store them as
/// strings, the way the directory keys them.
fn coerce_node_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn error_body(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "error": message.into() }))
}

async fn register_node(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let node_id = coerce_node_id(payload.get("node_id"));
    let node_url = payload
        .get("node_url")
        .and_then(Value::as_str)
        .map(str::to_string);
    let (Some(node_id), Some(node_url)) = (node_id, node_url) else {
        return (
            StatusCode::BAD_REQUEST,
            error_body("Node ID and URL are required"),
        );
    };

    let mut nodes = state.nodes.write().await;
    if let Some(existing) = nodes.get(&node_id) {
        if existing.url == node_url {
            return (
                StatusCode::OK,
                Json(json!({
                    "message": format!("Node {node_id} already registered with URL {node_url}")
                })),
            );
        }
        return (
            StatusCode::CONFLICT,
            error_body(format!(
                "Node ID {node_id} already registered with a different URL"
            )),
        );
    }

    info!(node = %node_id, url = %node_url, "node registered");
    nodes.insert(
        node_id.clone(),
        NodeEntry {
            url: node_url.clone(),
            reputation: DEFAULT_REPUTATION,
            registered_at: Utc::now(),
        },
    );
    (
        StatusCode::CREATED,
        Json(json!({
            "message": format!("Node {node_id} registered successfully with URL {node_url}")
        })),
    )
}

async fn deregister_node(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(node_id) = coerce_node_id(payload.get("node_id")) else {
        return (
            StatusCode::BAD_REQUEST,
            error_body("Invalid request. 'node_id' is required."),
        );
    };
    let mut nodes = state.nodes.write().await;
    if nodes.remove(&node_id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            error_body(format!("Node {node_id} is not registered.")),
        );
    }
    info!(node = %node_id, "node deregistered");
    (
        StatusCode::OK,
        Json(json!({
            "message": format!("Node {node_id} deregistered successfully.")
        })),
    )
}

async fn list_nodes(State(state): State<AppState>) -> Json<HashMap<String, NodeEntry>> {
    Json(state.nodes.read().await.clone())
}

async fn total_nodes(State(state): State<AppState>) -> Json<Value> {
    let total = state.nodes.read().await.len();
    Json(json!({ "total_nodes": total }))
}

async fn increase_reputation(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    adjust_reputation(state, payload, DEFAULT_INCREASE, 1).await
}

async fn decrease_reputation(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    adjust_reputation(state, payload, DEFAULT_DECREASE, -1).await
}

/// Shared adjust path: `sign` is +1 for increase, −1 for decrease. Scores
/// stay inside [0, 100] no matter what amount the caller picked.
async fn adjust_reputation(
    state: AppState,
    payload: Value,
    default_amount: i64,
    sign: i64,
) -> (StatusCode, Json<Value>) {
    let Some(node_id) = coerce_node_id(payload.get("node_id")) else {
        return (
            StatusCode::BAD_REQUEST,
            error_body("Invalid request. 'node_id' is required."),
        );
    };
    let amount = payload
        .get("amount")
        .and_then(Value::as_i64)
        .unwrap_or(default_amount);

    let mut nodes = state.nodes.write().await;
    let Some(entry) = nodes.get_mut(&node_id) else {
        return (
            StatusCode::NOT_FOUND,
            error_body(format!("Node {node_id} is not registered.")),
        );
    };
    entry.reputation = (entry.reputation + sign * amount).clamp(0, 100);
    let verb = if sign > 0 { "increased" } else { "decreased" };
    info!(node = %node_id, amount, reputation = entry.reputation, "reputation {}", verb);
    (
        StatusCode::OK,
        Json(json!({
            "message": format!("Reputation for Node {node_id} {verb} by {amount}."),
            "reputation": entry.reputation,
        })),
    )
}

async fn get_reputation(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let nodes = state.nodes.read().await;
    match nodes.get(&node_id) {
        Some(entry) => (
            StatusCode::OK,
            Json(json!({ "node_id": node_id, "reputation": entry.reputation })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            error_body(format!("Node {node_id} is not registered.")),
        ),
    }
}
