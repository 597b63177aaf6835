// [apps/control-plane/src/handlers/nodes.rs]
//! Node agent registration and heartbeat ingestion.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use wopr_fleet::NodeRegistration;
use wopr_models::fleet::{Node, NodeAgentFrame};

use crate::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    pub id: String,
    pub host: String,
    pub capacity_mb: u64,
    #[serde(default)]
    pub agent_version: Option<String>,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<Node>, ApiError> {
    let node = state
        .connection_manager
        .register_node(NodeRegistration {
            id: req.id,
            host: req.host,
            capacity_mb: req.capacity_mb,
            agent_version: req.agent_version,
        })
        .await
        .map_err(ApiError::from)?;
    Ok(Json(node))
}

pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(frame): Json<NodeAgentFrame>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.connection_manager.handle_frame(&node_id, frame).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<Node>, ApiError> {
    Ok(Json(state.nodes.get(&node_id).await.map_err(ApiError::from)?))
}

pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Node>>, ApiError> {
    Ok(Json(state.nodes.list().await.map_err(ApiError::from)?))
}
