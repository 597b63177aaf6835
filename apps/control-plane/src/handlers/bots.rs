// [apps/control-plane/src/handlers/bots.rs]
//! Bot profile and instance CRUD: declares a `BotProfile`, places the
//! runtime `BotInstance` on a node, and dispatches the import command.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use wopr_fleet::find_placement;
use wopr_models::bot::{BillingState, BotInstance, BotProfile, ReleaseChannel, RestartPolicy, UpdatePolicy};
use wopr_models::fleet::Command;

use crate::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBotRequest {
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub resource_tier: Option<String>,
    #[serde(default)]
    pub storage_tier: Option<String>,
    pub created_by_user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BotResponse {
    pub instance: BotInstance,
    pub profile: BotProfile,
}

/// Writes the declared profile, finds a placement, creates the runtime
/// row, and dispatches `bot.import` to the chosen node. No compensation
/// is attempted here — recovery's `compensate_remove` is the rollback
/// path for a node that never comes up.
pub async fn create_bot(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBotRequest>,
) -> Result<Json<BotResponse>, ApiError> {
    const DEFAULT_REQUIRED_MB: u64 = 512;

    let candidates = state.nodes.placement_candidates(DEFAULT_REQUIRED_MB).await.map_err(ApiError::from)?;
    let target = find_placement(&candidates, DEFAULT_REQUIRED_MB)
        .ok_or_else(|| ApiError::BadRequest("no node has sufficient free capacity".into()))?
        .id
        .clone();

    let bot_id = Uuid::new_v4();
    let image = req.image.unwrap_or_else(|| state.config.default_bot_image.clone());

    let profile = BotProfile {
        id: bot_id,
        tenant_id: req.tenant_id.clone(),
        name: req.name.clone(),
        description: req.description,
        image: image.clone(),
        env: req.env.clone(),
        restart_policy: RestartPolicy::Always,
        release_channel: ReleaseChannel::Stable,
        update_policy: UpdatePolicy::Manual,
        volumes: None,
        health_check: None,
    };
    state.profiles.save(&profile).await.map_err(ApiError::from)?;

    let now = chrono::Utc::now();
    let instance = BotInstance {
        id: bot_id,
        tenant: req.tenant_id,
        name: req.name,
        node_id: Some(target.clone()),
        billing_state: BillingState::Active,
        suspended_at: None,
        destroy_after: None,
        resource_tier: req.resource_tier.unwrap_or_else(|| "standard".into()),
        storage_tier: req.storage_tier.unwrap_or_else(|| "standard".into()),
        created_by_user_id: req.created_by_user_id,
        created_at: now,
        updated_at: now,
    };
    state.bots.create(&instance).await.map_err(ApiError::from)?;

    let node = state.nodes.get(&target).await.map_err(ApiError::from)?;
    state
        .command_bus
        .send(&node.host, Command::BotImport { bot_id, image, env: req.env })
        .await
        .map_err(ApiError::from)?;

    Ok(Json(BotResponse { instance, profile }))
}

pub async fn get_bot(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<Uuid>,
) -> Result<Json<BotInstance>, ApiError> {
    Ok(Json(state.bots.get(bot_id).await.map_err(ApiError::from)?))
}

pub async fn list_bots_by_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Result<Json<Vec<BotInstance>>, ApiError> {
    Ok(Json(state.bots.list_by_tenant(&tenant).await.map_err(ApiError::from)?))
}

pub async fn stop_bot(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let instance = state.bots.get(bot_id).await.map_err(ApiError::from)?;
    let node_id = instance
        .node_id
        .ok_or_else(|| ApiError::BadRequest(format!("bot {bot_id} is not assigned to a node")))?;
    let node = state.nodes.get(&node_id).await.map_err(ApiError::from)?;
    state.command_bus.send(&node.host, Command::BotStop { bot_id }).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "bot_id": bot_id, "stopped": true })))
}

pub async fn remove_bot(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let instance = state.bots.get(bot_id).await.map_err(ApiError::from)?;
    if let Some(node_id) = instance.node_id {
        let node = state.nodes.get(&node_id).await.map_err(ApiError::from)?;
        state.command_bus.send(&node.host, Command::BotRemove { bot_id }).await.map_err(ApiError::from)?;
    }
    state.profiles.delete(bot_id).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "bot_id": bot_id, "removed": true })))
}
