// [apps/control-plane/src/handlers/tenants.rs]
//! Admin tenant-lifecycle actions: grace period, suspend, reactivate,
//! ban. Each returns the resulting status record (and, for the two
//! cascading transitions, the affected bot ids).

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use wopr_models::billing::TenantStatusRecord;

use crate::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub reason: String,
    pub by: String,
}

#[derive(Debug, Serialize)]
pub struct CascadeResponse {
    pub status: TenantStatusRecord,
    pub suspended_bot_ids: Vec<uuid::Uuid>,
    pub refunded_credits: Option<i64>,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Result<Json<TenantStatusRecord>, ApiError> {
    Ok(Json(state.tenant_status.get_status(&tenant).await.map_err(ApiError::from)?))
}

pub async fn set_grace_period(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<TenantStatusRecord>, ApiError> {
    Ok(Json(state.tenant_status.set_grace_period(&tenant, &req.by).await.map_err(ApiError::from)?))
}

pub async fn suspend(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<CascadeResponse>, ApiError> {
    let result = state.tenant_status.suspend(&tenant, &req.reason, &req.by).await.map_err(ApiError::from)?;
    Ok(Json(CascadeResponse {
        status: result.status,
        suspended_bot_ids: result.suspended_bot_ids,
        refunded_credits: result.refunded.map(|c| c.cents()),
    }))
}

pub async fn reactivate(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<TenantStatusRecord>, ApiError> {
    Ok(Json(state.tenant_status.reactivate(&tenant, &req.by).await.map_err(ApiError::from)?))
}

pub async fn ban(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<CascadeResponse>, ApiError> {
    let result = state.tenant_status.ban(&tenant, &req.reason, &req.by).await.map_err(ApiError::from)?;
    Ok(Json(CascadeResponse {
        status: result.status,
        suspended_bot_ids: result.suspended_bot_ids,
        refunded_credits: result.refunded.map(|c| c.cents()),
    }))
}
