// [apps/control-plane/src/handlers/recovery.rs]
//! Manual recovery admin actions. The watchdog drives this path
//! automatically on heartbeat timeout; these endpoints exist for an
//! operator forcing the same path against a node they've confirmed dead,
//! or retrying a recovery event stuck with waiting items.

use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use wopr_models::fleet::{RecoveryEvent, RecoveryTrigger};

use crate::errors::ApiError;
use crate::state::AppState;

pub async fn trigger(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<RecoveryEvent>, ApiError> {
    let event = state.recovery.trigger_recovery(&node_id, RecoveryTrigger::Manual).await.map_err(ApiError::from)?;
    Ok(Json(event))
}

pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<RecoveryEvent>, ApiError> {
    let event = state.recovery.retry_waiting(event_id).await.map_err(ApiError::from)?;
    Ok(Json(event))
}
