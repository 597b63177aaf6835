// [apps/control-plane/src/handlers/admin.rs]
//! Tenant onboarding primitives: issuing gateway API keys and storing
//! BYOK provider credentials, sealed with the tenant-derived vault key
//! before they ever touch the database.

use axum::extract::{Path, State};
use axum::Json;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use wopr_vault::{derive_tenant_key, seal_string};

use crate::auth::hash_token;
use crate::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IssueApiKeyRequest {
    pub tenant: String,
    pub instance_id: String,
}

#[derive(Debug, Serialize)]
pub struct IssueApiKeyResponse {
    /// Returned exactly once; only the hash is ever persisted.
    pub token: String,
}

pub async fn issue_api_key(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IssueApiKeyRequest>,
) -> Result<Json<IssueApiKeyResponse>, ApiError> {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let token = format!("wopr_{}", hex::encode(raw));

    state.api_keys.issue(&hash_token(&token), &req.tenant, &req.instance_id).await.map_err(ApiError::from)?;

    Ok(Json(IssueApiKeyResponse { token }))
}

pub async fn revoke_api_key(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.api_keys.revoke(&hash_token(&token)).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "revoked": true })))
}

#[derive(Debug, Deserialize)]
pub struct UpsertCredentialRequest {
    pub provider: String,
    pub secret_value: String,
}

pub async fn upsert_credential(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Json(req): Json<UpsertCredentialRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = derive_tenant_key(&state.config.vault_secret, &tenant);
    let sealed = seal_string(&key, &req.secret_value).map_err(ApiError::from)?;
    state.credentials.upsert(&tenant, &req.provider, &sealed).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "stored": true })))
}
