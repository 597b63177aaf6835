// [apps/control-plane/src/handlers/billing.rs]
//! Tenant-facing balance/history endpoints and the admin manual-credit
//! adjustment endpoint.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use wopr_models::billing::{CreditTransaction, TransactionType};

use crate::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub tenant: String,
    pub balance_credits: i64,
}

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.ledger.balance(&tenant).await.map_err(ApiError::from)?;
    Ok(Json(BalanceResponse { tenant, balance_credits: balance.cents() }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<CreditTransaction>>, ApiError> {
    let history = state.ledger.history(&tenant, q.limit, q.offset).await.map_err(ApiError::from)?;
    Ok(Json(history))
}

#[derive(Debug, Deserialize)]
pub struct AdminCreditRequest {
    pub amount_credits: i64,
    pub reason: String,
}

/// Manual support/ops credit, e.g. a goodwill adjustment. Always a
/// `Correction` transaction so it's distinguishable from signup grants
/// and checkout top-ups in the ledger history.
pub async fn admin_credit(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Json(req): Json<AdminCreditRequest>,
) -> Result<Json<CreditTransaction>, ApiError> {
    if req.amount_credits <= 0 {
        return Err(ApiError::BadRequest("amount_credits must be positive".into()));
    }
    let tx = state
        .ledger
        .credit(
            &tenant,
            wopr_core::Credit::new(req.amount_credits),
            TransactionType::Correction,
            Some(req.reason),
            None,
            Some("admin".to_string()),
        )
        .await
        .map_err(ApiError::from)?;
    Ok(Json(tx))
}
