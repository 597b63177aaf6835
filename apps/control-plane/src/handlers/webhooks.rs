// [apps/control-plane/src/handlers/webhooks.rs]
//! Payment processor webhook receipt. Signature verification needs the
//! raw request body, so this takes `Bytes` rather than a parsed `Json`
//! extractor and parses only after authentication succeeds.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;

use wopr_billing::CheckoutSessionEvent;

use crate::errors::ApiError;
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-processor-signature";

pub async fn receive(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {SIGNATURE_HEADER} header")))?;

    state.webhooks.authenticate(&addr.ip().to_string(), &body, signature).await.map_err(ApiError::from)?;

    let event: CheckoutSessionEvent =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("malformed webhook payload: {e}")))?;

    let outcome = state.webhooks.handle_checkout_completed(&event).await.map_err(ApiError::from)?;

    Ok(Json(serde_json::json!({
        "handled": outcome.handled,
        "tenant": outcome.tenant,
        "credited_cents": outcome.credited_cents,
    })))
}
