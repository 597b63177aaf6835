// [apps/control-plane/src/handlers/gateway.rs]
//! The metered inference proxy. Runs preflight, forwards the caller's
//! body to the upstream provider unmodified, reads usage back out of
//! the provider's own response shape, and meters exactly once.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use wopr_gateway::{GatewayError, SpendingCaps, UpstreamUsage};

use crate::errors::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiStyleResponse {
    model: Option<String>,
    usage: Option<OpenAiUsage>,
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Gateway(GatewayError::AuthRequired))
}

/// `POST /v1/gateway/{provider}/chat/completions` — the one capability
/// wired end to end; additional capabilities reuse the same preflight
/// and meter calls with a different upstream path and usage parser.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bearer = extract_bearer(&headers)?;
    let caps = SpendingCaps::default();

    let ctx = state.gateway.preflight(bearer, &provider, caps).await.map_err(ApiError::Gateway)?;

    let base_url = state
        .config
        .provider_base_urls
        .get(&provider)
        .ok_or_else(|| ApiError::Gateway(GatewayError::CredentialMissing(provider.clone())))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .user_agent("wopr-control-plane/gateway")
        .build()
        .expect("reqwest client must build with static config");

    let upstream = client
        .post(format!("{base_url}/v1/chat/completions"))
        .bearer_auth(&ctx.credential)
        .json(&body.0)
        .send()
        .await
        .map_err(|e| ApiError::Gateway(GatewayError::Upstream(e.to_string())))?;

    if !upstream.status().is_success() {
        let status = upstream.status();
        let text = upstream.text().await.unwrap_or_default();
        return Err(ApiError::Gateway(GatewayError::Upstream(format!("{status}: {text}"))));
    }

    let parsed: serde_json::Value =
        upstream.json().await.map_err(|e| ApiError::Gateway(GatewayError::Upstream(e.to_string())))?;
    let typed: OpenAiStyleResponse =
        serde_json::from_value(parsed.clone()).map_err(|e| ApiError::Gateway(GatewayError::Upstream(e.to_string())))?;

    let usage = match typed.usage {
        Some(u) => UpstreamUsage { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens, cost_credits_header: None },
        None => UpstreamUsage::default(),
    };

    let rates = state.rate_lookup.rate_for(&provider, "chat.completions", typed.model.as_deref());
    let meter_response = state
        .gateway
        .meter(&ctx, &provider, "chat.completions", typed.model.as_deref(), usage, &rates)
        .await
        .map_err(ApiError::Gateway)?;

    state.metrics.record_gateway_request(false);

    let mut response = parsed;
    if let Some(obj) = response.as_object_mut() {
        obj.insert("wopr_meter_event_id".to_string(), serde_json::json!(meter_response.meter_event_id));
        obj.insert("wopr_charge_credits".to_string(), serde_json::json!(meter_response.charge_credits.cents()));
    }

    Ok(Json(response))
}
