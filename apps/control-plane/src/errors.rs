// [apps/control-plane/src/errors.rs]
//! Maps every domain error type (§7's taxonomy, realised per crate) onto
//! an HTTP response. This is the one place the boundary between
//! `Result`-returning domain logic and axum's `IntoResponse` is crossed.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use wopr_billing::BillingError;
use wopr_command_bus::BusError;
use wopr_core::CoreError;
use wopr_db::DbError;
use wopr_fleet::FleetError;
use wopr_gateway::GatewayError;
use wopr_profile_store::ProfileStoreError;
use wopr_vault::VaultError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("{0}")]
    Billing(#[from] BillingError),
    #[error("{0}")]
    Fleet(#[from] FleetError),
    #[error("{0}")]
    Gateway(#[from] GatewayError),
    #[error("{0}")]
    Db(#[from] DbError),
    #[error("{0}")]
    ProfileStore(#[from] ProfileStoreError),
    #[error("{0}")]
    Vault(#[from] VaultError),
    #[error("{0}")]
    Bus(#[from] BusError),
    #[error("{0}")]
    BadRequest(String),
}

fn db_error_parts(e: &DbError) -> (StatusCode, String) {
    match e {
        DbError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
        DbError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
        DbError::InsufficientCredits => (StatusCode::PAYMENT_REQUIRED, "insufficient_credits".into()),
        DbError::InvalidTransition(m) => (StatusCode::CONFLICT, m.clone()),
        DbError::Connection(_) | DbError::Configuration(_) | DbError::Query(_) | DbError::Mapping(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal storage error".into())
        }
    }
}

fn core_error_parts(e: &CoreError) -> (StatusCode, String) {
    match e {
        CoreError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
        CoreError::AuthRequired => (StatusCode::UNAUTHORIZED, "authentication required".into()),
        CoreError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
        CoreError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
        CoreError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
        CoreError::InsufficientCredits => (StatusCode::PAYMENT_REQUIRED, "insufficient_credits".into()),
        CoreError::InvalidTransition(m) => (StatusCode::CONFLICT, m.clone()),
        CoreError::UpstreamFailure(m) => (StatusCode::BAD_GATEWAY, m.clone()),
        CoreError::Transient(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
        CoreError::Fatal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
    }
}

fn billing_error_parts(e: &BillingError) -> (StatusCode, String) {
    match e {
        BillingError::InsufficientCredits => (StatusCode::PAYMENT_REQUIRED, "insufficient_credits".into()),
        BillingError::InvalidTransition(m) => (StatusCode::CONFLICT, m.clone()),
        BillingError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
        BillingError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
        BillingError::Db(db) => db_error_parts(db),
    }
}

fn fleet_error_parts(e: &FleetError) -> (StatusCode, String) {
    match e {
        FleetError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
        FleetError::InvalidTransition(m) => (StatusCode::CONFLICT, m.clone()),
        FleetError::NoCapacity { required_mb } => {
            (StatusCode::CONFLICT, format!("no node has {required_mb}MB of free capacity"))
        }
        FleetError::UpdateInProgress(id) => (StatusCode::CONFLICT, format!("update already in progress for {id}")),
        FleetError::Db(db) => db_error_parts(db),
        FleetError::Bus(bus) => bus_error_parts(bus),
        FleetError::ProfileStore(ps) => profile_store_error_parts(ps),
    }
}

fn profile_store_error_parts(e: &ProfileStoreError) -> (StatusCode, String) {
    match e {
        ProfileStoreError::InvalidId(m) => (StatusCode::BAD_REQUEST, m.clone()),
        ProfileStoreError::PathEscape => (StatusCode::BAD_REQUEST, "invalid profile id".into()),
        ProfileStoreError::NotFound(id) => (StatusCode::NOT_FOUND, format!("bot profile {id} not found")),
        ProfileStoreError::Io(_) | ProfileStoreError::Serialization(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "profile store error".into())
        }
    }
}

fn vault_error_parts(e: &VaultError) -> (StatusCode, String) {
    match e {
        VaultError::EmptySecret => (StatusCode::BAD_REQUEST, "empty secret".into()),
        VaultError::EncryptFailed | VaultError::DecryptFailed => {
            (StatusCode::INTERNAL_SERVER_ERROR, "vault operation failed".into())
        }
        VaultError::Serialization(_) | VaultError::Encoding(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "vault encoding error".into())
        }
    }
}

fn bus_error_parts(e: &BusError) -> (StatusCode, String) {
    match e {
        BusError::Network(_) => (StatusCode::BAD_GATEWAY, "node agent unreachable".into()),
        BusError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "node agent command timed out".into()),
        BusError::Rejected(code) => (StatusCode::BAD_GATEWAY, format!("node agent rejected command ({code})")),
        BusError::Decode(_) => (StatusCode::BAD_GATEWAY, "malformed node agent response".into()),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Core(e) => {
                let (status, message) = core_error_parts(e);
                (status, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Billing(e) => {
                let (status, message) = billing_error_parts(e);
                (status, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Fleet(e) => {
                let (status, message) = fleet_error_parts(e);
                (status, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Db(e) => {
                let (status, message) = db_error_parts(e);
                (status, Json(json!({ "error": message }))).into_response()
            }
            ApiError::ProfileStore(e) => {
                let (status, message) = profile_store_error_parts(e);
                (status, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Vault(e) => {
                let (status, message) = vault_error_parts(e);
                (status, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Bus(e) => {
                let (status, message) = bus_error_parts(e);
                (status, Json(json!({ "error": message }))).into_response()
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response(),
            ApiError::Gateway(e) => gateway_response(e),
        }
    }
}

/// The gateway's error shapes are specced literally (§6), so they get
/// their own response bodies rather than the generic `{error}` envelope.
fn gateway_response(e: &GatewayError) -> Response {
    match e {
        GatewayError::AuthRequired => {
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": "auth_required" }))).into_response()
        }
        GatewayError::AccountSuspended => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "account_suspended", "message": "account is suspended" })),
        )
            .into_response(),
        GatewayError::AccountBanned => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "account_banned", "message": "account is banned" })),
        )
            .into_response(),
        GatewayError::SpendingCapExceeded { cap_type, current_spend_usd, cap_usd } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({
                "error": {
                    "code": "spending_cap_exceeded",
                    "cap_type": cap_type,
                    "current_spend_usd": current_spend_usd,
                    "cap_usd": cap_usd,
                }
            })),
        )
            .into_response(),
        GatewayError::InsufficientBalance => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({ "error": "insufficient_balance" })),
        )
            .into_response(),
        GatewayError::CircuitTripped { retry_after_s, paused_until } => {
            let body = Json(json!({
                "error": {
                    "message": "circuit breaker tripped",
                    "type": "rate_limit_error",
                    "code": "circuit_breaker_tripped",
                    "paused_until": paused_until,
                }
            }));
            let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_s.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
        GatewayError::CredentialMissing(provider) => (
            StatusCode::FAILED_DEPENDENCY,
            Json(json!({ "error": "credential_missing", "provider": provider })),
        )
            .into_response(),
        GatewayError::Upstream(message) => {
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": "upstream_failure", "message": message }))).into_response()
        }
        GatewayError::Db(db) => {
            let (status, message) = db_error_parts(db);
            (status, Json(json!({ "error": message }))).into_response()
        }
        GatewayError::Billing(billing) => {
            let (status, message) = billing_error_parts(billing);
            (status, Json(json!({ "error": message }))).into_response()
        }
    }
}
