// [crates/wopr-gateway/src/errors.rs]
use chrono::{DateTime, Utc};
use thiserror::Error;
use wopr_billing::BillingError;
use wopr_db::DbError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("[AUTH_REQUIRED]: missing or unrecognised bearer token")]
    AuthRequired,

    #[error("[ACCOUNT_SUSPENDED]: account is suspended")]
    AccountSuspended,

    #[error("[ACCOUNT_BANNED]: account is banned")]
    AccountBanned,

    #[error("[SPENDING_CAP_EXCEEDED]: {cap_type} cap exceeded ({current_spend_usd} >= {cap_usd})")]
    SpendingCapExceeded { cap_type: &'static str, current_spend_usd: f64, cap_usd: f64 },

    #[error("[INSUFFICIENT_BALANCE]: balance below the minimum runtime floor")]
    InsufficientBalance,

    #[error("[CIRCUIT_TRIPPED]: paused until {paused_until}")]
    CircuitTripped { retry_after_s: u64, paused_until: DateTime<Utc> },

    #[error("[CREDENTIAL_MISSING]: no upstream credential on file for {0}")]
    CredentialMissing(String),

    #[error("[UPSTREAM]: {0}")]
    Upstream(String),

    #[error("[DB]: {0}")]
    Db(#[from] DbError),

    #[error("[BILLING]: {0}")]
    Billing(#[from] BillingError),
}
