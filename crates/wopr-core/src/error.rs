// [crates/wopr-core/src/error.rs]
//! Core error taxonomy (§7). Domain crates either use `CoreError`
//! directly or wrap it in a crate-local `thiserror` enum via `#[from]`
//! when they need extra variants.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("[VALIDATION]: {0}")]
    Validation(String),

    #[error("[AUTH_REQUIRED]: missing or unverifiable principal")]
    AuthRequired,

    #[error("[FORBIDDEN]: {0}")]
    Forbidden(String),

    #[error("[NOT_FOUND]: {0}")]
    NotFound(String),

    #[error("[CONFLICT]: {0}")]
    Conflict(String),

    #[error("[INSUFFICIENT_CREDITS]: debit would drive balance negative")]
    InsufficientCredits,

    #[error("[INVALID_TRANSITION]: {0}")]
    InvalidTransition(String),

    #[error("[UPSTREAM_FAILURE]: {0}")]
    UpstreamFailure(String),

    #[error("[TRANSIENT]: {0}")]
    Transient(String),

    #[error("[FATAL]: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Whether a background worker's retry loop should attempt this
    /// operation again on its next cadence (§7 propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::UpstreamFailure(_))
    }
}
