// [crates/wopr-billing/src/errors.rs]
use thiserror::Error;
use wopr_db::DbError;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("[INSUFFICIENT_CREDITS]: debit would drive balance negative")]
    InsufficientCredits,

    #[error("[INVALID_TRANSITION]: {0}")]
    InvalidTransition(String),

    #[error("[VALIDATION]: {0}")]
    Validation(String),

    #[error("[NOT_FOUND]: {0}")]
    NotFound(String),

    #[error("[DB]: {0}")]
    Db(#[from] DbError),
}

impl From<BillingError> for wopr_core::CoreError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::InsufficientCredits => wopr_core::CoreError::InsufficientCredits,
            BillingError::InvalidTransition(m) => wopr_core::CoreError::InvalidTransition(m),
            BillingError::Validation(m) => wopr_core::CoreError::Validation(m),
            BillingError::NotFound(m) => wopr_core::CoreError::NotFound(m),
            BillingError::Db(e) => wopr_core::CoreError::Transient(e.to_string()),
        }
    }
}
