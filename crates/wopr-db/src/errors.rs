// [crates/wopr-db/src/errors.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("[DB_CONNECTION]: {0}")]
    Connection(String),

    #[error("[DB_CONFIG]: {0}")]
    Configuration(String),

    #[error("[DB_QUERY]: {0}")]
    Query(#[from] libsql::Error),

    #[error("[DB_MAPPING]: {0}")]
    Mapping(String),

    #[error("[NOT_FOUND]: {0}")]
    NotFound(String),

    #[error("[CONFLICT]: {0}")]
    Conflict(String),

    #[error("[INSUFFICIENT_CREDITS]")]
    InsufficientCredits,

    #[error("[INVALID_TRANSITION]: {0}")]
    InvalidTransition(String),
}
