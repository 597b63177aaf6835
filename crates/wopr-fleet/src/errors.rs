// [crates/wopr-fleet/src/errors.rs]
use thiserror::Error;
use wopr_command_bus::BusError;
use wopr_db::DbError;
use wopr_profile_store::ProfileStoreError;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("[NOT_FOUND]: {0}")]
    NotFound(String),

    #[error("[INVALID_TRANSITION]: {0}")]
    InvalidTransition(String),

    #[error("[NO_CAPACITY]: no active node has {required_mb}mb free")]
    NoCapacity { required_mb: u64 },

    #[error("[UPDATE_IN_PROGRESS]: update already in progress for bot {0}")]
    UpdateInProgress(uuid::Uuid),

    #[error("[DB]: {0}")]
    Db(#[from] DbError),

    #[error("[BUS]: {0}")]
    Bus(#[from] BusError),

    #[error("[PROFILE_STORE]: {0}")]
    ProfileStore(#[from] ProfileStoreError),
}
