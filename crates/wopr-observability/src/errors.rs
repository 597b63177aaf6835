// [crates/wopr-observability/src/errors.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("[SOURCE]: {0}")]
    Source(String),
}
