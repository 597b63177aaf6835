// [crates/wopr-command-bus/src/errors.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("[NETWORK]: failed to reach node agent: {0}")]
    Network(#[from] reqwest::Error),

    #[error("[TIMEOUT]: command did not ack within the deadline")]
    Timeout,

    #[error("[REJECTED]: node agent returned status {0}")]
    Rejected(u16),

    #[error("[DECODE]: malformed ack payload: {0}")]
    Decode(#[from] serde_json::Error),
}
