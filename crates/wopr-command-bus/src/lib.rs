// [crates/wopr-command-bus/src/lib.rs]
//! =================================================================
//! Node Command Bus (C6).
//!
//! Delivers a typed `Command` to a node agent and awaits its ack
//! within a bounded deadline. The trait is the seam the rest of the
//! fleet crate consumes; `HttpCommandBus` is the only production
//! implementation, grounded in the request/response shape of this
//! workspace's worker uplink client.
//! =================================================================

pub mod errors;
pub mod http;

pub use errors::BusError;

use async_trait::async_trait;
use wopr_models::fleet::{Command, CommandResult};

#[async_trait]
pub trait CommandBus: Send + Sync {
    async fn send(&self, node_host: &str, command: Command) -> Result<CommandResult, BusError>;
}

pub use http::HttpCommandBus;
