// [crates/wopr-command-bus/src/http.rs]
//! HTTP-backed `CommandBus`. Every node agent exposes a single
//! `/agent/command` endpoint that accepts a `Command` and replies with
//! a `CommandResult` once the operation completes (or fails) locally.

use crate::{BusError, CommandBus};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use wopr_models::fleet::{Command, CommandResult};

pub struct HttpCommandBus {
    client: Client,
    bearer_token: String,
    deadline: Duration,
}

impl HttpCommandBus {
    pub fn new(bearer_token: String, deadline: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(deadline)
                .user_agent("wopr-control-plane/command-bus")
                .build()
                .expect("reqwest client must build with static config"),
            bearer_token,
            deadline,
        }
    }
}

#[async_trait]
impl CommandBus for HttpCommandBus {
    #[instrument(skip(self, command), fields(deadline_ms = self.deadline.as_millis()))]
    async fn send(&self, node_host: &str, command: Command) -> Result<CommandResult, BusError> {
        let url = format!("https://{node_host}/agent/command");

        let response = tokio::time::timeout(
            self.deadline,
            self.client
                .post(&url)
                .bearer_auth(&self.bearer_token)
                .json(&command)
                .send(),
        )
        .await
        .map_err(|_| BusError::Timeout)??;

        if !response.status().is_success() {
            warn!("node agent at {} rejected command: {}", node_host, response.status());
            return Err(BusError::Rejected(response.status().as_u16()));
        }

        let result: CommandResult = response.json().await.map_err(BusError::Network)?;
        debug!(command_id = %result.id, success = result.success, "command acked");
        Ok(result)
    }
}

/// Builds a successful ack locally — used by the orchestrator when a
/// step is purely informational and there is nothing to await.
pub fn synthetic_ack(command: Command) -> CommandResult {
    CommandResult { id: Uuid::new_v4(), command, success: true, error: None, data: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_ack_is_always_success() {
        let ack = synthetic_ack(Command::BotInspect { bot_id: Uuid::nil() });
        assert!(ack.success);
        assert!(ack.error.is_none());
    }
}
