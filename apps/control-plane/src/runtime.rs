// [apps/control-plane/src/runtime.rs]
//! `FleetRuntime` backed by the node command bus: resolves a bot's
//! current node, then dispatches the corresponding `Command`. Pulling
//! is folded into `bot.import` on the node agent side, so `pull` here
//! is a pre-flight no-op rather than a separate round trip.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use wopr_command_bus::CommandBus;
use wopr_db::repositories::bot_instance::BotInstanceStore;
use wopr_db::repositories::node::NodeStore;
use wopr_fleet::{FleetError, FleetRuntime, Health, InspectResult};
use wopr_models::fleet::Command;

pub struct CommandBusFleetRuntime<B, N, C> {
    bots: Arc<B>,
    nodes: Arc<N>,
    bus: Arc<C>,
}

impl<B, N, C> CommandBusFleetRuntime<B, N, C>
where
    B: BotInstanceStore,
    N: NodeStore,
    C: CommandBus,
{
    pub fn new(bots: Arc<B>, nodes: Arc<N>, bus: Arc<C>) -> Self {
        Self { bots, nodes, bus }
    }

    async fn host_for(&self, bot_id: Uuid) -> Result<String, FleetError> {
        let bot = self.bots.get(bot_id).await?;
        let node_id = bot
            .node_id
            .ok_or_else(|| FleetError::NotFound(format!("bot {bot_id} is not assigned to a node")))?;
        Ok(self.nodes.get(&node_id).await?.host)
    }
}

#[derive(Deserialize)]
struct InspectPayload {
    running_digest: Option<String>,
    #[serde(default)]
    health: String,
}

fn parse_health(raw: &str) -> Health {
    match raw {
        "healthy" => Health::Healthy,
        "starting" => Health::Starting,
        "unhealthy" => Health::Unhealthy,
        _ => Health::NoHealthCheck,
    }
}

#[async_trait]
impl<B, N, C> FleetRuntime for CommandBusFleetRuntime<B, N, C>
where
    B: BotInstanceStore,
    N: NodeStore,
    C: CommandBus,
{
    async fn inspect(&self, bot_id: Uuid) -> Result<InspectResult, FleetError> {
        let host = self.host_for(bot_id).await?;
        let result = self.bus.send(&host, Command::BotInspect { bot_id }).await?;
        let payload: InspectPayload = match result.data {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| FleetError::NotFound(format!("malformed inspect payload for {bot_id}: {e}")))?,
            None => InspectPayload { running_digest: None, health: String::new() },
        };
        Ok(InspectResult { running_digest: payload.running_digest, health: parse_health(&payload.health) })
    }

    async fn pull(&self, _image: &str) -> Result<(), FleetError> {
        Ok(())
    }

    async fn update_image(&self, bot_id: Uuid, image: &str) -> Result<(), FleetError> {
        let host = self.host_for(bot_id).await?;
        self.bus
            .send(&host, Command::BotImport { bot_id, image: image.to_string(), env: Default::default() })
            .await?;
        Ok(())
    }

    async fn start(&self, bot_id: Uuid) -> Result<(), FleetError> {
        let host = self.host_for(bot_id).await?;
        self.bus.send(&host, Command::BotStart { bot_id }).await?;
        Ok(())
    }
}
