// [crates/wopr-fleet/src/orphan.rs]
//! Orphan Cleaner (C11). Cross-references the containers a node agent
//! actually reports against the authoritative bot-instance repository
//! and stops anything not recognised, then transitions the node back
//! to `active`.

use crate::connection_manager::OrphanCleanupTrigger;
use crate::errors::FleetError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use wopr_command_bus::CommandBus;
use wopr_db::repositories::bot_instance::BotInstanceStore;
use wopr_db::repositories::node::NodeStore;
use wopr_models::fleet::{Command, ContainerSnapshot, NodeStatus};

#[derive(Debug, Default)]
pub struct CleanReport {
    pub stopped: Vec<String>,
    pub kept: Vec<String>,
    pub errors: Vec<String>,
}

pub struct OrphanCleaner<B, N, C> {
    bots: Arc<B>,
    nodes: Arc<N>,
    bus: Arc<C>,
}

impl<B, N, C> OrphanCleaner<B, N, C>
where
    B: BotInstanceStore,
    N: NodeStore,
    C: CommandBus,
{
    pub fn new(bots: Arc<B>, nodes: Arc<N>, bus: Arc<C>) -> Self {
        Self { bots, nodes, bus }
    }

    pub async fn clean(
        &self,
        node_id: &str,
        running_containers: &[ContainerSnapshot],
    ) -> Result<CleanReport, FleetError> {
        let authoritative = self.bots.list_by_node(node_id).await?;
        let known_names: std::collections::HashSet<String> =
            authoritative.iter().map(|b| b.name.clone()).collect();

        let mut report = CleanReport::default();

        for container in running_containers {
            if known_names.contains(&container.name) {
                report.kept.push(container.name.clone());
                continue;
            }

            let bot_id = authoritative
                .iter()
                .find(|b| b.name == container.name)
                .map(|b| b.id)
                .unwrap_or_else(uuid::Uuid::new_v4);

            match self.bus.send(node_id, Command::BotStop { bot_id }).await {
                Ok(_) => {
                    info!("stopped stray container {} on node {}", container.name, node_id);
                    report.stopped.push(container.name.clone());
                }
                Err(e) => {
                    warn!("failed to stop stray container {} on {}: {}", container.name, node_id, e);
                    report.errors.push(format!("{}: {}", container.name, e));
                }
            }
        }

        self.nodes
            .transition(node_id, NodeStatus::Active, "orphan_cleanup_complete", "orphan-cleaner")
            .await?;

        Ok(report)
    }
}

#[async_trait]
impl<B, N, C> OrphanCleanupTrigger for OrphanCleaner<B, N, C>
where
    B: BotInstanceStore,
    N: NodeStore,
    C: CommandBus,
{
    async fn clean(&self, node_id: &str, running_containers: &[ContainerSnapshot]) {
        if let Err(e) = OrphanCleaner::clean(self, node_id, running_containers).await {
            warn!("orphan cleanup for {} failed: {}", node_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wopr_db::DbClient;
    use wopr_db::repositories::bot_instance::SqlBotInstanceStore;
    use wopr_db::repositories::node::SqlNodeStore;
    use wopr_models::bot::BillingState;
    use wopr_models::fleet::{CommandResult, Node};
    use chrono::Utc;

    struct FakeBus;

    #[async_trait]
    impl CommandBus for FakeBus {
        async fn send(
            &self,
            _node_host: &str,
            command: Command,
        ) -> Result<CommandResult, wopr_command_bus::BusError> {
            Ok(CommandResult { id: uuid::Uuid::new_v4(), command, success: true, error: None, data: None })
        }
    }

    #[tokio::test]
    async fn stray_container_is_stopped_and_known_one_is_kept() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let bots = Arc::new(SqlBotInstanceStore::new(db.clone()));
        let nodes = Arc::new(SqlNodeStore::new(db));
        let bus = Arc::new(FakeBus);

        let now = Utc::now();
        nodes
            .register(&Node {
                id: "n1".into(),
                host: "n1.internal".into(),
                status: NodeStatus::Returning,
                capacity_mb: 8192,
                used_mb: 0,
                agent_version: None,
                last_heartbeat_at: None,
                registered_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        bots.create(&wopr_models::bot::BotInstance {
            id: uuid::Uuid::new_v4(),
            tenant: "t1".into(),
            name: "known-bot".into(),
            node_id: Some("n1".into()),
            billing_state: BillingState::Active,
            suspended_at: None,
            destroy_after: None,
            resource_tier: "standard".into(),
            storage_tier: "standard".into(),
            created_by_user_id: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

        let cleaner = OrphanCleaner::new(bots, nodes.clone(), bus);
        let report = cleaner
            .clean(
                "n1",
                &[
                    ContainerSnapshot { name: "known-bot".into(), memory_mb: 128 },
                    ContainerSnapshot { name: "stray-container".into(), memory_mb: 64 },
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.kept, vec!["known-bot".to_string()]);
        assert_eq!(report.stopped, vec!["stray-container".to_string()]);

        let reloaded = nodes.get("n1").await.unwrap();
        assert_eq!(reloaded.status, NodeStatus::Active);
    }
}
