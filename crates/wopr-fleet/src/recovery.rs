// [crates/wopr-fleet/src/recovery.rs]
//! Recovery Orchestrator (C10). Moves every bot assigned to a dead node
//! onto a healthy target, tracked as a `RecoveryEvent` with one
//! `RecoveryItem` per tenant bot.

use crate::errors::FleetError;
use crate::placement::find_placement;
use crate::watchdog::RecoveryInvoker;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use wopr_command_bus::CommandBus;
use wopr_db::repositories::bot_instance::BotInstanceStore;
use wopr_db::repositories::node::NodeStore;
use wopr_db::repositories::recovery::RecoveryStore;
use wopr_models::fleet::{
    Command, RecoveryEvent, RecoveryItem, RecoveryItemStatus, RecoveryStatus, RecoveryTrigger,
};
use wopr_profile_store::ProfileStore;

const DEFAULT_IMAGE: &str = "ghcr.io/wopr/bot-default:latest";

pub struct RecoveryOrchestrator<N, B, R, C> {
    nodes: Arc<N>,
    bots: Arc<B>,
    recovery: Arc<R>,
    bus: Arc<C>,
    profiles: Arc<ProfileStore>,
}

impl<N, B, R, C> RecoveryOrchestrator<N, B, R, C>
where
    N: NodeStore,
    B: BotInstanceStore,
    R: RecoveryStore,
    C: CommandBus,
{
    pub fn new(nodes: Arc<N>, bots: Arc<B>, recovery: Arc<R>, bus: Arc<C>, profiles: Arc<ProfileStore>) -> Self {
        Self { nodes, bots, recovery, bus, profiles }
    }

    #[instrument(skip(self))]
    pub async fn trigger_recovery(
        &self,
        dead_node: &str,
        trigger: RecoveryTrigger,
    ) -> Result<RecoveryEvent, FleetError> {
        self.nodes
            .transition(dead_node, wopr_models::fleet::NodeStatus::Unhealthy, "heartbeat_timeout", "recovery")
            .await
            .ok();
        self.nodes
            .transition(dead_node, wopr_models::fleet::NodeStatus::Offline, "heartbeat_timeout", "recovery")
            .await?;
        self.nodes
            .transition(dead_node, wopr_models::fleet::NodeStatus::Recovering, "heartbeat_timeout", "recovery")
            .await?;

        // Tenant-tier ordering is the caller's responsibility (§9); here
        // we preserve whatever order `list_by_node` returns, which a
        // higher layer may pre-sort by `TenantTier`.
        let tenants_result = self.bots.list_by_node(dead_node).await;
        let tenants = match tenants_result {
            Ok(t) => t,
            Err(e) => {
                self.nodes
                    .transition(dead_node, wopr_models::fleet::NodeStatus::Offline, "recovery_setup_failed", "recovery")
                    .await
                    .ok();
                return Err(e.into());
            }
        };

        let event = RecoveryEvent {
            id: Uuid::new_v4(),
            node: dead_node.to_string(),
            trigger,
            status: RecoveryStatus::InProgress,
            tenants_total: tenants.len() as u32,
            tenants_recovered: 0,
            tenants_failed: 0,
            tenants_waiting: tenants.len() as u32,
            started_at: Utc::now(),
            completed_at: None,
            report: String::new(),
        };
        if let Err(e) = self.recovery.create_event(&event).await {
            self.nodes
                .transition(dead_node, wopr_models::fleet::NodeStatus::Offline, "recovery_setup_failed", "recovery")
                .await
                .ok();
            return Err(e.into());
        }

        for bot in &tenants {
            self.recover_tenant(&event, bot, dead_node).await;
        }

        self.nodes
            .transition(dead_node, wopr_models::fleet::NodeStatus::Offline, "recovery_complete", "recovery")
            .await?;

        self.finalize_event(event.id).await
    }

    async fn recover_tenant(
        &self,
        event: &RecoveryEvent,
        bot: &wopr_models::bot::BotInstance,
        dead_node: &str,
    ) {
        let required_mb = 256u64; // conservative default when no per-bot reservation is tracked
        let target = match self.find_best_target(dead_node, required_mb).await {
            Some(node) => node,
            None => {
                self.write_item(event.id, bot, dead_node, RecoveryItemStatus::Waiting, Some("no_capacity".into()))
                    .await;
                return;
            }
        };

        if let Err(e) = self.bus.send(&target.host, Command::BackupDownload { bot_id: bot.id }).await {
            self.write_item(event.id, bot, dead_node, RecoveryItemStatus::Failed, Some(e.to_string())).await;
            return;
        }

        let (image, env) = match self.profiles.get(bot.id).await {
            Ok(profile) => (profile.image, profile.env),
            Err(_) => {
                warn!("no profile for bot {}, using default image", bot.id);
                (DEFAULT_IMAGE.to_string(), Default::default())
            }
        };

        let import_result = self
            .bus
            .send(&target.host, Command::BotImport { bot_id: bot.id, image, env })
            .await;
        if let Err(e) = import_result {
            self.write_item(event.id, bot, dead_node, RecoveryItemStatus::Failed, Some(e.to_string())).await;
            return;
        }

        if let Err(e) = self.bus.send(&target.host, Command::BotInspect { bot_id: bot.id }).await {
            self.compensate_remove(&target.host, bot.id).await;
            self.write_item(event.id, bot, dead_node, RecoveryItemStatus::Failed, Some(e.to_string())).await;
            return;
        }

        if let Err(e) = self.bots.reassign(bot.id, Some(&target.id)).await {
            self.compensate_remove(&target.host, bot.id).await;
            self.write_item(event.id, bot, dead_node, RecoveryItemStatus::Failed, Some(e.to_string())).await;
            return;
        }
        self.nodes.record_heartbeat(&target.id, target.used_mb + required_mb).await.ok();

        let item = RecoveryItem {
            id: Uuid::new_v4(),
            event: event.id,
            tenant: bot.tenant.clone(),
            source_node: dead_node.to_string(),
            target_node: Some(target.id.clone()),
            backup_key: format!("backups/{}/latest.tar", bot.tenant),
            status: RecoveryItemStatus::Recovered,
            reason: None,
            retry_count: 0,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
        };
        if let Err(e) = self.recovery.create_item(&item).await {
            error!("failed to record recovery item for bot {}: {}", bot.id, e);
        }
        info!("recovered bot {} from {} to {}", bot.id, dead_node, target.id);
    }

    async fn compensate_remove(&self, target_host: &str, bot_id: Uuid) {
        if let Err(e) = self.bus.send(target_host, Command::BotRemove { bot_id }).await {
            warn!("compensating bot.remove for {} on {} failed (best effort): {}", bot_id, target_host, e);
        }
    }

    async fn find_best_target(&self, excluding: &str, required_mb: u64) -> Option<wopr_models::fleet::Node> {
        let nodes = self.nodes.placement_candidates(required_mb).await.ok()?;
        let candidates: Vec<_> = nodes.into_iter().filter(|n| n.id != excluding).collect();
        find_placement(&candidates, required_mb).cloned()
    }

    async fn write_item(
        &self,
        event_id: Uuid,
        bot: &wopr_models::bot::BotInstance,
        source_node: &str,
        status: RecoveryItemStatus,
        reason: Option<String>,
    ) {
        let item = RecoveryItem {
            id: Uuid::new_v4(),
            event: event_id,
            tenant: bot.tenant.clone(),
            source_node: source_node.to_string(),
            target_node: None,
            backup_key: format!("backups/{}/latest.tar", bot.tenant),
            status,
            reason,
            retry_count: 0,
            started_at: Utc::now(),
            completed_at: if status == RecoveryItemStatus::Waiting { None } else { Some(Utc::now()) },
        };
        if let Err(e) = self.recovery.create_item(&item).await {
            error!("failed to record recovery item for bot {}: {}", bot.id, e);
        }
    }

    async fn finalize_event(&self, event_id: Uuid) -> Result<RecoveryEvent, FleetError> {
        let items = self.recovery.items_for_event(event_id).await?;
        let waiting = items.iter().filter(|i| i.status == RecoveryItemStatus::Waiting).count();
        let recovered = items.iter().filter(|i| i.status == RecoveryItemStatus::Recovered).count();
        let failed = items.iter().filter(|i| i.status == RecoveryItemStatus::Failed).count();

        let status = if waiting > 0 {
            RecoveryStatus::Partial
        } else if recovered == 0 && failed > 0 {
            RecoveryStatus::Failed
        } else {
            RecoveryStatus::Completed
        };

        let report = format!("{recovered} recovered, {failed} failed, {waiting} waiting");
        self.recovery.update_event_status(event_id, status, &report).await?;
        self.recovery.get_event(event_id).await.map_err(FleetError::from)
    }

    /// Re-runs step 4 for items still `waiting`.
    pub async fn retry_waiting(&self, event_id: Uuid) -> Result<RecoveryEvent, FleetError> {
        let event = self.recovery.get_event(event_id).await?;
        let items = self.recovery.items_for_event(event_id).await?;

        for item in items.into_iter().filter(|i| i.status == RecoveryItemStatus::Waiting) {
            let bot = match self.bots.list_by_tenant(&item.tenant).await {
                Ok(bots) => bots.into_iter().next(),
                Err(e) => {
                    warn!("retry_waiting: failed to look up tenant {} bot: {}", item.tenant, e);
                    None
                }
            };
            let Some(bot) = bot else {
                // Tenant has no bot row left to retry against (e.g. deleted since).
                self.recovery
                    .update_item(item.id, RecoveryItemStatus::Failed, Some("tenant_bot_not_found".into()))
                    .await?;
                continue;
            };

            let required_mb = 256u64;
            match self.find_best_target(&item.source_node, required_mb).await {
                Some(target) => {
                    let (image, env) = match self.profiles.get(bot.id).await {
                        Ok(profile) => (profile.image, profile.env),
                        Err(_) => {
                            warn!("no profile for bot {}, using default image", bot.id);
                            (DEFAULT_IMAGE.to_string(), Default::default())
                        }
                    };
                    let outcome = self
                        .bus
                        .send(&target.host, Command::BotImport { bot_id: bot.id, image, env })
                        .await;
                    match outcome {
                        Ok(_) => {
                            self.bots.reassign(bot.id, Some(&target.id)).await?;
                            self.recovery
                                .update_item(item.id, RecoveryItemStatus::Recovered, None)
                                .await?;
                        }
                        Err(e) => {
                            self.recovery
                                .update_item(item.id, RecoveryItemStatus::Failed, Some(e.to_string()))
                                .await?;
                        }
                    }
                }
                None => {
                    self.recovery.increment_item_retry(item.id).await?;
                }
            }
        }

        self.finalize_event(event.id).await
    }
}

#[async_trait]
impl<N, B, R, C> RecoveryInvoker for RecoveryOrchestrator<N, B, R, C>
where
    N: NodeStore,
    B: BotInstanceStore,
    R: RecoveryStore,
    C: CommandBus,
{
    async fn trigger_recovery(&self, node_id: &str, trigger: RecoveryTrigger) {
        if let Err(e) = RecoveryOrchestrator::trigger_recovery(self, node_id, trigger).await {
            error!("recovery for node {} failed: {}", node_id, e);
        }
    }
}
