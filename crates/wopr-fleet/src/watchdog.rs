// [crates/wopr-fleet/src/watchdog.rs]
//! Heartbeat Watchdog (C9). Periodic scan that advances node state on
//! missed heartbeats and fires the recovery callback out-of-band.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};
use wopr_db::repositories::node::NodeStore;
use wopr_models::fleet::{NodeStatus, RecoveryTrigger};

#[async_trait]
pub trait RecoveryInvoker: Send + Sync {
    async fn trigger_recovery(&self, node_id: &str, trigger: RecoveryTrigger);
}

pub struct WatchdogConfig {
    pub scan_interval: Duration,
    pub unhealthy_threshold: Duration,
    pub offline_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            unhealthy_threshold: Duration::from_secs(90),
            offline_threshold: Duration::from_secs(300),
        }
    }
}

pub struct HeartbeatWatchdog<N> {
    nodes: Arc<N>,
    recovery: Arc<dyn RecoveryInvoker>,
    config: WatchdogConfig,
}

impl<N> HeartbeatWatchdog<N>
where
    N: NodeStore + 'static,
{
    pub fn new(nodes: Arc<N>, recovery: Arc<dyn RecoveryInvoker>, config: WatchdogConfig) -> Self {
        Self { nodes, recovery, config }
    }

    #[instrument(skip(self))]
    pub async fn tick(&self) {
        let nodes = match self.nodes.list().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("watchdog failed to list nodes: {}", e);
                return;
            }
        };

        for node in nodes {
            if !matches!(node.status, NodeStatus::Active | NodeStatus::Unhealthy) {
                continue;
            }
            let Some(last_heartbeat) = node.last_heartbeat_at else {
                continue;
            };

            let elapsed = Utc::now().signed_duration_since(last_heartbeat);
            let elapsed = match elapsed.to_std() {
                Ok(d) => d,
                Err(_) => Duration::ZERO,
            };

            match node.status {
                NodeStatus::Active if elapsed >= self.config.unhealthy_threshold => {
                    if let Err(e) = self
                        .nodes
                        .transition(&node.id, NodeStatus::Unhealthy, "heartbeat_timeout", "watchdog")
                        .await
                    {
                        warn!("watchdog transition to unhealthy failed for {}: {}", node.id, e);
                    } else {
                        info!("node {} marked unhealthy after {:?} without a heartbeat", node.id, elapsed);
                    }
                }
                NodeStatus::Unhealthy if elapsed >= self.config.offline_threshold => {
                    if let Err(e) = self
                        .nodes
                        .transition(&node.id, NodeStatus::Offline, "heartbeat_timeout", "watchdog")
                        .await
                    {
                        warn!("watchdog transition to offline failed for {}: {}", node.id, e);
                        continue;
                    }
                    info!("node {} marked offline, triggering recovery", node.id);
                    let recovery = self.recovery.clone();
                    let node_id = node.id.clone();
                    tokio::spawn(async move {
                        recovery.trigger_recovery(&node_id, RecoveryTrigger::HeartbeatTimeout).await;
                    });
                }
                _ => {}
            }
        }
    }

    /// Runs `tick` on `config.scan_interval` until the returned handle
    /// is aborted. Missed ticks never pile up (`Skip`).
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.scan_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wopr_db::repositories::node::SqlNodeStore;
    use wopr_db::DbClient;
    use wopr_models::fleet::Node;

    struct CountingRecoveryTrigger(Arc<AtomicUsize>);

    #[async_trait]
    impl RecoveryInvoker for CountingRecoveryTrigger {
        async fn trigger_recovery(&self, _node_id: &str, _trigger: RecoveryTrigger) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stale_node(id: &str, status: NodeStatus, seconds_since_heartbeat: i64) -> Node {
        let now = Utc::now();
        Node {
            id: id.to_string(),
            host: format!("{id}.internal"),
            status,
            capacity_mb: 4096,
            used_mb: 0,
            agent_version: None,
            last_heartbeat_at: Some(now - ChronoDuration::seconds(seconds_since_heartbeat)),
            registered_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn active_node_past_threshold_becomes_unhealthy() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let nodes = Arc::new(SqlNodeStore::new(db));
        nodes.register(&stale_node("n1", NodeStatus::Active, 120)).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let watchdog = HeartbeatWatchdog::new(
            nodes.clone(),
            Arc::new(CountingRecoveryTrigger(counter.clone())),
            WatchdogConfig::default(),
        );
        watchdog.tick().await;

        assert_eq!(nodes.get("n1").await.unwrap().status, NodeStatus::Unhealthy);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unhealthy_node_past_offline_threshold_triggers_recovery() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let nodes = Arc::new(SqlNodeStore::new(db));
        nodes.register(&stale_node("n1", NodeStatus::Unhealthy, 400)).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let watchdog = HeartbeatWatchdog::new(
            nodes.clone(),
            Arc::new(CountingRecoveryTrigger(counter.clone())),
            WatchdogConfig::default(),
        );
        watchdog.tick().await;
        // recovery is fire-and-forget; give the spawned task a beat to run
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(nodes.get("n1").await.unwrap().status, NodeStatus::Offline);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
