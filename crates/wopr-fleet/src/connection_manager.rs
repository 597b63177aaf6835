// [crates/wopr-fleet/src/connection_manager.rs]
//! Node Connection Manager (C7). Owns node (re-)registration and the
//! heartbeat frame handler. The orphan cleaner is injected as a
//! trait object at construction rather than owned, so neither side
//! holds the other's state (§9, "cyclic references" note).

use crate::errors::FleetError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use wopr_db::repositories::node::NodeStore;
use wopr_db::repositories::recovery::RecoveryStore;
use wopr_models::fleet::{ContainerSnapshot, Node, NodeAgentFrame, NodeStatus};

pub struct NodeRegistration {
    pub id: String,
    pub host: String,
    pub capacity_mb: u64,
    pub agent_version: Option<String>,
}

/// Injected hook back into the Orphan Cleaner (C11). Kept as a trait
/// object so the connection manager and the cleaner don't own each
/// other's concrete type.
#[async_trait]
pub trait OrphanCleanupTrigger: Send + Sync {
    async fn clean(&self, node_id: &str, running_containers: &[ContainerSnapshot]);
}

pub struct ConnectionManager<N, R> {
    nodes: Arc<N>,
    recovery: Arc<R>,
    cleaner: Arc<dyn OrphanCleanupTrigger>,
    /// Nodes for which an orphan cleanup has already been triggered
    /// during the current `returning` episode. Cleared once the node
    /// leaves `returning` (re-register or cleanup completes).
    cleaned_this_episode: Mutex<HashSet<String>>,
}

impl<N, R> ConnectionManager<N, R>
where
    N: NodeStore,
    R: RecoveryStore,
{
    pub fn new(nodes: Arc<N>, recovery: Arc<R>, cleaner: Arc<dyn OrphanCleanupTrigger>) -> Self {
        Self { nodes, recovery, cleaner, cleaned_this_episode: Mutex::new(HashSet::new()) }
    }

    #[instrument(skip(self))]
    pub async fn register_node(&self, reg: NodeRegistration) -> Result<Node, FleetError> {
        let existing = self.nodes.get(&reg.id).await;

        let node = match existing {
            Err(wopr_db::DbError::NotFound(_)) => {
                let now = Utc::now();
                let node = Node {
                    id: reg.id.clone(),
                    host: reg.host,
                    status: NodeStatus::Active,
                    capacity_mb: reg.capacity_mb,
                    used_mb: 0,
                    agent_version: reg.agent_version,
                    last_heartbeat_at: None,
                    registered_at: now,
                    updated_at: now,
                };
                self.nodes.register(&node).await?;
                info!("registered new node {}", reg.id);
                node
            }
            Err(other) => return Err(other.into()),
            Ok(current) => {
                match current.status {
                    NodeStatus::Offline | NodeStatus::Recovering | NodeStatus::Failed => {
                        self.nodes
                            .transition(&reg.id, NodeStatus::Returning, "re_registration", "connection-manager")
                            .await
                            .map_err(FleetError::from)?;
                    }
                    NodeStatus::Unhealthy => {
                        self.nodes
                            .transition(&reg.id, NodeStatus::Active, "heartbeat_ok", "connection-manager")
                            .await
                            .map_err(FleetError::from)?;
                    }
                    NodeStatus::Active | NodeStatus::Returning => {
                        self.nodes
                            .transition(&reg.id, current.status, "re_registration", "connection-manager")
                            .await
                            .map_err(FleetError::from)?;
                    }
                };
                // Refresh host/capacity/agent_version reported by this
                // re-registration (§4.7 step 4) regardless of which
                // branch above fired.
                self.nodes
                    .update_metadata(&reg.id, &reg.host, reg.capacity_mb, reg.agent_version.as_deref())
                    .await
                    .map_err(FleetError::from)?
            }
        };

        // Any recovery events still in_progress for this node are closed
        // on re-registration — the node is back, recovery is moot (§4.7).
        if let Err(e) = self.recovery.close_in_progress_for_node(&reg.id).await {
            warn!("failed to close in-progress recovery events for {}: {}", reg.id, e);
        }

        // A node leaving `returning` (by re-registering again) starts a
        // fresh episode; the next heartbeat is free to trigger cleanup.
        self.cleaned_this_episode.lock().await.remove(&reg.id);

        Ok(node)
    }

    /// Handles one `NodeAgentFrame::Heartbeat`. Triggers the orphan
    /// cleaner exactly once per `returning` episode.
    #[instrument(skip(self, frame))]
    pub async fn handle_frame(&self, node_id: &str, frame: NodeAgentFrame) -> Result<(), FleetError> {
        let NodeAgentFrame::Heartbeat { containers } = frame;

        let node = self.nodes.get(node_id).await?;
        self.nodes.record_heartbeat(node_id, sum_memory(&containers)).await?;

        if node.status == NodeStatus::Returning {
            let mut cleaned = self.cleaned_this_episode.lock().await;
            if !cleaned.contains(node_id) {
                cleaned.insert(node_id.to_string());
                drop(cleaned);
                self.cleaner.clean(node_id, &containers).await;
            } else {
                warn!("ignoring duplicate orphan-cleanup trigger for {} (already cleaned this episode)", node_id);
            }
        }

        Ok(())
    }
}

fn sum_memory(containers: &[ContainerSnapshot]) -> u64 {
    containers.iter().map(|c| c.memory_mb).sum()
}
