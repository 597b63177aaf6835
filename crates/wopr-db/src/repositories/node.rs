// [crates/wopr-db/src/repositories/node.rs]
//! Node Repository (C5). CRUD plus a validated state-machine
//! `transition()` per §4.5's table, and a placement-candidate query.

use crate::errors::DbError;
use crate::DbClient;
use async_trait::async_trait;
use chrono::Utc;
use libsql::{params, Row};
use tracing::{instrument, warn};
use uuid::Uuid;
use wopr_models::fleet::{Node, NodeStatus, NodeTransition};

#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn register(&self, node: &Node) -> Result<(), DbError>;
    async fn get(&self, id: &str) -> Result<Node, DbError>;
    async fn list(&self) -> Result<Vec<Node>, DbError>;
    async fn transition(
        &self,
        id: &str,
        to: NodeStatus,
        reason: &str,
        triggered_by: &str,
    ) -> Result<Node, DbError>;
    async fn record_heartbeat(&self, id: &str, used_mb: u64) -> Result<(), DbError>;
    /// Nodes eligible to receive new placements: status active and with
    /// nonzero free capacity, ordered by most free capacity first.
    async fn placement_candidates(&self, required_mb: u64) -> Result<Vec<Node>, DbError>;
    /// Refreshes the metadata an agent reports at (re-)registration
    /// without touching `status` — used when a node reconnects and its
    /// host, capacity, or agent version may have changed (§4.7 step 4).
    async fn update_metadata(
        &self,
        id: &str,
        host: &str,
        capacity_mb: u64,
        agent_version: Option<&str>,
    ) -> Result<Node, DbError>;
}

pub struct SqlNodeStore {
    db: DbClient,
}

impl SqlNodeStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

/// Allowed `(from, to)` edges of the node lifecycle (§4.5). Anything not
/// listed here is rejected as `DbError::InvalidTransition`.
fn is_allowed(from: NodeStatus, to: NodeStatus) -> bool {
    use NodeStatus::*;
    matches!(
        (from, to),
        (Active, Unhealthy)
            | (Active, Offline)
            | (Unhealthy, Active)
            | (Unhealthy, Recovering)
            | (Unhealthy, Offline)
            | (Recovering, Returning)
            | (Recovering, Failed)
            | (Returning, Active)
            | (Offline, Recovering)
            | (Offline, Failed)
            | (Offline, Returning)
            | (Failed, Returning)
            | (Failed, Active)
    )
}

#[async_trait]
impl NodeStore for SqlNodeStore {
    async fn register(&self, node: &Node) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO nodes \
             (id, host, status, capacity_mb, used_mb, agent_version, last_heartbeat_at, \
              registered_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                node.id.clone(),
                node.host.clone(),
                status_to_str(node.status),
                node.capacity_mb as i64,
                node.used_mb as i64,
                node.agent_version.clone(),
                node.last_heartbeat_at.map(|d| d.to_rfc3339()),
                node.registered_at.to_rfc3339(),
                node.updated_at.to_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Node, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, host, status, capacity_mb, used_mb, agent_version, \
                 last_heartbeat_at, registered_at, updated_at FROM nodes WHERE id = ?1",
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => map_row(&row),
            None => Err(DbError::NotFound(format!("node {id}"))),
        }
    }

    async fn list(&self) -> Result<Vec<Node>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, host, status, capacity_mb, used_mb, agent_version, \
                 last_heartbeat_at, registered_at, updated_at FROM nodes",
                (),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_row(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn transition(
        &self,
        id: &str,
        to: NodeStatus,
        reason: &str,
        triggered_by: &str,
    ) -> Result<Node, DbError> {
        let conn = self.db.connection()?;
        let tx = conn.transaction().await?;

        let mut rows = tx
            .query(
                "SELECT id, host, status, capacity_mb, used_mb, agent_version, \
                 last_heartbeat_at, registered_at, updated_at FROM nodes WHERE id = ?1",
                params![id],
            )
            .await?;
        let current = match rows.next().await? {
            Some(row) => map_row(&row)?,
            None => {
                tx.rollback().await.ok();
                return Err(DbError::NotFound(format!("node {id}")));
            }
        };
        drop(rows);

        // A self-transition (e.g. active -> active on re-registration,
        // §4.5) is always allowed and still writes its audit row, since
        // status itself doesn't change.
        if current.status == to {
            let now = Utc::now();
            tx.execute(
                "INSERT INTO node_transitions (id, node, from_status, to_status, reason, triggered_by, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    id,
                    status_to_str(current.status),
                    status_to_str(to),
                    reason,
                    triggered_by,
                    now.to_rfc3339()
                ],
            )
            .await?;
            tx.commit().await?;
            return Ok(current);
        }

        if !is_allowed(current.status, to) {
            tx.rollback().await.ok();
            warn!("rejected node transition {:?} -> {:?} for {}", current.status, to, id);
            return Err(DbError::InvalidTransition(format!(
                "{:?} -> {:?} is not a valid node transition",
                current.status, to
            )));
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE nodes SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status_to_str(to), now.to_rfc3339()],
        )
        .await?;

        tx.execute(
            "INSERT INTO node_transitions (id, node, from_status, to_status, reason, triggered_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                id,
                status_to_str(current.status),
                status_to_str(to),
                reason,
                triggered_by,
                now.to_rfc3339()
            ],
        )
        .await?;

        tx.commit().await?;

        Ok(Node { status: to, updated_at: now, ..current })
    }

    async fn record_heartbeat(&self, id: &str, used_mb: u64) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        let now = Utc::now().to_rfc3339();
        let affected = conn
            .execute(
                "UPDATE nodes SET used_mb = ?2, last_heartbeat_at = ?3, updated_at = ?3 WHERE id = ?1",
                params![id, used_mb as i64, now],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("node {id}")));
        }
        Ok(())
    }

    async fn placement_candidates(&self, required_mb: u64) -> Result<Vec<Node>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, host, status, capacity_mb, used_mb, agent_version, \
                 last_heartbeat_at, registered_at, updated_at FROM nodes \
                 WHERE status = 'active' AND (capacity_mb - used_mb) >= ?1 \
                 ORDER BY (capacity_mb - used_mb) DESC",
                params![required_mb as i64],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_row(&row)?);
        }
        Ok(out)
    }

    async fn update_metadata(
        &self,
        id: &str,
        host: &str,
        capacity_mb: u64,
        agent_version: Option<&str>,
    ) -> Result<Node, DbError> {
        let conn = self.db.connection()?;
        let now = Utc::now().to_rfc3339();
        let affected = conn
            .execute(
                "UPDATE nodes SET host = ?2, capacity_mb = ?3, agent_version = ?4, updated_at = ?5 WHERE id = ?1",
                params![id, host, capacity_mb as i64, agent_version, now],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("node {id}")));
        }
        self.get(id).await
    }
}

fn status_to_str(s: NodeStatus) -> &'static str {
    match s {
        NodeStatus::Active => "active",
        NodeStatus::Unhealthy => "unhealthy",
        NodeStatus::Offline => "offline",
        NodeStatus::Recovering => "recovering",
        NodeStatus::Returning => "returning",
        NodeStatus::Failed => "failed",
    }
}

fn str_to_status(s: &str) -> Result<NodeStatus, DbError> {
    Ok(match s {
        "active" => NodeStatus::Active,
        "unhealthy" => NodeStatus::Unhealthy,
        "offline" => NodeStatus::Offline,
        "recovering" => NodeStatus::Recovering,
        "returning" => NodeStatus::Returning,
        "failed" => NodeStatus::Failed,
        other => return Err(DbError::Mapping(format!("unknown node status '{other}'"))),
    })
}

fn map_row(row: &Row) -> Result<Node, DbError> {
    let id: String = row.get(0)?;
    let host: String = row.get(1)?;
    let status: String = row.get(2)?;
    let capacity_mb: i64 = row.get(3)?;
    let used_mb: i64 = row.get(4)?;
    let agent_version: Option<String> = row.get(5)?;
    let last_heartbeat_at: Option<String> = row.get(6)?;
    let registered_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Node {
        id,
        host,
        status: str_to_status(&status)?,
        capacity_mb: capacity_mb as u64,
        used_mb: used_mb as u64,
        agent_version,
        last_heartbeat_at: last_heartbeat_at.and_then(|s| s.parse().ok()),
        registered_at: registered_at.parse().map_err(|_| DbError::Mapping("bad registered_at".into()))?,
        updated_at: updated_at.parse().map_err(|_| DbError::Mapping("bad updated_at".into()))?,
    })
}
