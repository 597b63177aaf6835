// [crates/wopr-models/src/fleet.rs]
//! Node fleet entities: `Node`, `NodeTransition`, `RecoveryEvent`,
//! `RecoveryItem` (§3), and the command-bus message grammar (§4.6, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Unhealthy,
    Offline,
    Recovering,
    Returning,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub host: String,
    pub status: NodeStatus,
    pub capacity_mb: u64,
    pub used_mb: u64,
    pub agent_version: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn free_mb(&self) -> u64 {
        self.capacity_mb.saturating_sub(self.used_mb)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTransition {
    pub id: Uuid,
    pub node: String,
    pub from: NodeStatus,
    pub to: NodeStatus,
    pub reason: String,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTrigger {
    HeartbeatTimeout,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    InProgress,
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub id: Uuid,
    pub node: String,
    pub trigger: RecoveryTrigger,
    pub status: RecoveryStatus,
    pub tenants_total: u32,
    pub tenants_recovered: u32,
    pub tenants_failed: u32,
    pub tenants_waiting: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub report: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryItemStatus {
    Recovered,
    Failed,
    Waiting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryItem {
    pub id: Uuid,
    pub event: Uuid,
    pub tenant: String,
    pub source_node: String,
    pub target_node: Option<String>,
    pub backup_key: String,
    pub status: RecoveryItemStatus,
    pub reason: Option<String>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Node agent command grammar (§4.6). Cancellation is by deadline at
/// the command-bus layer, not encoded here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Command {
    BotStart { bot_id: Uuid },
    BotStop { bot_id: Uuid },
    BotRestart { bot_id: Uuid },
    BotRemove { bot_id: Uuid },
    BotImport { bot_id: Uuid, image: String, env: std::collections::HashMap<String, String> },
    BotInspect { bot_id: Uuid },
    BackupDownload { bot_id: Uuid },
}

impl Command {
    pub fn bot_id(&self) -> Uuid {
        match self {
            Command::BotStart { bot_id }
            | Command::BotStop { bot_id }
            | Command::BotRestart { bot_id }
            | Command::BotRemove { bot_id }
            | Command::BotImport { bot_id, .. }
            | Command::BotInspect { bot_id }
            | Command::BackupDownload { bot_id } => *bot_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: Uuid,
    pub command: Command,
    pub success: bool,
    pub error: Option<String>,
    /// Free-form JSON payload, e.g. inspect output (digest, health status).
    pub data: Option<serde_json::Value>,
}

/// Heartbeat frame sent by a node agent (§6): `{type:"heartbeat",
/// containers:[{name, memory_mb}, ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub name: String,
    pub memory_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeAgentFrame {
    Heartbeat { containers: Vec<ContainerSnapshot> },
}
