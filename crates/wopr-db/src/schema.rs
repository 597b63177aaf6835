// [crates/wopr-db/src/schema.rs]
//! Idempotent DDL for every table named in SPEC_FULL.md §3/§4.

use anyhow::{Context, Result};
use libsql::Connection;
use tracing::{debug, info};

const TABLES: &[(&str, &str)] = &[
    ("credit_transactions", r#"
        CREATE TABLE IF NOT EXISTS credit_transactions (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            amount INTEGER NOT NULL,
            balance_after INTEGER NOT NULL,
            type TEXT NOT NULL,
            description TEXT,
            reference_id TEXT UNIQUE,
            funding_source TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("credit_balances", r#"
        CREATE TABLE IF NOT EXISTS credit_balances (
            tenant TEXT PRIMARY KEY,
            balance INTEGER NOT NULL DEFAULT 0
        );
    "#),
    ("tenant_status", r#"
        CREATE TABLE IF NOT EXISTS tenant_status (
            tenant TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'active',
            reason TEXT,
            changed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            changed_by TEXT NOT NULL DEFAULT 'system',
            grace_deadline TEXT,
            data_delete_after TEXT
        );
    "#),
    ("bot_instances", r#"
        CREATE TABLE IF NOT EXISTS bot_instances (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            name TEXT NOT NULL,
            node_id TEXT,
            billing_state TEXT NOT NULL DEFAULT 'active',
            suspended_at TEXT,
            destroy_after TEXT,
            resource_tier TEXT NOT NULL DEFAULT 'standard',
            storage_tier TEXT NOT NULL DEFAULT 'standard',
            created_by_user_id TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("nodes", r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            host TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            capacity_mb INTEGER NOT NULL,
            used_mb INTEGER NOT NULL DEFAULT 0,
            agent_version TEXT,
            last_heartbeat_at TEXT,
            registered_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("node_transitions", r#"
        CREATE TABLE IF NOT EXISTS node_transitions (
            id TEXT PRIMARY KEY,
            node TEXT NOT NULL,
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            reason TEXT NOT NULL,
            triggered_by TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("recovery_events", r#"
        CREATE TABLE IF NOT EXISTS recovery_events (
            id TEXT PRIMARY KEY,
            node TEXT NOT NULL,
            trigger TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'in_progress',
            tenants_total INTEGER NOT NULL DEFAULT 0,
            tenants_recovered INTEGER NOT NULL DEFAULT 0,
            tenants_failed INTEGER NOT NULL DEFAULT 0,
            tenants_waiting INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            completed_at TEXT,
            report TEXT NOT NULL DEFAULT ''
        );
    "#),
    ("recovery_items", r#"
        CREATE TABLE IF NOT EXISTS recovery_items (
            id TEXT PRIMARY KEY,
            event TEXT NOT NULL,
            tenant TEXT NOT NULL,
            source_node TEXT NOT NULL,
            target_node TEXT,
            backup_key TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'waiting',
            reason TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            completed_at TEXT
        );
    "#),
    ("meter_events", r#"
        CREATE TABLE IF NOT EXISTS meter_events (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            cost_credits INTEGER NOT NULL,
            charge_credits INTEGER NOT NULL,
            capability TEXT NOT NULL,
            provider TEXT NOT NULL,
            instance_id TEXT,
            model TEXT,
            timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("usage_summaries", r#"
        CREATE TABLE IF NOT EXISTS usage_summaries (
            tenant TEXT NOT NULL,
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            total_charge INTEGER NOT NULL,
            PRIMARY KEY (tenant, window_start, window_end)
        );
    "#),
    ("circuit_state", r#"
        CREATE TABLE IF NOT EXISTS circuit_state (
            instance_id TEXT PRIMARY KEY,
            count INTEGER NOT NULL DEFAULT 0,
            window_start TEXT NOT NULL,
            tripped_at TEXT
        );
    "#),
    ("autotopup_settings", r#"
        CREATE TABLE IF NOT EXISTS autotopup_settings (
            tenant TEXT PRIMARY KEY,
            usage_enabled INTEGER NOT NULL DEFAULT 0,
            usage_threshold INTEGER NOT NULL DEFAULT 500,
            usage_topup INTEGER NOT NULL DEFAULT 1000,
            usage_charge_in_flight INTEGER NOT NULL DEFAULT 0,
            usage_consecutive_failures INTEGER NOT NULL DEFAULT 0,
            schedule_enabled INTEGER NOT NULL DEFAULT 0,
            schedule_amount INTEGER NOT NULL DEFAULT 1000,
            schedule_interval TEXT NOT NULL DEFAULT 'monthly',
            schedule_next_at TEXT,
            schedule_consecutive_failures INTEGER NOT NULL DEFAULT 0,
            payment_method_ref TEXT
        );
    "#),
    ("webhook_sig_penalties", r#"
        CREATE TABLE IF NOT EXISTS webhook_sig_penalties (
            source_ip TEXT PRIMARY KEY,
            failures INTEGER NOT NULL DEFAULT 0,
            window_start TEXT NOT NULL,
            backoff_until TEXT
        );
    "#),
    ("api_keys", r#"
        CREATE TABLE IF NOT EXISTS api_keys (
            token_hash TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            instance_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("provider_credentials", r#"
        CREATE TABLE IF NOT EXISTS provider_credentials (
            tenant TEXT NOT NULL,
            provider TEXT NOT NULL,
            encrypted_value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            PRIMARY KEY (tenant, provider)
        );
    "#),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_credit_tx_tenant ON credit_transactions(tenant, created_at DESC);",
    "CREATE INDEX IF NOT EXISTS idx_bot_instances_node ON bot_instances(node_id);",
    "CREATE INDEX IF NOT EXISTS idx_bot_instances_tenant ON bot_instances(tenant);",
    "CREATE INDEX IF NOT EXISTS idx_meter_events_tenant_ts ON meter_events(tenant, timestamp);",
    "CREATE INDEX IF NOT EXISTS idx_recovery_items_event ON recovery_items(event);",
    "CREATE INDEX IF NOT EXISTS idx_api_keys_tenant ON api_keys(tenant);",
];

pub async fn apply_schema(conn: &Connection) -> Result<()> {
    for (name, ddl) in TABLES {
        conn.execute(ddl, ()).await.with_context(|| format!("creating table {name}"))?;
        debug!("schema: ensured table {}", name);
    }
    for ddl in INDEXES {
        conn.execute(ddl, ()).await.with_context(|| format!("creating index: {ddl}"))?;
    }
    info!("schema applied ({} tables)", TABLES.len());
    Ok(())
}
