// [crates/wopr-models/src/gateway.rs]
//! Metering and circuit-breaker entities (§3: MeterEvent, CircuitState).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wopr_core::Credit;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterEvent {
    pub id: Uuid,
    pub tenant: String,
    pub cost_credits: Credit,
    pub charge_credits: Credit,
    pub capability: String,
    pub provider: String,
    pub instance_id: Option<String>,
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub tenant: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_charge: Credit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub instance_id: String,
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub tripped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSigPenalty {
    pub source_ip: String,
    pub failures: u32,
    pub window_start: DateTime<Utc>,
    pub backoff_until: Option<DateTime<Utc>>,
}
