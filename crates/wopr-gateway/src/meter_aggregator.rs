// [crates/wopr-gateway/src/meter_aggregator.rs]
//! Meter Aggregator (C15). Computes a tenant's day/month-to-date spend
//! for spending-cap enforcement, with a short-lived in-process cache —
//! conservative double-counting against `usage_summaries` is acceptable
//! since this only gates enforcement, never billing itself.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};
use wopr_core::{time, Credit};
use wopr_db::repositories::meter::MeterStore;
use wopr_db::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendSnapshot {
    pub daily_spend: Credit,
    pub monthly_spend: Credit,
}

pub struct MeterAggregator<M> {
    store: Arc<M>,
    ttl: StdDuration,
    cache: Mutex<HashMap<String, (SpendSnapshot, Instant)>>,
}

impl<M> MeterAggregator<M>
where
    M: MeterStore,
{
    /// `ttl` of `Duration::ZERO` disables caching.
    pub fn new(store: Arc<M>, ttl: StdDuration) -> Self {
        Self { store, ttl, cache: Mutex::new(HashMap::new()) }
    }

    pub async fn query_spend(&self, tenant: &str, now: DateTime<Utc>) -> Result<SpendSnapshot, DbError> {
        if self.ttl > StdDuration::ZERO {
            if let Some((snapshot, stamped_at)) = self.cache.lock().unwrap().get(tenant) {
                if stamped_at.elapsed() < self.ttl {
                    return Ok(*snapshot);
                }
            }
        }

        let day_start = time::day_start(now);
        let month_start = time::month_start(now);

        let daily_spend = self.store.sum_charge(tenant, day_start, now).await?
            .saturating_add(self.sum_summaries_in_window(tenant, day_start, now).await?);
        let monthly_spend = self.store.sum_charge(tenant, month_start, now).await?
            .saturating_add(self.sum_summaries_in_window(tenant, month_start, now).await?);

        let snapshot = SpendSnapshot { daily_spend, monthly_spend };
        if self.ttl > StdDuration::ZERO {
            self.cache.lock().unwrap().insert(tenant.to_string(), (snapshot, Instant::now()));
        }
        Ok(snapshot)
    }

    async fn sum_summaries_in_window(
        &self,
        tenant: &str,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Credit, DbError> {
        let summaries = self.store.summaries_for_tenant(tenant, 100).await?;
        Ok(summaries
            .into_iter()
            .filter(|s| s.window_start < now && s.window_end > window_start)
            .fold(Credit::ZERO, |acc, s| acc.saturating_add(s.total_charge)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;
    use wopr_db::repositories::meter::SqlMeterStore;
    use wopr_db::DbClient;
    use wopr_models::gateway::MeterEvent;

    fn event(tenant: &str, charge: i64, ts: DateTime<Utc>) -> MeterEvent {
        MeterEvent {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            cost_credits: Credit::new(charge),
            charge_credits: Credit::new(charge),
            capability: "chat.completions".into(),
            provider: "openai".into(),
            instance_id: None,
            model: None,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn sums_daily_and_monthly_windows() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = Arc::new(SqlMeterStore::new(db));
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 18, 0, 0).unwrap();

        store.record(&event("t1", 500, now - Duration::hours(2))).await.unwrap();
        store.record(&event("t1", 700, now - Duration::days(5))).await.unwrap();

        let aggregator = MeterAggregator::new(store, StdDuration::ZERO);
        let spend = aggregator.query_spend("t1", now).await.unwrap();
        assert_eq!(spend.daily_spend, Credit::new(500));
        assert_eq!(spend.monthly_spend, Credit::new(1200));
    }

    #[tokio::test]
    async fn cache_serves_stale_value_within_ttl() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = Arc::new(SqlMeterStore::new(db));
        let now = Utc::now();
        store.record(&event("t1", 100, now)).await.unwrap();

        let aggregator = MeterAggregator::new(store.clone(), StdDuration::from_secs(60));
        let first = aggregator.query_spend("t1", now).await.unwrap();
        assert_eq!(first.daily_spend, Credit::new(100));

        store.record(&event("t1", 900, now)).await.unwrap();
        let second = aggregator.query_spend("t1", now).await.unwrap();
        assert_eq!(second.daily_spend, Credit::new(100)); // cached, doesn't see the new event
    }
}
