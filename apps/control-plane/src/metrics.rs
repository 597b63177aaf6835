// [apps/control-plane/src/metrics.rs]
//! In-process `MetricsSource` backing the alert checker. Counters are
//! cumulative rather than windowed — this process's own request volume
//! is small enough that a time-boxed query wouldn't change the signal,
//! and it avoids a dependency on a separate time-series store.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use wopr_observability::{FleetStopEvent, MetricsSource, ObservabilityError, RequestCounts};

#[derive(Default)]
pub struct ControlPlaneMetrics {
    gateway_total: AtomicU64,
    gateway_errors: AtomicU64,
    failed_debits: AtomicU64,
    fleet_stop: Mutex<Option<FleetStopEvent>>,
}

impl ControlPlaneMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_gateway_request(&self, failed: bool) {
        self.gateway_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.gateway_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failed_debit(&self) {
        self.failed_debits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fleet_stop(&self, detail: impl Into<String>) {
        *self.fleet_stop.lock().unwrap() = Some(FleetStopEvent { detail: detail.into() });
    }
}

#[async_trait]
impl MetricsSource for ControlPlaneMetrics {
    async fn gateway_request_counts(&self, _window: chrono::Duration) -> Result<RequestCounts, ObservabilityError> {
        Ok(RequestCounts {
            total: self.gateway_total.load(Ordering::Relaxed),
            errors: self.gateway_errors.load(Ordering::Relaxed),
        })
    }

    async fn failed_debit_count(&self, _window: chrono::Duration) -> Result<u64, ObservabilityError> {
        Ok(self.failed_debits.load(Ordering::Relaxed))
    }

    async fn take_fleet_stop_event(&self) -> Result<Option<FleetStopEvent>, ObservabilityError> {
        Ok(self.fleet_stop.lock().unwrap().take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_accumulate_across_calls() {
        let metrics = ControlPlaneMetrics::new();
        metrics.record_gateway_request(false);
        metrics.record_gateway_request(true);
        let counts = metrics.gateway_request_counts(chrono::Duration::minutes(5)).await.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.errors, 1);
    }

    #[tokio::test]
    async fn fleet_stop_event_is_consumed_once() {
        let metrics = ControlPlaneMetrics::new();
        metrics.record_fleet_stop("node n1 lost all containers");
        assert!(metrics.take_fleet_stop_event().await.unwrap().is_some());
        assert!(metrics.take_fleet_stop_event().await.unwrap().is_none());
    }
}
