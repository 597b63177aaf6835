// [crates/wopr-observability/src/alerts.rs]
//! Observability (C19). Three alert definitions polled on a timer by
//! `AlertChecker`, which tracks the `fired` edge per alert so `onFire`
//! and `onResolve` each invoke exactly once per transition.

use crate::errors::ObservabilityError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Raw counters the gateway-error-rate alert needs over its window.
/// The app layer is the natural place to accumulate these (same request
/// path that already logs each dispatch); this trait keeps the alert
/// definitions themselves storage-agnostic.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn gateway_request_counts(&self, window: Duration) -> Result<RequestCounts, ObservabilityError>;
    async fn failed_debit_count(&self, window: Duration) -> Result<u64, ObservabilityError>;
    /// Reads and clears the fleet-stop flag in one step — a second call
    /// before a new stop event sees `None`.
    async fn take_fleet_stop_event(&self) -> Result<Option<FleetStopEvent>, ObservabilityError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCounts {
    pub total: u64,
    pub errors: u64,
}

#[derive(Debug, Clone)]
pub struct FleetStopEvent {
    pub detail: String,
}

pub trait AlertObserver: Send + Sync {
    fn on_fire(&self, name: &str, detail: &str);
    fn on_resolve(&self, name: &str);
}

pub struct TracingAlertObserver;

impl AlertObserver for TracingAlertObserver {
    fn on_fire(&self, name: &str, detail: &str) {
        tracing::error!(alert = name, detail, "alert fired");
    }

    fn on_resolve(&self, name: &str) {
        tracing::info!(alert = name, "alert resolved");
    }
}

#[derive(Debug, Clone)]
pub struct AlertStatus {
    pub name: &'static str,
    pub fired: bool,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct AlertConfig {
    pub window: Duration,
    pub error_rate_threshold: f64,
    pub failed_debit_threshold: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { window: Duration::minutes(5), error_rate_threshold: 0.05, failed_debit_threshold: 10 }
    }
}

const GATEWAY_ERROR_RATE: &str = "gateway-error-rate";
const CREDIT_DEDUCTION_SPIKE: &str = "credit-deduction-spike";
const FLEET_UNEXPECTED_STOP: &str = "fleet-unexpected-stop";

pub struct AlertChecker<S, O> {
    source: Arc<S>,
    observer: Arc<O>,
    config: AlertConfig,
    state: Mutex<HashMap<&'static str, AlertStatus>>,
}

impl<S, O> AlertChecker<S, O>
where
    S: MetricsSource,
    O: AlertObserver,
{
    pub fn new(source: Arc<S>, observer: Arc<O>) -> Self {
        Self { source, observer, config: AlertConfig::default(), state: Mutex::new(HashMap::new()) }
    }

    pub fn with_config(source: Arc<S>, observer: Arc<O>, config: AlertConfig) -> Self {
        Self { source, observer, config, state: Mutex::new(HashMap::new()) }
    }

    /// Evaluates all three alerts once. Intended to be called on a timer
    /// by the app layer's background-task scheduler.
    pub async fn check(&self) -> Result<Vec<AlertStatus>, ObservabilityError> {
        let now = Utc::now();
        let mut results = Vec::with_capacity(3);

        let counts = self.source.gateway_request_counts(self.config.window).await?;
        let error_rate_fired =
            counts.total > 0 && (counts.errors as f64 / counts.total as f64) > self.config.error_rate_threshold;
        let detail = format!("{}/{} requests errored over {}s", counts.errors, counts.total, self.config.window.num_seconds());
        results.push(self.transition(GATEWAY_ERROR_RATE, error_rate_fired, detail, now));

        let failed_debits = self.source.failed_debit_count(self.config.window).await?;
        let spike_fired = failed_debits > self.config.failed_debit_threshold;
        let detail = format!("{failed_debits} failed debits over {}s", self.config.window.num_seconds());
        results.push(self.transition(CREDIT_DEDUCTION_SPIKE, spike_fired, detail, now));

        let stop_event = self.source.take_fleet_stop_event().await?;
        let stop_fired = stop_event.is_some();
        let detail = stop_event.map(|e| e.detail).unwrap_or_default();
        results.push(self.transition(FLEET_UNEXPECTED_STOP, stop_fired, detail, now));

        Ok(results)
    }

    /// Returns the last cached result per alert; never invokes `check`.
    pub fn get_status(&self) -> Vec<AlertStatus> {
        self.state.lock().unwrap().values().cloned().collect()
    }

    fn transition(&self, name: &'static str, fired: bool, detail: String, now: DateTime<Utc>) -> AlertStatus {
        let mut state = self.state.lock().unwrap();
        let was_fired = state.get(name).map(|s| s.fired).unwrap_or(false);

        if fired && !was_fired {
            self.observer.on_fire(name, &detail);
        } else if !fired && was_fired {
            self.observer.on_resolve(name);
        }

        let status = AlertStatus { name, fired, detail: (!detail.is_empty()).then_some(detail), checked_at: now };
        state.insert(name, status.clone());
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct RecordingObserver {
        fires: AtomicU64,
        resolves: AtomicU64,
    }

    impl RecordingObserver {
        fn new() -> Self {
            Self { fires: AtomicU64::new(0), resolves: AtomicU64::new(0) }
        }
    }

    impl AlertObserver for RecordingObserver {
        fn on_fire(&self, _name: &str, _detail: &str) {
            self.fires.fetch_add(1, Ordering::SeqCst);
        }
        fn on_resolve(&self, _name: &str) {
            self.resolves.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeSource {
        total: u64,
        errors: u64,
        failed_debits: u64,
        stop: Mutex<Option<FleetStopEvent>>,
    }

    #[async_trait]
    impl MetricsSource for FakeSource {
        async fn gateway_request_counts(&self, _window: Duration) -> Result<RequestCounts, ObservabilityError> {
            Ok(RequestCounts { total: self.total, errors: self.errors })
        }
        async fn failed_debit_count(&self, _window: Duration) -> Result<u64, ObservabilityError> {
            Ok(self.failed_debits)
        }
        async fn take_fleet_stop_event(&self) -> Result<Option<FleetStopEvent>, ObservabilityError> {
            Ok(self.stop.lock().unwrap().take())
        }
    }

    #[tokio::test]
    async fn error_rate_fires_above_threshold_and_resolves() {
        let source = Arc::new(FakeSource { total: 100, errors: 10, failed_debits: 0, stop: Mutex::new(None) });
        let observer = Arc::new(RecordingObserver::new());
        let checker = AlertChecker::new(source.clone(), observer.clone());

        checker.check().await.unwrap();
        assert_eq!(observer.fires.load(Ordering::SeqCst), 1);

        let status = checker.get_status();
        let gw = status.iter().find(|s| s.name == GATEWAY_ERROR_RATE).unwrap();
        assert!(gw.fired);
    }

    #[tokio::test]
    async fn zero_requests_never_fires() {
        let source = Arc::new(FakeSource { total: 0, errors: 0, failed_debits: 0, stop: Mutex::new(None) });
        let observer = Arc::new(RecordingObserver::new());
        let checker = AlertChecker::new(source, observer.clone());

        checker.check().await.unwrap();
        assert_eq!(observer.fires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fleet_stop_flag_is_consumed_and_self_resolves() {
        let source = Arc::new(FakeSource {
            total: 0,
            errors: 0,
            failed_debits: 0,
            stop: Mutex::new(Some(FleetStopEvent { detail: "node n1 lost all containers".into() })),
        });
        let observer = Arc::new(RecordingObserver::new());
        let checker = AlertChecker::new(source, observer.clone());

        checker.check().await.unwrap(); // fires, consumes the flag
        assert_eq!(observer.fires.load(Ordering::SeqCst), 1);

        checker.check().await.unwrap(); // flag already cleared -> resolves
        assert_eq!(observer.resolves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_status_never_invokes_check() {
        let source = Arc::new(FakeSource { total: 100, errors: 50, failed_debits: 0, stop: Mutex::new(None) });
        let observer = Arc::new(RecordingObserver::new());
        let checker = AlertChecker::new(source, observer);

        assert!(checker.get_status().is_empty());
    }
}
