// [crates/wopr-observability/src/lib.rs]
//! Alert definitions and the edge-triggered checker that drives them.

pub mod alerts;
pub mod errors;

pub use alerts::{
    AlertChecker, AlertConfig, AlertObserver, AlertStatus, FleetStopEvent, MetricsSource,
    RequestCounts, TracingAlertObserver,
};
pub use errors::ObservabilityError;
