// [crates/wopr-gateway/src/lib.rs]
//! Metered AI-inference gateway: pre-flight checks (auth, tenant
//! status, spending cap, balance floor, circuit breaker) and post-call
//! usage metering.

pub mod circuit;
pub mod errors;
pub mod meter_aggregator;
pub mod pipeline;

pub use circuit::{CircuitBreaker, CircuitConfig};
pub use errors::GatewayError;
pub use meter_aggregator::{MeterAggregator, SpendSnapshot};
pub use pipeline::{
    compute_cost, AuthContext, AuthResolver, CredentialResolver, GatewayPipeline, GatewayResponse,
    PreflightContext, RateCard, SpendingCaps, StreamAccumulator, UpstreamUsage, BALANCE_FLOOR,
};
