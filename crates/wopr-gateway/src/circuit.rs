// [crates/wopr-gateway/src/circuit.rs]
//! Circuit Breaker (C16). Per `instance_id`, falling back to `tenant`
//! when no instance is known. `increment_or_reset` is atomic (the store
//! reads and writes the row inside one transaction); this module only
//! supplies the window math.

use crate::errors::GatewayError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use wopr_db::repositories::circuit::SqlCircuitStateStore;

#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    pub max_requests_per_window: u32,
    pub window: ChronoDuration,
    pub pause_duration: ChronoDuration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 100,
            window: ChronoDuration::milliseconds(10_000),
            pause_duration: ChronoDuration::milliseconds(300_000),
        }
    }
}

pub struct CircuitBreaker {
    store: Arc<SqlCircuitStateStore>,
    config: CircuitConfig,
}

impl CircuitBreaker {
    pub fn new(store: Arc<SqlCircuitStateStore>) -> Self {
        Self { store, config: CircuitConfig::default() }
    }

    pub fn with_config(store: Arc<SqlCircuitStateStore>, config: CircuitConfig) -> Self {
        Self { store, config }
    }

    /// Runs the per-request check: rejects while paused, otherwise
    /// increments the window counter and trips on overflow.
    pub async fn check(&self, key: &str) -> Result<(), GatewayError> {
        let now = Utc::now();

        if let Some(state) = self.store.get(key).await? {
            if let Some(tripped_at) = state.tripped_at {
                let resume_at = tripped_at + self.config.pause_duration;
                if now < resume_at {
                    let retry_after_s = (resume_at - now).num_seconds().max(0) as u64;
                    return Err(GatewayError::CircuitTripped { retry_after_s, paused_until: resume_at });
                }
                self.store.reset(key).await?;
            }
        }

        // The store compares the passed anchor against its stored
        // `window_start`; passing `now - window` turns that comparison
        // into "is the existing window still current".
        let candidate_window_start = now - self.config.window;
        let state = self.store.increment_or_reset(key, candidate_window_start).await?;

        if state.count > self.config.max_requests_per_window {
            self.store.trip(key).await?;
            let paused_until = now + self.config.pause_duration;
            tracing::warn!(key, count = state.count, "circuit tripped");
            return Err(GatewayError::CircuitTripped {
                retry_after_s: self.config.pause_duration.num_seconds() as u64,
                paused_until,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wopr_db::DbClient;

    #[tokio::test]
    async fn trips_after_max_requests() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let breaker = CircuitBreaker::with_config(
            Arc::new(SqlCircuitStateStore::new(db)),
            CircuitConfig { max_requests_per_window: 3, ..CircuitConfig::default() },
        );

        for _ in 0..3 {
            breaker.check("inst-1").await.unwrap();
        }
        let err = breaker.check("inst-1").await;
        assert!(matches!(err, Err(GatewayError::CircuitTripped { .. })));
    }

    #[tokio::test]
    async fn resumes_after_pause_duration() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let breaker = CircuitBreaker::with_config(
            Arc::new(SqlCircuitStateStore::new(db)),
            CircuitConfig {
                max_requests_per_window: 1,
                pause_duration: ChronoDuration::milliseconds(-1), // already elapsed
                ..CircuitConfig::default()
            },
        );

        breaker.check("inst-1").await.unwrap();
        let err = breaker.check("inst-1").await;
        assert!(matches!(err, Err(GatewayError::CircuitTripped { .. })));

        // third call: pause_duration is negative, so resume_at is already past
        let result = breaker.check("inst-1").await;
        assert!(result.is_ok());
    }
}
