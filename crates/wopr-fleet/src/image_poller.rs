// [crates/wopr-fleet/src/image_poller.rs]
//! Image Poller & Updater (C12). A per-bot timer polls the registry
//! for a new digest; the updater applies it with a per-bot exclusive
//! lock and a rollback path on any failed step.

use crate::errors::FleetError;
use async_trait::async_trait;
use chrono::{Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{instrument, warn};
use uuid::Uuid;
use wopr_models::bot::{ReleaseChannel, UpdatePolicy};

pub fn poll_interval(channel: ReleaseChannel) -> Option<Duration> {
    match channel {
        ReleaseChannel::Canary => Some(Duration::from_secs(5 * 60)),
        ReleaseChannel::Staging => Some(Duration::from_secs(15 * 60)),
        ReleaseChannel::Stable => Some(Duration::from_secs(30 * 60)),
        ReleaseChannel::Pinned => None,
    }
}

/// Resolves the manifest digest for an image tag. Grounded in a
/// registry-client seam so the poller can be tested without a live
/// registry call.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn resolve_digest(&self, image: &str) -> Result<String, FleetError>;
}

/// Inspects a running bot container, returning its current image
/// digest and health.
#[derive(Debug, Clone)]
pub struct InspectResult {
    pub running_digest: Option<String>,
    pub health: Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    NoHealthCheck,
    Starting,
    Healthy,
    Unhealthy,
}

#[async_trait]
pub trait FleetRuntime: Send + Sync {
    async fn inspect(&self, bot_id: Uuid) -> Result<InspectResult, FleetError>;
    async fn pull(&self, image: &str) -> Result<(), FleetError>;
    async fn update_image(&self, bot_id: Uuid, image: &str) -> Result<(), FleetError>;
    async fn start(&self, bot_id: Uuid) -> Result<(), FleetError>;
}

/// Decides whether an available update should be applied now, given
/// the bot's `update_policy` (§4.12).
pub fn should_apply_update(policy: &UpdatePolicy, now: chrono::DateTime<Utc>) -> bool {
    match policy {
        UpdatePolicy::Manual => false,
        UpdatePolicy::OnPush => true,
        UpdatePolicy::Nightly => {
            let t = now.time();
            t.hour() == 3 && t.minute() < 5
        }
        UpdatePolicy::Cron(_expr) => {
            // Cron-schedule evaluation is left to the caller's scheduler
            // integration; this crate only classifies the policy kind.
            false
        }
    }
}

pub struct ImagePoller<R> {
    registry: Arc<R>,
}

impl<R: RegistryClient> ImagePoller<R> {
    pub fn new(registry: Arc<R>) -> Self {
        Self { registry }
    }

    /// Returns `Some(new_digest)` when the registry's digest for
    /// `image` differs from `running_digest`.
    #[instrument(skip(self))]
    pub async fn check_for_update(
        &self,
        image: &str,
        running_digest: Option<&str>,
    ) -> Result<Option<String>, FleetError> {
        let latest = self.registry.resolve_digest(image).await?;
        match running_digest {
            Some(current) if current == latest => Ok(None),
            _ => Ok(Some(latest)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub success: bool,
    pub rolled_back: bool,
    pub error: Option<String>,
}

/// Applies an image update to a running bot via the injected
/// `FleetRuntime` — which, for the concrete `CommandBusFleetRuntime`,
/// already dispatches pull/update/start over the command bus. This type
/// has no bus of its own to avoid dispatching the same command twice.
pub struct ImageUpdater<R> {
    runtime: Arc<R>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<R> ImageUpdater<R>
where
    R: FleetRuntime,
{
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime, locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, bot_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.lock().await.entry(bot_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    #[instrument(skip(self))]
    pub async fn update_bot(
        &self,
        bot_id: Uuid,
        previous_image: &str,
        new_image: &str,
    ) -> Result<UpdateOutcome, FleetError> {
        let lock = self.lock_for(bot_id).await;
        let guard = match lock.try_lock() {
            Ok(g) => g,
            Err(_) => return Err(FleetError::UpdateInProgress(bot_id)),
        };

        let inspect = self.runtime.inspect(bot_id).await?;
        let was_running = matches!(inspect.health, Health::Healthy | Health::Starting | Health::NoHealthCheck);

        let outcome = self.apply_update(bot_id, new_image, was_running).await;

        let outcome = match outcome {
            Ok(()) => UpdateOutcome { success: true, rolled_back: false, error: None },
            Err(e) => {
                warn!("update for bot {} failed at {:?}, rolling back", bot_id, e);
                match self.rollback(bot_id, previous_image, was_running).await {
                    Ok(()) => UpdateOutcome { success: false, rolled_back: true, error: Some(e.to_string()) },
                    Err(rollback_err) => UpdateOutcome {
                        success: false,
                        rolled_back: false,
                        error: Some(format!("{e}. Rollback also failed: {rollback_err}")),
                    },
                }
            }
        };

        drop(guard);
        Ok(outcome)
    }

    async fn apply_update(&self, bot_id: Uuid, new_image: &str, was_running: bool) -> Result<(), FleetError> {
        self.runtime.pull(new_image).await?;
        self.runtime.update_image(bot_id, new_image).await?;

        if was_running {
            self.runtime.start(bot_id).await?;
            self.wait_for_healthy(bot_id).await?;
        }
        Ok(())
    }

    async fn rollback(&self, bot_id: Uuid, previous_image: &str, was_running: bool) -> Result<(), FleetError> {
        self.runtime.update_image(bot_id, previous_image).await?;
        if was_running {
            self.runtime.start(bot_id).await?;
        }
        Ok(())
    }

    /// Polls `inspect` every 5 s for up to 60 s.
    async fn wait_for_healthy(&self, bot_id: Uuid) -> Result<(), FleetError> {
        let deadline = Duration::from_secs(60);
        let step = Duration::from_secs(5);
        let mut waited = Duration::ZERO;

        loop {
            let inspect = self.runtime.inspect(bot_id).await?;
            match inspect.health {
                Health::Healthy | Health::NoHealthCheck => return Ok(()),
                Health::Unhealthy => {
                    return Err(FleetError::NotFound(format!("bot {bot_id} reported unhealthy")));
                }
                Health::Starting => {}
            }

            if waited >= deadline {
                return Err(FleetError::NotFound(format!("bot {bot_id} health check timed out")));
            }
            sleep(step).await;
            waited += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeRegistry(&'static str);

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn resolve_digest(&self, _image: &str) -> Result<String, FleetError> {
            Ok(self.0.to_string())
        }
    }

    struct AlwaysHealthyRuntime {
        updates: AtomicU32,
    }

    #[async_trait]
    impl FleetRuntime for AlwaysHealthyRuntime {
        async fn inspect(&self, _bot_id: Uuid) -> Result<InspectResult, FleetError> {
            Ok(InspectResult { running_digest: Some("sha256:old".into()), health: Health::Healthy })
        }
        async fn pull(&self, _image: &str) -> Result<(), FleetError> {
            Ok(())
        }
        async fn update_image(&self, _bot_id: Uuid, _image: &str) -> Result<(), FleetError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn start(&self, _bot_id: Uuid) -> Result<(), FleetError> {
            Ok(())
        }
    }

    struct FailingPullRuntime;

    #[async_trait]
    impl FleetRuntime for FailingPullRuntime {
        async fn inspect(&self, _bot_id: Uuid) -> Result<InspectResult, FleetError> {
            Ok(InspectResult { running_digest: Some("sha256:old".into()), health: Health::Healthy })
        }
        async fn pull(&self, _image: &str) -> Result<(), FleetError> {
            Err(FleetError::NotFound("registry unreachable".into()))
        }
        async fn update_image(&self, _bot_id: Uuid, _image: &str) -> Result<(), FleetError> {
            Ok(())
        }
        async fn start(&self, _bot_id: Uuid) -> Result<(), FleetError> {
            Ok(())
        }
    }

    #[test]
    fn poll_interval_matches_channel_cadence() {
        assert_eq!(poll_interval(ReleaseChannel::Canary), Some(Duration::from_secs(300)));
        assert_eq!(poll_interval(ReleaseChannel::Pinned), None);
    }

    #[tokio::test]
    async fn detects_digest_change() {
        let poller = ImagePoller::new(Arc::new(FakeRegistry("sha256:new")));
        let update = poller.check_for_update("acme/bot:stable", Some("sha256:old")).await.unwrap();
        assert_eq!(update, Some("sha256:new".into()));

        let no_update = poller.check_for_update("acme/bot:stable", Some("sha256:new")).await.unwrap();
        assert_eq!(no_update, None);
    }

    #[tokio::test]
    async fn successful_update_applies_new_image() {
        let runtime = Arc::new(AlwaysHealthyRuntime { updates: AtomicU32::new(0) });
        let updater = ImageUpdater::new(runtime.clone());
        let outcome = updater.update_bot(Uuid::new_v4(), "sha256:old", "sha256:new").await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.rolled_back);
        assert_eq!(runtime.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_pull_rolls_back() {
        let updater = ImageUpdater::new(Arc::new(FailingPullRuntime));
        let outcome = updater.update_bot(Uuid::new_v4(), "sha256:old", "sha256:new").await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.rolled_back);
    }

    #[tokio::test]
    async fn concurrent_update_on_same_bot_is_rejected() {
        let runtime = Arc::new(AlwaysHealthyRuntime { updates: AtomicU32::new(0) });
        let updater = Arc::new(ImageUpdater::new(runtime));
        let bot_id = Uuid::new_v4();

        let lock = updater.lock_for(bot_id).await;
        let _held = lock.lock().await;

        let err = updater.update_bot(bot_id, "sha256:old", "sha256:new").await;
        assert!(matches!(err, Err(FleetError::UpdateInProgress(_))));
    }
}
