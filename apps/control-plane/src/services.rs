// [apps/control-plane/src/services.rs]
//! Background daemons spawned alongside the axum server: the heartbeat
//! watchdog (owns its own interval loop already), the scheduled
//! auto-topup pass, and the alert checker poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;
use wopr_fleet::image_poller::poll_interval;
use wopr_fleet::{should_apply_update, FleetRuntime};

use crate::state::AppState;

const AUTOTOPUP_SCAN_INTERVAL: Duration = Duration::from_secs(60);
const ALERT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Finest per-channel cadence (`poll_interval(Canary)`); every other
/// channel is checked on a multiple of this tick, gated by its own
/// last-checked timestamp.
const IMAGE_POLL_TICK: Duration = Duration::from_secs(5 * 60);

/// Spawns every long-running background task and returns their handles
/// so the caller can hold them for the life of the process (dropping a
/// `JoinHandle` detaches the task rather than stopping it, but keeping
/// them around makes an eventual graceful-shutdown join possible).
pub fn spawn_all(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    vec![
        state.watchdog.clone().spawn(),
        spawn_autotopup_scheduler(state.clone()),
        spawn_alert_checker(state.clone()),
        spawn_image_poll_cycle(state),
    ]
}

fn spawn_autotopup_scheduler(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(AUTOTOPUP_SCAN_INTERVAL);
        loop {
            ticker.tick().await;
            match state.autotopup.run_scheduled_pass(Utc::now()).await {
                Ok(count) if count > 0 => tracing::info!("scheduled auto-topup pass charged {count} tenant(s)"),
                Ok(_) => {}
                Err(e) => warn!("scheduled auto-topup pass failed: {}", e),
            }
        }
    })
}

fn spawn_alert_checker(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ALERT_CHECK_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = state.alert_checker.check().await {
                warn!("alert check failed: {}", e);
            }
        }
    })
}

/// Walks every declared profile each tick, skipping any whose channel
/// cadence (`poll_interval`) hasn't elapsed since it was last checked.
/// A bot with no prior check is always due. Pinned bots are never
/// polled; `Manual` and `Cron` policies get a digest check logged but
/// no automatic `update_bot` call — only `OnPush` and in-window
/// `Nightly` bots are applied automatically.
fn spawn_image_poll_cycle(state: Arc<AppState>) -> JoinHandle<()> {
    let last_checked: Mutex<HashMap<Uuid, Instant>> = Mutex::new(HashMap::new());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(IMAGE_POLL_TICK);
        loop {
            ticker.tick().await;

            let profiles = match state.profiles.list().await {
                Ok(p) => p,
                Err(e) => {
                    warn!("image poll cycle: could not list profiles: {}", e);
                    continue;
                }
            };

            for profile in profiles {
                let Some(interval) = poll_interval(profile.release_channel) else { continue };

                let due = {
                    let mut guard = last_checked.lock().await;
                    let now = Instant::now();
                    let due = guard.get(&profile.id).map_or(true, |last| now.duration_since(*last) >= interval);
                    if due {
                        guard.insert(profile.id, now);
                    }
                    due
                };
                if !due {
                    continue;
                }

                let inspect = match state.fleet_runtime.inspect(profile.id).await {
                    Ok(i) => i,
                    Err(e) => {
                        warn!("image poll: inspect failed for bot {}: {}", profile.id, e);
                        continue;
                    }
                };

                let update = match state
                    .image_poller
                    .check_for_update(&profile.image, inspect.running_digest.as_deref())
                    .await
                {
                    Ok(u) => u,
                    Err(e) => {
                        warn!("image poll: registry check failed for bot {}: {}", profile.id, e);
                        continue;
                    }
                };
                let Some(new_digest) = update else { continue };

                info!("bot {} has a new image digest available: {}", profile.id, new_digest);
                if !should_apply_update(&profile.update_policy, Utc::now()) {
                    continue;
                }

                let previous = inspect.running_digest.unwrap_or_else(|| profile.image.clone());
                match state.image_updater.update_bot(profile.id, &previous, &profile.image).await {
                    Ok(outcome) if outcome.success => info!("bot {} updated to latest image", profile.id),
                    Ok(outcome) => warn!(
                        "bot {} update failed (rolled_back={}): {:?}",
                        profile.id, outcome.rolled_back, outcome.error
                    ),
                    Err(e) => error!("bot {} update_bot call failed: {}", profile.id, e),
                }
            }
        }
    })
}
