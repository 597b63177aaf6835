// [crates/wopr-fleet/src/lib.rs]
//! Fleet orchestration: node connection lifecycle, placement policy,
//! heartbeat watchdog, recovery orchestration, orphan cleanup, and
//! image polling/updating.

pub mod connection_manager;
pub mod errors;
pub mod image_poller;
pub mod orphan;
pub mod placement;
pub mod recovery;
pub mod watchdog;

pub use connection_manager::{ConnectionManager, NodeRegistration, OrphanCleanupTrigger};
pub use errors::FleetError;
pub use image_poller::{
    should_apply_update, FleetRuntime, Health, ImagePoller, ImageUpdater, InspectResult,
    RegistryClient, UpdateOutcome,
};
pub use orphan::{CleanReport, OrphanCleaner};
pub use placement::find_placement;
pub use recovery::RecoveryOrchestrator;
pub use watchdog::{HeartbeatWatchdog, RecoveryInvoker, WatchdogConfig};
