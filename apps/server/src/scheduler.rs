//! Background scheduler for periodic sync passes.

use std::sync::Arc;

use livesync_core::sync::SyncServiceTrait;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Starts the periodic sync. The first pass runs immediately so anything left
/// STAGED by a previous run is republished on startup.
///
/// Returns `None` when `every` is `None` (scheduler disabled).
pub fn start_sync_scheduler(
    sync_service: Arc<dyn SyncServiceTrait>,
    every: Option<Duration>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let Some(period) = every else {
        info!("Sync scheduler disabled");
        return None;
    };

    Some(tokio::spawn(async move {
        info!("Sync scheduler started ({}s interval)", period.as_secs());
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticks.tick() => {}
            }
            // A pass in progress finishes before the scheduler stops.
            run_scheduled_sync(sync_service.as_ref()).await;
        }
        info!("Sync scheduler stopped");
    }))
}

/// Runs a single scheduled sync pass.
async fn run_scheduled_sync(sync_service: &dyn SyncServiceTrait) {
    match sync_service.sync().await {
        Ok(report) if report.is_clean() => {
            info!("Scheduled sync: {} entities already synced", report.already_synced)
        }
        Ok(report) => {
            info!(
                "Scheduled sync: {} republished, {} already synced, {} failed, {} unclassified",
                report.republished,
                report.already_synced,
                report.failed,
                report.unclassified.len()
            );
            for entity in &report.unclassified {
                warn!(
                    "Unclassified {} '{}' ({}): {}",
                    entity.kind, entity.id, entity.status, entity.reason
                );
            }
        }
        Err(e) => warn!("Scheduled sync failed: {}", e),
    }
}
