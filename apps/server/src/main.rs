use livesync_server::config::Config;
use livesync_server::scheduler::start_sync_scheduler;
use livesync_server::{build_state, init_tracing};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);
    let state = build_state(&config).await?;

    let shutdown = CancellationToken::new();
    let scheduler = start_sync_scheduler(
        state.sync_service.clone(),
        config.sync_interval,
        shutdown.clone(),
    );

    tracing::info!("livesync is running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    shutdown.cancel();
    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.await {
            tracing::error!("Sync scheduler failed: {}", e);
        }
    }
    state.shutdown().await;
    tracing::info!("livesync stopped");
    Ok(())
}
