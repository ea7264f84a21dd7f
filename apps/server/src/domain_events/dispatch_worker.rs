//! Event dispatch worker.
//!
//! Receives events from an mpsc channel and hands each one to the publishing
//! handler. Handlers run concurrently up to a fixed limit so that one entity
//! stuck in publish backoff does not hold back the others.

use std::sync::Arc;

use livesync_core::events::DomainEvent;
use livesync_core::publishing::EventHandlerTrait;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::task::TaskTracker;

/// Runs until the channel is closed and every received event was handled.
pub async fn event_dispatch_worker(
    mut rx: mpsc::UnboundedReceiver<DomainEvent>,
    handler: Arc<dyn EventHandlerTrait>,
    concurrency: usize,
) {
    tracing::info!("Domain event dispatch worker started");

    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let tasks = TaskTracker::new();

    while let Some(event) = rx.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let handler = Arc::clone(&handler);
        tasks.spawn(async move {
            dispatch(handler.as_ref(), &event).await;
            drop(permit);
        });
    }

    tasks.close();
    if !tasks.is_empty() {
        tracing::info!("Waiting for {} in-flight event(s) to settle", tasks.len());
    }
    tasks.wait().await;
    tracing::info!("Domain event dispatch worker shutting down");
}

async fn dispatch(handler: &dyn EventHandlerTrait, event: &DomainEvent) {
    match handler.handle(event).await {
        Ok(ack) => tracing::debug!(
            "{} for '{}' confirmed on '{}' (tag {})",
            event.name(),
            event.entity_id(),
            ack.queue,
            ack.delivery_tag
        ),
        // The handler already recorded the outcome; the next sync picks it up.
        Err(e) => tracing::warn!(
            "{} for '{}' was not published: {}",
            event.name(),
            event.entity_id(),
            e
        ),
    }
}
