//! Channel-backed domain event sink.

use std::sync::{Arc, Mutex};

use livesync_core::events::{DomainEvent, DomainEventSink};
use livesync_core::publishing::EventHandlerTrait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::dispatch_worker::event_dispatch_worker;

/// Domain event sink for the server runtime.
///
/// `emit()` only pushes onto an unbounded channel; a background worker
/// publishes the events.
///
/// # Two-Phase Initialization
///
/// The command service needs the sink and the publishing handler is built
/// afterwards, so the sink is created first with `new()` and the worker is
/// started with `start_worker()` once the handler exists. Events emitted in
/// between are buffered.
pub struct ChannelDomainEventSink {
    tx: Mutex<Option<mpsc::UnboundedSender<DomainEvent>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<DomainEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelDomainEventSink {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }

    /// Starts the dispatch worker. Later calls are ignored.
    pub fn start_worker(&self, handler: Arc<dyn EventHandlerTrait>, concurrency: usize) {
        let Some(rx) = lock(&self.rx).take() else {
            tracing::warn!("Domain event dispatch worker already started");
            return;
        };
        let handle = tokio::spawn(event_dispatch_worker(rx, handler, concurrency));
        *lock(&self.worker) = Some(handle);
    }

    /// Closes the channel and waits until every queued event was handled.
    ///
    /// Events emitted after this call are dropped; they stay STAGED and the
    /// next sync publishes them.
    pub async fn shutdown(&self) {
        lock(&self.tx).take();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("Domain event dispatch worker failed: {}", e);
            }
        }
    }
}

impl Default for ChannelDomainEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainEventSink for ChannelDomainEventSink {
    fn emit(&self, event: DomainEvent) {
        let guard = lock(&self.tx);
        match guard.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.send(event) {
                    tracing::warn!("Dropped domain event, dispatch worker is gone: {}", e.0.name());
                }
            }
            None => tracing::debug!("Dropped {} after shutdown", event.name()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
