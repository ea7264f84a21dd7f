//! Operator alerts raised when publishing gives up.

use std::sync::{Arc, Mutex};

use log::error;

use super::publishing_model::QueueName;
use crate::staging::EntityKind;

/// A publish that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishFailure {
    pub kind: EntityKind,
    pub entity_id: String,
    pub queue: QueueName,
    pub attempts: u32,
    pub reason: String,
    /// False when the entity was left STAGED for the next sync pass.
    pub marked_failed: bool,
}

pub trait AlertSink: Send + Sync {
    fn publish_failed(&self, failure: &PublishFailure);
}

/// Default sink: an error-level log line per failure.
#[derive(Clone, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn publish_failed(&self, failure: &PublishFailure) {
        error!(
            "ALERT publish of {} '{}' to '{}' gave up after {} attempt(s) (marked_failed={}): {}",
            failure.kind,
            failure.entity_id,
            failure.queue,
            failure.attempts,
            failure.marked_failed,
            failure.reason
        );
    }
}

/// Mock sink for testing - collects raised alerts.
#[derive(Clone, Default)]
pub struct MockAlertSink {
    failures: Arc<Mutex<Vec<PublishFailure>>>,
}

impl MockAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<PublishFailure> {
        self.failures.lock().unwrap().clone()
    }
}

impl AlertSink for MockAlertSink {
    fn publish_failed(&self, failure: &PublishFailure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
}
