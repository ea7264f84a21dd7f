//! Sync module - reconciles the store with the broker by republishing every
//! entity that has not reached it.

mod sync_model;
mod sync_service;

pub use sync_model::*;
pub use sync_service::{SyncService, SyncServiceTrait};
