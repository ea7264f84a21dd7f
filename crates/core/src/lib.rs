//! Livesync Core - staging commands, domain events, publishing and sync.
//!
//! This crate holds the business rules of the staging pipeline. It is
//! store- and broker-agnostic: persistence is implemented by the
//! `storage-sqlite` crate and message delivery by the `messaging` crate,
//! both through the traits defined here.

pub mod constants;
pub mod errors;
pub mod events;
pub mod publishing;
pub mod staging;
pub mod sync;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the entity model, it is used by every layer
pub use staging::{EntityKind, StagedEntity, StagingStatus};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
