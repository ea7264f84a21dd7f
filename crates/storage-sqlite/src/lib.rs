//! SQLite storage implementation for the livesync staging pipeline.
//!
//! This crate provides all database-related functionality using Diesel ORM with SQLite.
//! It implements the repository traits defined in `livesync-core` and contains:
//! - Database connection pooling and management
//! - Diesel migrations
//! - The single writer actor serialising all writes
//! - The staged entity repository and its database model
//!
//! # Architecture
//!
//! This crate is the only place in the workspace where Diesel dependencies exist.
//!
//! ```text
//!   core (domain)        messaging (broker)
//!        │                      │
//!        ▼                      │
//!  storage-sqlite (this crate)  │
//!        │                      │
//!        ▼                      ▼
//!    SQLite DB               broker
//! ```

pub mod db;
pub mod errors;
pub mod schema;
pub mod staging;

// Re-export database utilities
pub use db::{
    create_pool, get_connection, init, run_migrations, spawn_writer, DbConnection, DbPool,
    WriteHandle,
};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

pub use staging::StagedEntityRepository;

// Re-export from livesync-core for convenience
pub use livesync_core::errors::{DatabaseError, Error, Result};
