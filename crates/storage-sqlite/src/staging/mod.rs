//! SQLite storage implementation for staged entities.

mod model;
mod repository;

pub use model::StagedEntityDB;
pub use repository::StagedEntityRepository;
