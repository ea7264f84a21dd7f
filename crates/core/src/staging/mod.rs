//! Staging module - entity model, status graph, commands and queries.

mod command_service;
mod query_service;
mod staging_model;
mod staging_status;
mod staging_traits;
pub mod staging_validation;

pub use command_service::StageCommandService;
pub use query_service::StageQueryService;
pub use staging_model::*;
pub use staging_status::StagingStatus;
pub use staging_traits::*;
