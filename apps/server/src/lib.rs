pub mod config;
pub mod domain_events;
pub mod scheduler;
mod main_lib;

pub use main_lib::{build_state, build_state_with_broker, init_tracing, AppState};
