//! Domain events module.
//!
//! Provides the staged-entity event type and the sink trait command handlers
//! emit into after a write commits. Runtime adapters implement the sink to
//! route events to the publishing handler.

mod domain_event;
mod sink;

pub use domain_event::*;
pub use sink::*;
