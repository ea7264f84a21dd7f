//! Publishing module - broker messages, the publisher seam and the handler
//! that turns staging events into confirmed publishes.

mod alert;
mod event_handler;
mod publishing_model;
mod publishing_traits;

pub use alert::{AlertSink, LogAlertSink, MockAlertSink, PublishFailure};
pub use event_handler::{PublishSettings, StagedEventHandler};
pub use publishing_model::{compute_message_id, PublishAck, QueueName, StageMessage};
pub use publishing_traits::{EventHandlerTrait, MessagePublisherTrait};
