//! Domain events runtime bridge for the server.
//!
//! Command services emit domain events into a [`ChannelDomainEventSink`]; a
//! background dispatch worker hands each event to the publishing handler,
//! which publishes it to its routed queue and records the outcome.

mod dispatch_worker;
mod sink;

pub use sink::ChannelDomainEventSink;
