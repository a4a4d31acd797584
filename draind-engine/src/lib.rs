#![deny(missing_docs)]
//! The orchestration engine: Dispatcher, Drain Handler, and Heartbeat
//! Scheduler (spec §4.3–§4.5). These are the three cooperative tasks that
//! turn sourced events into cluster mutations and cloud acknowledgements.

mod dispatcher;
mod handler;
mod heartbeat;

pub use dispatcher::Dispatcher;
pub use handler::{Handler, HandlerConfig};
pub use heartbeat::HeartbeatScheduler;
