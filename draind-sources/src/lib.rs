#![deny(missing_docs)]
//! Concrete [`EventSource`](draind_types::EventSource) implementations: the
//! instance-metadata pollers (spot, scheduled, rebalance, lifecycle-state)
//! and the interruption queue long-poller. One crate per backend, each
//! implementing the shared `EventSource` trait.

mod hash;
pub mod metadata;
pub mod queue;

pub use metadata::{RebalanceRecommendationSource, ScheduledEventSource, SpotInterruptionSource, TargetLifecycleStateSource};
pub use queue::QueueSource;
