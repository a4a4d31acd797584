#![deny(missing_docs)]
//! Thin HTTP collaborators for the cloud side of draind: instance metadata
//! (IMDSv2), the interruption message queue, and autoscaling lifecycle
//! actions. Each wraps a `reqwest::Client` field, a status-code-to-error
//! mapping module, and `tracing` instrumentation at the call sites.

mod backoff;
mod error;
pub mod imds;
pub mod lifecycle;
pub mod queue;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backoff::retry_with_backoff;
pub use error::map_reqwest_error;
pub use imds::{CachedToken, ImdsClient};
pub use lifecycle::{LifecycleClient, LifecycleHttpClient};
pub use queue::{QueueClient, QueueMessage, SqsLikeQueueClient};
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::{FakeLifecycleClient, FakeQueueClient};
