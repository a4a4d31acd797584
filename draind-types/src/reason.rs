//! The fixed reason enumeration for node recorder events (spec §7: "every
//! significant transition emits a recorder event on the relevant node with
//! a reason from a fixed enumeration").

use serde::{Deserialize, Serialize};

/// A reason code attached to a [`NodeClient::record_event`](crate::node::NodeClient::record_event)
/// call.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventReason {
    /// The node was cordoned.
    Cordon,
    /// The node was cordoned and drained.
    CordonAndDrain,
    /// The node was uncordoned.
    Uncordon,
    /// A pre-drain task ran (successfully or not).
    PreDrainTask,
    /// A post-drain task ran (successfully or not).
    PostDrainTask,
    /// The webhook notifier failed; the drain flow continued anyway.
    WebhookFailed,
    /// An event source or dispatcher tick hit a non-fatal error.
    MonitorError,
    /// The node was tainted with the rebalance marker instead of drained.
    RebalanceTaint,
    /// A cloud lifecycle hook was completed.
    LifecycleCompleted,
    /// A heartbeat extension to a lifecycle hook failed; retried next tick.
    HeartbeatFailed,
}

impl EventReason {
    /// Whether this reason represents a warning/error rather than routine
    /// progress, for log-level selection.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            EventReason::WebhookFailed | EventReason::MonitorError | EventReason::HeartbeatFailed
        )
    }
}
