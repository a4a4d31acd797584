//! Pre/post-drain tasks, modeled as a tagged variant rather than a boxed
//! closure (spec §9, "Design Notes — Pre/post tasks as closures").
//!
//! `InterruptionEvent` must be `Clone` and safe to hold behind the store's
//! `RwLock`, so a closure would need its own hand-rolled `Clone` impl. The
//! tagged enum gives that for free and the Handler dispatches on it with a
//! plain `match`.

use serde::{Deserialize, Serialize};

use crate::event::LifecycleHookRef;

/// The terminal result reported to a cloud lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleResult {
    /// Allow the cloud-side action (e.g. termination) to proceed.
    Continue,
    /// Abandon the lifecycle action.
    Abandon,
}

impl LifecycleResult {
    /// The wire value the lifecycle API expects.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleResult::Continue => "CONTINUE",
            LifecycleResult::Abandon => "ABANDON",
        }
    }
}

/// A task bound to an event at ingest time and executed by the Handler
/// before or after the cordon/drain step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrainTask {
    /// Mark the node so it is uncordoned once it comes back after a
    /// provider-scheduled reboot (labels + taint applied by the pre-drain
    /// step; removed by the uncordon path once the node rejoins Ready).
    UncordonAfterReboot,

    /// Taint the node with a rebalance marker instead of draining it
    /// (spec §4.4, "Rebalance specialisation").
    RebalanceTaint,

    /// Complete a cloud lifecycle hook with the given result. Used by the
    /// post-drain task of terminate-lifecycle events, after a successful
    /// drain, and optionally paired with deleting the queue message that
    /// carried the hook.
    CompleteLifecycle {
        /// The hook to complete.
        hook: LifecycleHookRef,
        /// `CONTINUE` on successful drain, `ABANDON` if the node never
        /// became ready in time (launch-lifecycle) or drain failed fatally.
        result: LifecycleResult,
        /// Delete the queue message carrying this hook once completed.
        delete_queue_message: Option<String>,
    },

    /// Delete a queue message without touching any lifecycle hook (plain
    /// state-change / spot / scheduled events sourced from the queue).
    DeleteQueueMessage {
        /// The receipt handle to delete.
        receipt_handle: String,
    },

    /// Poll for node existence + `Ready`, then complete the hook with
    /// `CONTINUE` (launch-lifecycle specialisation, spec §4.4). Does not
    /// drain.
    AwaitNodeReadyThenComplete {
        /// The hook to complete once the node is ready.
        hook: LifecycleHookRef,
        /// Delete this queue message once the hook is completed.
        delete_queue_message: Option<String>,
    },
}
