//! The central [`InterruptionEvent`] record and its supporting enums.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::DrainTask;

/// The kind of disruption an [`InterruptionEvent`] represents.
///
/// Each variant corresponds to one upstream notification shape; see
/// `draind-sources` for the producers of each kind.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A spot/preemptible instance interruption notice.
    SpotInterruption,
    /// A provider-scheduled maintenance window (reboot, retirement, stop).
    ScheduledEvent,
    /// A non-binding advisory that the instance is likely to be reclaimed soon.
    RebalanceRecommendation,
    /// A generic instance state-change notification from the message queue.
    StateChange,
    /// An autoscaling-group terminate lifecycle hook.
    AsgTerminateLifecycle,
    /// An autoscaling-group launch lifecycle hook.
    AsgLaunchLifecycle,
}

impl EventKind {
    /// Whether this kind of event is ever expected to drive a node drain.
    ///
    /// `AsgLaunchLifecycle` never drains — it only waits for node readiness
    /// (see spec §4.4, "Launch-lifecycle specialisation").
    #[must_use]
    pub fn drains_node(self) -> bool {
        !matches!(self, EventKind::AsgLaunchLifecycle)
    }
}

/// A snapshot of a pod's identity, captured at ingest so that webhook
/// context and post-drain tasks still have something to report after the
/// pod has actually been evicted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRef {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
}

/// Opaque handle needed to acknowledge (delete) a queue-sourced message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAckHandle {
    /// Provider-specific receipt/ack token.
    pub receipt_handle: String,
}

/// Identifiers needed to complete or heartbeat an ASG lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleHookRef {
    /// Autoscaling group name.
    pub auto_scaling_group_name: String,
    /// Lifecycle hook name.
    pub lifecycle_hook_name: String,
    /// The EC2 instance id the hook is pausing.
    pub instance_id: String,
    /// Opaque continuation token echoed back on completion/heartbeat.
    pub lifecycle_action_token: Option<String>,
}

/// The central interruption record. See spec §3 ("Data Model") for the
/// full field-level contract and invariants.
///
/// `EventID` uniquely keys the [`draind_store`](../draind_store/index.html)
/// (not a real intra-doc link — see `draind-store::Store`) map; a second
/// insert with the same id is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionEvent {
    /// Globally unique id. Derived from a stable hash of the raw payload
    /// for sources without a natural id (see `draind-sources`).
    pub event_id: String,
    /// The kind of disruption.
    pub kind: EventKind,
    /// Human-readable description, suitable for webhook/recorder context.
    pub description: String,
    /// Source-supplied status string (e.g. `"active"`, `"canceled"`,
    /// `"completed"`). Distinguishes active/canceled/completed upstream.
    pub state: String,
    /// Cluster-local node name, resolved at ingest when possible.
    pub node_name: Option<String>,
    /// Cloud instance id, used when `node_name` resolution is deferred.
    pub instance_id: Option<String>,
    /// Cloud provider id (e.g. `aws:///us-east-1a/i-0123...`).
    pub provider_id: Option<String>,
    /// Absolute instant the disruption is expected to begin. The drain
    /// deadline is derived from this minus the node grace period.
    pub start_time: DateTime<Utc>,
    /// End of the disruption window, when meaningful (scheduled events).
    pub end_time: Option<DateTime<Utc>>,
    /// Node labels snapshotted at ingest, used as a fallback when a later
    /// label fetch fails.
    pub node_labels: BTreeMap<String, String>,
    /// Pods snapshotted at ingest, used as webhook/post-task context after
    /// eviction has already removed them from the live node.
    pub pods: Vec<PodRef>,
    /// Task to run before cordon/drain, bound at ingest.
    pub pre_drain_task: Option<DrainTask>,
    /// Task to run after cordon/drain, bound at ingest.
    pub post_drain_task: Option<DrainTask>,
    /// Set true when the Handler begins work on this event.
    pub in_progress: bool,
    /// Set true after a terminal success for this node.
    pub node_processed: bool,
    /// Acknowledgement handle for queue-sourced events.
    pub queue_ack: Option<QueueAckHandle>,
    /// Lifecycle-hook identifiers for lifecycle-sourced events.
    pub lifecycle_hook: Option<LifecycleHookRef>,
}

impl InterruptionEvent {
    /// Build a minimal event with the given id, kind, and start time. Every
    /// other field defaults to empty/`None`/`false`; sources fill in the
    /// rest before pushing onto the interruption channel.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        kind: EventKind,
        description: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            kind,
            description: description.into(),
            state: String::new(),
            node_name: None,
            instance_id: None,
            provider_id: None,
            start_time,
            end_time: None,
            node_labels: BTreeMap::new(),
            pods: Vec::new(),
            pre_drain_task: None,
            post_drain_task: None,
            in_progress: false,
            node_processed: false,
            queue_ack: None,
            lifecycle_hook: None,
        }
    }

    /// True when the source-supplied state marks this event as no longer
    /// active (canceled or completed upstream).
    #[must_use]
    pub fn is_terminal_state(&self) -> bool {
        matches!(self.state.as_str(), "canceled" | "completed")
    }
}

/// A cancellation signal produced by an [`EventSource`](crate::source::EventSource)
/// when it observes that a previously-reported event is no longer active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelEvent {
    /// The id of the event to remove from the store.
    pub event_id: String,
}
