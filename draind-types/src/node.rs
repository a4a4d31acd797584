//! The `NodeClient` protocol — cluster mutation primitives the Handler
//! drives. Deliberately thin: cordon/drain/taint semantics live in the
//! implementation (`draind-node`), not here.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::NodeError;
use crate::reason::EventReason;

/// Taint effect, mirroring the Kubernetes `NoSchedule` / `PreferNoSchedule`
/// / `NoExecute` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaintEffect {
    /// Repel new pods; existing pods are unaffected.
    NoSchedule,
    /// Prefer not to schedule new pods here.
    PreferNoSchedule,
    /// Evict pods that do not tolerate the taint.
    NoExecute,
}

impl TaintEffect {
    /// The Kubernetes API string for this effect.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
        }
    }
}

/// Options controlling a `cordon_and_drain` call.
#[derive(Debug, Clone)]
pub struct DrainOptions {
    /// Force-delete pods that do not respond to graceful deletion.
    pub force: bool,
    /// Evict pods owned by DaemonSets too.
    pub ignore_all_daemon_sets: bool,
    /// Delete pods using `emptyDir` volumes.
    pub delete_empty_dir_data: bool,
    /// Per-pod grace period in seconds; negative means "use the pod's own
    /// `terminationGracePeriodSeconds`".
    pub pod_termination_grace_period: i64,
    /// Overall timeout for the whole drain, in seconds.
    pub node_termination_grace_period: u64,
}

/// The cluster mutation primitives the Handler needs. Implementations are
/// assumed idempotent where it matters: re-cordoning is a no-op, re-tainting
/// replaces the value (spec §6).
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch a node's labels. Returns `NodeError::NotFound` if the node is
    /// gone from the cluster.
    async fn get_node_labels(&self, node_name: &str) -> Result<BTreeMap<String, String>, NodeError>;

    /// List the names (and namespaces) of pods currently scheduled on the
    /// node.
    async fn list_pod_names_on_node(&self, node_name: &str) -> Result<Vec<String>, NodeError>;

    /// Resolve a node name from a cloud provider id, by substring match on
    /// the node's recorded `providerID`.
    async fn node_name_from_provider_id(&self, provider_id: &str) -> Result<Option<String>, NodeError>;

    /// Resolve a node name by an exact label match (e.g. the queue source's
    /// "node label equal to the instance id" lookup, spec §4.1).
    async fn node_name_by_label(&self, key: &str, value: &str) -> Result<Option<String>, NodeError>;

    /// True if the node exists in the cluster and has condition
    /// `Ready=True`.
    async fn is_node_ready(&self, node_name: &str) -> Result<bool, NodeError>;

    /// Mark a node unschedulable, without evicting existing pods.
    async fn cordon(&self, node_name: &str, reason: &str) -> Result<(), NodeError>;

    /// Cordon, then evict every evictable pod under `opts`.
    async fn cordon_and_drain(&self, node_name: &str, reason: &str, opts: &DrainOptions) -> Result<(), NodeError>;

    /// Reverse of cordon.
    async fn uncordon(&self, node_name: &str) -> Result<(), NodeError>;

    /// Add or overwrite a label.
    async fn add_label(&self, node_name: &str, key: &str, value: &str) -> Result<(), NodeError>;

    /// Remove a label if present.
    async fn remove_label(&self, node_name: &str, key: &str) -> Result<(), NodeError>;

    /// Add (or replace) a taint.
    async fn add_taint(&self, node_name: &str, key: &str, value: &str, effect: TaintEffect) -> Result<(), NodeError>;

    /// Remove a taint by key.
    async fn remove_taint(&self, node_name: &str, key: &str) -> Result<(), NodeError>;

    /// Apply the `node.kubernetes.io/out-of-service` taint so the cloud
    /// provider can safely detach volumes before the instance disappears.
    async fn taint_out_of_service(&self, node_name: &str) -> Result<(), NodeError>;

    /// Emit a Kubernetes Event on the node object with the given reason and
    /// formatted message (spec §7: "every significant transition emits a
    /// recorder event").
    async fn record_event(&self, node_name: &str, reason: EventReason, message: &str);
}
