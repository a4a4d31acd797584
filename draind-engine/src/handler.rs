//! The Drain Handler: resolves a node, runs pre/post tasks, and drives the
//! cordon/drain decision for one active event at a time (spec §4.4).
//!
//! Pre/post-task steps fire around the fallible cordon/drain step and run
//! regardless of each other's failure; a worker-pool semaphore plus a
//! per-node mutex table bound parallelism so no node is ever drained twice
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use draind_cloud::{LifecycleClient, QueueClient};
use draind_metrics::Metrics;
use draind_store::Store;
use draind_types::{DrainOptions, DrainTask, EventKind, EventReason, InterruptionEvent, LifecycleResult, NodeClient, NodeError};
use draind_webhook::Notifier;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::heartbeat::HeartbeatScheduler;

/// Tuning knobs the handler reads from `EngineConfig` (spec §6 "Operational
/// surface"), copied rather than borrowed so the handler does not need a
/// lifetime tied to the config.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Suppresses the drain step; nodes are cordoned only.
    pub cordon_only: bool,
    /// Rebalance-recommendation draining is enabled.
    pub enable_rebalance_draining: bool,
    /// Rebalance-recommendation monitoring (tainting without draining) is enabled.
    pub enable_rebalance_monitoring: bool,
    /// Any queue-sourced draining path is enabled.
    pub enable_queue_processing: bool,
    /// Delete queue message / complete-with-not-found when the node is absent.
    pub delete_sqs_msg_if_node_not_found: bool,
    /// Apply the out-of-service taint after a successful, non-cordon-only drain.
    pub enable_out_of_service_taint: bool,
    /// Width of the worker pool.
    pub workers: usize,
    /// Per-pod grace seconds; negative means "use the pod's own value".
    pub pod_termination_grace_period: i64,
    /// Overall per-node drain timeout, in seconds.
    pub node_termination_grace_period: u64,
    /// Lifecycle heartbeat pacing.
    pub heartbeat_interval_secs: u64,
    /// Lifecycle heartbeat total budget.
    pub heartbeat_until_secs: u64,
}

/// Per-node mutex table. Entries are never evicted: cardinality is bounded
/// by cluster size (spec §9, "Design Notes — per-node mutexes").
#[derive(Default)]
struct NodeLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NodeLocks {
    async fn acquire(&self, node_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(node_name.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Drives the cordon/drain decision for active events, bounded by a
/// worker-pool semaphore and a per-node mutex.
pub struct Handler {
    store: Arc<Store>,
    node_client: Arc<dyn NodeClient>,
    queue_client: Option<Arc<dyn QueueClient>>,
    lifecycle_client: Option<Arc<dyn LifecycleClient>>,
    notifier: Option<Arc<dyn Notifier>>,
    metrics: Arc<Metrics>,
    config: HandlerConfig,
    semaphore: Arc<Semaphore>,
    node_locks: NodeLocks,
    gate: Arc<Notify>,
}

impl Handler {
    /// Build a handler against its collaborators. `gate` is the same
    /// `Notify` the Dispatcher wakes on every insert and drain-actionable
    /// tick.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        node_client: Arc<dyn NodeClient>,
        queue_client: Option<Arc<dyn QueueClient>>,
        lifecycle_client: Option<Arc<dyn LifecycleClient>>,
        notifier: Option<Arc<dyn Notifier>>,
        metrics: Arc<Metrics>,
        config: HandlerConfig,
        gate: Arc<Notify>,
    ) -> Arc<Self> {
        let workers = config.workers.max(1);
        Arc::new(Self {
            store,
            node_client,
            queue_client,
            lifecycle_client,
            notifier,
            metrics,
            config,
            semaphore: Arc::new(Semaphore::new(workers)),
            node_locks: NodeLocks::default(),
            gate,
        })
    }

    /// Run until `stop` is cancelled: wait for a wake-up, then drain every
    /// currently-active event, spawning one task per event bounded by the
    /// worker-pool semaphore.
    pub async fn run(self: Arc<Self>, stop: CancellationToken) {
        loop {
            tokio::select! {
                () = stop.cancelled() => return,
                () = self.gate.notified() => {}
            }

            while let Some(evt) = self.store.get_active().await {
                self.store.mark_in_progress(&evt.event_id).await;
                let permit = match self.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let this = self.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    this.process(evt, stop).await;
                    drop(permit);
                });
            }
        }
    }

    async fn process(&self, evt: InterruptionEvent, stop: CancellationToken) {
        let Some(node_name) = evt.node_name.clone() else {
            tracing::warn!(event_id = %evt.event_id, "event has no resolvable node name, canceling");
            self.store.cancel(&evt.event_id).await;
            return;
        };

        let lock = self.node_locks.acquire(&node_name).await;
        let _guard = lock.lock().await;

        if evt.kind == EventKind::AsgLaunchLifecycle {
            self.process_launch_lifecycle(evt, &node_name, stop).await;
            return;
        }

        let heartbeat = evt.lifecycle_hook.clone().map(|hook| {
            HeartbeatScheduler::spawn(
                self.lifecycle_client.clone(),
                hook,
                Duration::from_secs(self.config.heartbeat_interval_secs),
                Duration::from_secs(self.config.heartbeat_until_secs),
                self.metrics.clone(),
            )
        });

        let labels = match self.node_client.get_node_labels(&node_name).await {
            Ok(labels) => labels,
            Err(e) => {
                tracing::warn!(node_name, error = %e, "label fetch failed, using ingest snapshot");
                evt.node_labels.clone()
            }
        };
        tracing::debug!(node_name, label_count = labels.len(), "resolved node labels for ingest context");

        if let Some(task) = &evt.pre_drain_task {
            self.run_pre_drain_task(&node_name, task).await;
        }

        let pods: Vec<String> = match self.node_client.list_pod_names_on_node(&node_name).await {
            Ok(pods) => pods,
            Err(e) => {
                tracing::warn!(node_name, error = %e, "pod snapshot failed, using ingest snapshot");
                evt.pods.iter().map(|p| p.name.clone()).collect()
            }
        };
        tracing::debug!(node_name, pod_count = pods.len(), "resolved pod snapshot for webhook context");

        let rebalance_taint_only = evt.kind == EventKind::RebalanceRecommendation
            && !self.config.enable_rebalance_draining
            && !self.config.enable_queue_processing;

        let cordon_only = self.config.cordon_only || rebalance_taint_only;

        let drain_result = self.cordon_or_drain(&node_name, evt.kind, cordon_only, rebalance_taint_only).await;

        if let Some(notifier) = &self.notifier {
            draind_webhook::notify_best_effort(notifier.as_ref(), &evt, &node_name).await;
        }

        let node_missing = matches!(&drain_result, Err(NodeError::NotFound(_)));

        match &drain_result {
            Ok(()) => {
                self.store.mark_processed(&node_name).await;
                self.metrics.drains_total.with_label_values(&["success"]).inc();
            }
            Err(NodeError::NotFound(_)) => {
                tracing::warn!(node_name, "node not found during drain, treating as routine race");
                self.metrics.drains_total.with_label_values(&["node_not_found"]).inc();
                if !(node_missing && self.config.delete_sqs_msg_if_node_not_found) {
                    self.store.cancel(&evt.event_id).await;
                }
            }
            Err(e) => {
                tracing::error!(node_name, error = %e, "drain failed, canceling event for retry");
                self.metrics.drains_total.with_label_values(&["failure"]).inc();
                self.store.cancel(&evt.event_id).await;
            }
        }

        if let Some(handle) = heartbeat {
            handle.abort();
        }

        let run_post_task = drain_result.is_ok() || (node_missing && self.config.delete_sqs_msg_if_node_not_found);
        if run_post_task {
            if let Some(task) = &evt.post_drain_task {
                self.run_post_drain_task(&node_name, task, drain_result.is_ok()).await;
            }
        }

        if drain_result.is_ok() && self.config.enable_out_of_service_taint && !cordon_only {
            if let Err(e) = self.node_client.taint_out_of_service(&node_name).await {
                tracing::warn!(node_name, error = %e, "failed to apply out-of-service taint");
            }
        }
    }

    async fn cordon_or_drain(&self, node_name: &str, kind: EventKind, cordon_only: bool, rebalance_only: bool) -> Result<(), NodeError> {
        if rebalance_only {
            if self.config.enable_rebalance_monitoring {
                if let Err(e) = self.node_client.add_taint(node_name, "draind.io/rebalance-recommended", "true", draind_types::TaintEffect::PreferNoSchedule).await {
                    tracing::warn!(node_name, error = %e, "failed to apply rebalance taint");
                }
                self.node_client.record_event(node_name, EventReason::RebalanceTaint, "node tainted with rebalance marker").await;
                return Ok(());
            }
            let result = self.node_client.cordon(node_name, "interruption event active").await;
            self.node_client.record_event(node_name, EventReason::Cordon, "node cordoned").await;
            return result;
        }

        if cordon_only {
            let result = self.node_client.cordon(node_name, "interruption event active").await;
            self.node_client.record_event(node_name, EventReason::Cordon, "node cordoned").await;
            if kind == EventKind::RebalanceRecommendation && self.config.enable_rebalance_monitoring {
                if let Err(e) = self.node_client.add_taint(node_name, "draind.io/rebalance-recommended", "true", draind_types::TaintEffect::PreferNoSchedule).await {
                    tracing::warn!(node_name, error = %e, "failed to apply rebalance taint");
                }
                self.node_client.record_event(node_name, EventReason::RebalanceTaint, "node tainted with rebalance marker").await;
            }
            return result;
        }

        let opts = DrainOptions {
            force: true,
            ignore_all_daemon_sets: true,
            delete_empty_dir_data: true,
            pod_termination_grace_period: self.config.pod_termination_grace_period,
            node_termination_grace_period: self.config.node_termination_grace_period,
        };
        let result = self.node_client.cordon_and_drain(node_name, "interruption event active", &opts).await;
        self.node_client.record_event(node_name, EventReason::CordonAndDrain, "node cordoned and drained").await;
        result
    }

    async fn run_pre_drain_task(&self, node_name: &str, task: &DrainTask) {
        let result = match task {
            DrainTask::UncordonAfterReboot => {
                self.node_client.add_label(node_name, "draind.io/pending-reboot", "true").await
            }
            other => {
                tracing::warn!(node_name, task = ?other, "unexpected pre-drain task kind, skipping");
                Ok(())
            }
        };
        if let Err(e) = &result {
            tracing::warn!(node_name, error = %e, "pre-drain task failed, continuing");
        }
        self.node_client.record_event(node_name, EventReason::PreDrainTask, &format!("pre-drain task {task:?} result: {}", result.is_ok())).await;
    }

    async fn run_post_drain_task(&self, node_name: &str, task: &DrainTask, drain_succeeded: bool) {
        let outcome = match task {
            DrainTask::CompleteLifecycle { hook, result, delete_queue_message } => {
                let effective_result = if drain_succeeded { *result } else { LifecycleResult::Abandon };
                self.complete_hook(node_name, hook, effective_result).await;
                if let Some(receipt) = delete_queue_message {
                    self.delete_queue_message(receipt).await;
                }
                true
            }
            DrainTask::DeleteQueueMessage { receipt_handle } => {
                self.delete_queue_message(receipt_handle).await;
                true
            }
            DrainTask::RebalanceTaint => {
                if let Err(e) = self.node_client.add_taint(node_name, "draind.io/rebalance-recommended", "true", draind_types::TaintEffect::PreferNoSchedule).await {
                    tracing::warn!(node_name, error = %e, "failed to apply rebalance taint");
                }
                true
            }
            DrainTask::AwaitNodeReadyThenComplete { .. } | DrainTask::UncordonAfterReboot => {
                tracing::warn!(node_name, task = ?task, "unexpected post-drain task kind for this path, skipping");
                false
            }
        };
        self.node_client.record_event(node_name, EventReason::PostDrainTask, &format!("post-drain task {task:?} ran: {outcome}")).await;
    }

    async fn complete_hook(&self, node_name: &str, hook: &draind_types::LifecycleHookRef, result: LifecycleResult) {
        let Some(client) = &self.lifecycle_client else {
            tracing::warn!(node_name, "no lifecycle client configured, cannot complete hook");
            return;
        };
        match client
            .complete(&hook.auto_scaling_group_name, &hook.lifecycle_hook_name, &hook.instance_id, hook.lifecycle_action_token.as_deref(), result)
            .await
        {
            Ok(()) => {
                self.node_client.record_event(node_name, EventReason::LifecycleCompleted, &format!("lifecycle hook completed with {}", result.as_str())).await;
            }
            Err(e) => tracing::warn!(node_name, error = %e, "failed to complete lifecycle hook"),
        }
    }

    async fn delete_queue_message(&self, receipt_handle: &str) {
        let Some(client) = &self.queue_client else {
            return;
        };
        if let Err(e) = client.delete_message(receipt_handle).await {
            tracing::warn!(error = %e, "failed to delete queue message");
        }
    }

    async fn process_launch_lifecycle(&self, evt: InterruptionEvent, node_name: &str, stop: CancellationToken) {
        const POLL_INTERVAL: Duration = Duration::from_secs(5);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.node_termination_grace_period.max(1));

        loop {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(node_name, "node never became ready for launch-lifecycle hook, canceling");
                self.store.cancel(&evt.event_id).await;
                return;
            }
            match self.node_client.is_node_ready(node_name).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(NodeError::NotFound(_)) => {}
                Err(e) => tracing::warn!(node_name, error = %e, "error polling node readiness"),
            }
            tokio::select! {
                () = stop.cancelled() => return,
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        self.store.mark_processed(node_name).await;
        if let Some(task) = &evt.post_drain_task {
            if let DrainTask::AwaitNodeReadyThenComplete { hook, delete_queue_message } = task {
                self.complete_hook(node_name, hook, LifecycleResult::Continue).await;
                if let Some(receipt) = delete_queue_message {
                    self.delete_queue_message(receipt).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use draind_cloud::{FakeLifecycleClient, FakeQueueClient};
    use draind_node::test_utils::FakeNodeClient;
    use draind_store::StoreConfig;
    use draind_types::{EventKind, LifecycleHookRef, QueueAckHandle};

    fn config() -> HandlerConfig {
        HandlerConfig {
            cordon_only: false,
            enable_rebalance_draining: false,
            enable_rebalance_monitoring: true,
            enable_queue_processing: false,
            delete_sqs_msg_if_node_not_found: false,
            enable_out_of_service_taint: false,
            workers: 2,
            pod_termination_grace_period: -1,
            node_termination_grace_period: 5,
            heartbeat_interval_secs: 1,
            heartbeat_until_secs: 2,
        }
    }

    async fn past_event(node: &str, kind: EventKind) -> InterruptionEvent {
        let mut evt = InterruptionEvent::new("e1", kind, "test", Utc::now() - ChronoDuration::seconds(5));
        evt.node_name = Some(node.to_string());
        evt
    }

    #[tokio::test]
    async fn spot_event_drains_node() {
        let store = Arc::new(Store::new(StoreConfig { node_termination_grace_period: Duration::from_secs(0), ..StoreConfig::default() }));
        let nodes = Arc::new(FakeNodeClient::default());
        nodes.add_node("node-a", &[], None, true).await;
        let gate = Arc::new(Notify::new());
        let metrics = Arc::new(Metrics::new());

        let handler = Handler::new(store.clone(), nodes.clone(), None, None, None, metrics, config(), gate.clone());
        let evt = past_event("node-a", EventKind::SpotInterruption).await;
        store.add(evt.clone()).await;
        store.mark_in_progress(&evt.event_id).await;

        handler.process(evt, CancellationToken::new()).await;

        assert!(nodes.was_drained("node-a").await);
    }

    #[tokio::test]
    async fn rebalance_with_draining_disabled_only_taints() {
        let store = Arc::new(Store::new(StoreConfig { node_termination_grace_period: Duration::from_secs(0), ..StoreConfig::default() }));
        let nodes = Arc::new(FakeNodeClient::default());
        nodes.add_node("node-a", &[], None, true).await;
        let gate = Arc::new(Notify::new());
        let metrics = Arc::new(Metrics::new());

        let handler = Handler::new(store.clone(), nodes.clone(), None, None, None, metrics, config(), gate.clone());
        let evt = past_event("node-a", EventKind::RebalanceRecommendation).await;
        store.add(evt.clone()).await;
        store.mark_in_progress(&evt.event_id).await;

        handler.process(evt, CancellationToken::new()).await;

        assert!(!nodes.was_drained("node-a").await);
        assert!(!nodes.calls.lock().await.iter().any(|(n, op)| n == "node-a" && op == "cordon"));
        assert!(nodes.calls.lock().await.iter().any(|(n, op)| n == "node-a" && op.contains("RebalanceTaint")));
    }

    #[tokio::test]
    async fn rebalance_with_monitoring_disabled_cordons_instead_of_tainting() {
        let store = Arc::new(Store::new(StoreConfig { node_termination_grace_period: Duration::from_secs(0), ..StoreConfig::default() }));
        let nodes = Arc::new(FakeNodeClient::default());
        nodes.add_node("node-a", &[], None, true).await;
        let gate = Arc::new(Notify::new());
        let metrics = Arc::new(Metrics::new());

        let mut cfg = config();
        cfg.enable_rebalance_monitoring = false;
        let handler = Handler::new(store.clone(), nodes.clone(), None, None, None, metrics, cfg, gate);
        let evt = past_event("node-a", EventKind::RebalanceRecommendation).await;
        store.add(evt.clone()).await;
        store.mark_in_progress(&evt.event_id).await;

        handler.process(evt, CancellationToken::new()).await;

        assert!(!nodes.was_drained("node-a").await);
        assert!(nodes.calls.lock().await.iter().any(|(n, op)| n == "node-a" && op == "cordon"));
        assert!(!nodes.calls.lock().await.iter().any(|(n, op)| n == "node-a" && op.contains("RebalanceTaint")));
    }

    #[tokio::test]
    async fn terminate_lifecycle_completes_hook_and_deletes_message() {
        let store = Arc::new(Store::new(StoreConfig { node_termination_grace_period: Duration::from_secs(0), ..StoreConfig::default() }));
        let nodes = Arc::new(FakeNodeClient::default());
        nodes.add_node("node-a", &[], None, true).await;
        let queue = Arc::new(FakeQueueClient::default());
        let lifecycle = Arc::new(FakeLifecycleClient::default());
        let gate = Arc::new(Notify::new());
        let metrics = Arc::new(Metrics::new());

        let handler = Handler::new(
            store.clone(),
            nodes.clone(),
            Some(queue.clone() as Arc<dyn draind_cloud::QueueClient>),
            Some(lifecycle.clone() as Arc<dyn draind_cloud::LifecycleClient>),
            None,
            metrics,
            config(),
            gate,
        );

        let mut evt = past_event("node-a", EventKind::AsgTerminateLifecycle).await;
        let hook = LifecycleHookRef {
            auto_scaling_group_name: "asg-1".to_string(),
            lifecycle_hook_name: "hook-1".to_string(),
            instance_id: "i-1".to_string(),
            lifecycle_action_token: None,
        };
        evt.lifecycle_hook = Some(hook.clone());
        evt.queue_ack = Some(QueueAckHandle { receipt_handle: "r1".to_string() });
        evt.post_drain_task = Some(DrainTask::CompleteLifecycle { hook, result: LifecycleResult::Continue, delete_queue_message: Some("r1".to_string()) });

        store.add(evt.clone()).await;
        store.mark_in_progress(&evt.event_id).await;

        handler.process(evt, CancellationToken::new()).await;

        assert_eq!(lifecycle.completed.lock().await.len(), 1);
        assert_eq!(queue.deleted.lock().await.as_slice(), ["r1".to_string()]);
    }

    #[tokio::test]
    async fn launch_lifecycle_waits_for_ready_without_draining() {
        let store = Arc::new(Store::new(StoreConfig { node_termination_grace_period: Duration::from_secs(0), ..StoreConfig::default() }));
        let nodes = Arc::new(FakeNodeClient::default());
        nodes.add_node("node-a", &[], None, false).await;
        let lifecycle = Arc::new(FakeLifecycleClient::default());
        let gate = Arc::new(Notify::new());
        let metrics = Arc::new(Metrics::new());

        let mut cfg = config();
        cfg.node_termination_grace_period = 2;
        let handler = Handler::new(store.clone(), nodes.clone(), None, Some(lifecycle.clone() as Arc<dyn draind_cloud::LifecycleClient>), None, metrics, cfg, gate);

        let mut evt = past_event("node-a", EventKind::AsgLaunchLifecycle).await;
        let hook = LifecycleHookRef {
            auto_scaling_group_name: "asg-1".to_string(),
            lifecycle_hook_name: "hook-launch".to_string(),
            instance_id: "i-2".to_string(),
            lifecycle_action_token: None,
        };
        evt.lifecycle_hook = Some(hook.clone());
        evt.post_drain_task = Some(DrainTask::AwaitNodeReadyThenComplete { hook, delete_queue_message: None });
        store.add(evt.clone()).await;
        store.mark_in_progress(&evt.event_id).await;

        let nodes_clone = nodes.clone();
        let ready_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            nodes_clone.set_ready("node-a", true).await;
        });

        handler.process(evt, CancellationToken::new()).await;
        ready_task.await.unwrap();

        assert!(!nodes.was_drained("node-a").await);
        assert_eq!(lifecycle.completed.lock().await.len(), 1);
    }
}
