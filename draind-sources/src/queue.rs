//! The interruption-queue long-poll source (spec §4.1, "Queue source").

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draind_cloud::QueueClient;
use draind_types::{
    CancelEvent, DrainTask, EventKind, EventSource, InterruptionEvent, LifecycleHookRef,
    LifecycleResult, NodeClient, QueueAckHandle, SourceError,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEFAULT_WAIT_SECONDS: u32 = 20;
const DEFAULT_BATCH: u32 = 10;
const INSTANCE_ID_LABEL: &str = "kubernetes.io/instance-id";

/// Envelope discriminator recognised by the classifier (spec §6, "Inbound —
/// cloud message queue").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum EnvelopeKind {
    SpotInterruptionWarning,
    ScheduledChange,
    StateChange,
    RebalanceRecommendation,
    #[serde(rename = "autoscaling-lifecycle-terminate")]
    AutoscalingLifecycleTerminate,
    #[serde(rename = "autoscaling-lifecycle-launch")]
    AutoscalingLifecycleLaunch,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(alias = "detail-type", alias = "source")]
    kind: EnvelopeKind,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    auto_scaling_group_name: Option<String>,
    #[serde(default)]
    lifecycle_hook_name: Option<String>,
    #[serde(default)]
    lifecycle_action_token: Option<String>,
}

/// Resolves the node name for a message's instance, either by a node label
/// equal to the instance id, or by substring match on `providerID`, per
/// `use_provider_id`.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    /// Resolve `instance_id` to a cluster node name, if one exists yet.
    async fn resolve(&self, instance_id: &str) -> Option<String>;
}

struct ClusterNodeResolver {
    node_client: Arc<dyn NodeClient>,
    use_provider_id: bool,
}

#[async_trait]
impl NodeResolver for ClusterNodeResolver {
    async fn resolve(&self, instance_id: &str) -> Option<String> {
        let result = if self.use_provider_id {
            self.node_client.node_name_from_provider_id(instance_id).await
        } else {
            self.node_client.node_name_by_label(INSTANCE_ID_LABEL, instance_id).await
        };
        result.ok().flatten()
    }
}

/// Long-polls the interruption queue and classifies each message into an
/// [`InterruptionEvent`].
pub struct QueueSource {
    queue_client: Arc<dyn QueueClient>,
    resolver: Arc<dyn NodeResolver>,
    wait_seconds: u32,
    batch: u32,
    delete_if_node_not_found: bool,
}

impl QueueSource {
    /// Build a source against `queue_client`, resolving node names via
    /// `node_client` (by instance-id label, or provider-id substring when
    /// `use_provider_id` is set).
    #[must_use]
    pub fn new(queue_client: Arc<dyn QueueClient>, node_client: Arc<dyn NodeClient>, use_provider_id: bool, delete_if_node_not_found: bool) -> Self {
        Self {
            queue_client,
            resolver: Arc::new(ClusterNodeResolver { node_client, use_provider_id }),
            wait_seconds: DEFAULT_WAIT_SECONDS,
            batch: DEFAULT_BATCH,
            delete_if_node_not_found,
        }
    }

    fn classify(&self, raw: &str, receipt_handle: &str) -> Result<Option<InterruptionEvent>, SourceError> {
        let envelope: Envelope = serde_json::from_str(raw).map_err(|e| SourceError::ParseFailure(e.to_string()))?;
        let instance_id = envelope.instance_id.clone().unwrap_or_default();
        let start_time = envelope.start_time.unwrap_or_else(Utc::now);
        let description = envelope.description.clone().unwrap_or_default();
        let event_id = envelope
            .event_id
            .clone()
            .unwrap_or_else(|| crate::hash::stable_event_id("queue", &[&instance_id, &description]));

        let mut evt = match envelope.kind {
            EnvelopeKind::SpotInterruptionWarning => InterruptionEvent::new(event_id, EventKind::SpotInterruption, description, start_time),
            EnvelopeKind::ScheduledChange => {
                let mut evt = InterruptionEvent::new(event_id, EventKind::ScheduledEvent, description, start_time);
                if matches!(envelope.code.as_deref(), Some("system-reboot" | "instance-retirement" | "instance-stop")) {
                    evt.pre_drain_task = Some(DrainTask::UncordonAfterReboot);
                }
                evt
            }
            EnvelopeKind::StateChange => InterruptionEvent::new(event_id, EventKind::StateChange, description, start_time),
            EnvelopeKind::RebalanceRecommendation => InterruptionEvent::new(event_id, EventKind::RebalanceRecommendation, description, start_time),
            EnvelopeKind::AutoscalingLifecycleTerminate | EnvelopeKind::AutoscalingLifecycleLaunch => {
                let hook = LifecycleHookRef {
                    auto_scaling_group_name: envelope.auto_scaling_group_name.clone().unwrap_or_default(),
                    lifecycle_hook_name: envelope.lifecycle_hook_name.clone().unwrap_or_default(),
                    instance_id: instance_id.clone(),
                    lifecycle_action_token: envelope.lifecycle_action_token.clone(),
                };
                let kind = if matches!(envelope.kind, EnvelopeKind::AutoscalingLifecycleLaunch) {
                    EventKind::AsgLaunchLifecycle
                } else {
                    EventKind::AsgTerminateLifecycle
                };
                let mut evt = InterruptionEvent::new(event_id, kind, description, start_time);
                evt.post_drain_task = Some(if kind == EventKind::AsgLaunchLifecycle {
                    DrainTask::AwaitNodeReadyThenComplete { hook: hook.clone(), delete_queue_message: Some(receipt_handle.to_string()) }
                } else {
                    DrainTask::CompleteLifecycle { hook: hook.clone(), result: LifecycleResult::Continue, delete_queue_message: Some(receipt_handle.to_string()) }
                });
                evt.lifecycle_hook = Some(hook);
                evt
            }
        };

        if evt.post_drain_task.is_none() {
            evt.post_drain_task = Some(DrainTask::DeleteQueueMessage { receipt_handle: receipt_handle.to_string() });
        }
        evt.instance_id = Some(instance_id);
        evt.state = "active".to_string();
        evt.queue_ack = Some(QueueAckHandle { receipt_handle: receipt_handle.to_string() });
        Ok(Some(evt))
    }
}

#[async_trait]
impl EventSource for QueueSource {
    fn name(&self) -> &str {
        "queue"
    }

    async fn run(
        &self,
        interrupt_tx: mpsc::Sender<InterruptionEvent>,
        _cancel_tx: mpsc::Sender<CancelEvent>,
        stop: CancellationToken,
    ) -> Result<(), SourceError> {
        loop {
            let messages = tokio::select! {
                () = stop.cancelled() => return Ok(()),
                result = self.queue_client.receive(self.batch, self.wait_seconds) => result,
            };

            let messages = match messages {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(source = self.name(), error = %e, "queue receive failed");
                    continue;
                }
            };

            for message in messages {
                let mut evt = match self.classify(&message.body, &message.receipt_handle) {
                    Ok(Some(evt)) => evt,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(source = self.name(), error = %e, "unrecognised envelope, releasing without delete");
                        continue;
                    }
                };

                let instance_id = evt.instance_id.clone().unwrap_or_default();
                match self.resolver.resolve(&instance_id).await {
                    Some(node_name) => evt.node_name = Some(node_name),
                    None if self.delete_if_node_not_found => {
                        if let Err(e) = self.queue_client.delete_message(&message.receipt_handle).await {
                            tracing::warn!(source = self.name(), error = %e, "failed to delete message for absent node");
                        }
                        continue;
                    }
                    None => {}
                }

                if interrupt_tx.send(evt).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draind_cloud::FakeQueueClient;
    use draind_node::test_utils::FakeNodeClient;

    fn spot_message(instance_id: &str) -> String {
        format!(r#"{{"source":"spot-interruption-warning","instance_id":"{instance_id}","description":"spot notice","start_time":"2020-02-07T14:55:55Z"}}"#)
    }

    #[tokio::test]
    async fn classify_resolves_node_by_label() {
        let queue = Arc::new(FakeQueueClient::default());
        let nodes = Arc::new(FakeNodeClient::default());
        nodes.add_node("node-a", &[(INSTANCE_ID_LABEL, "i-123")], None, true).await;

        let source = QueueSource::new(queue.clone(), nodes.clone(), false, false);
        let evt = source.classify(&spot_message("i-123"), "r1").unwrap().unwrap();
        assert_eq!(evt.kind, EventKind::SpotInterruption);
        assert_eq!(evt.instance_id.as_deref(), Some("i-123"));

        let resolved = source.resolver.resolve("i-123").await;
        assert_eq!(resolved.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn lifecycle_terminate_binds_hook_and_completes_on_post_task() {
        let queue = Arc::new(FakeQueueClient::default());
        let nodes = Arc::new(FakeNodeClient::default());
        let source = QueueSource::new(queue, nodes, false, false);
        let raw = r#"{"source":"autoscaling-lifecycle-terminate","instance_id":"i-999","auto_scaling_group_name":"asg-1","lifecycle_hook_name":"hook-1","lifecycle_action_token":"tok"}"#;
        let evt = source.classify(raw, "r2").unwrap().unwrap();
        assert_eq!(evt.kind, EventKind::AsgTerminateLifecycle);
        assert!(matches!(evt.post_drain_task, Some(DrainTask::CompleteLifecycle { .. })));
        assert!(evt.lifecycle_hook.is_some());
    }

    #[tokio::test]
    async fn unresolved_node_with_delete_flag_deletes_message() {
        let queue = Arc::new(FakeQueueClient::default());
        queue.messages.lock().await.push(draind_cloud::QueueMessage {
            receipt_handle: "r3".to_string(),
            body: spot_message("i-absent"),
        });
        let nodes = Arc::new(FakeNodeClient::default());
        let source = QueueSource::new(queue.clone(), nodes, false, true);

        let (tx, mut rx) = mpsc::channel(4);
        let (cancel_tx, _cancel_rx) = mpsc::channel(4);
        let stop = CancellationToken::new();
        let stop_clone = stop.clone();
        let handle = tokio::spawn(async move { source.run(tx, cancel_tx, stop_clone).await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop.cancel();
        let _ = handle.await;

        assert!(rx.try_recv().is_err());
        assert_eq!(queue.deleted.lock().await.as_slice(), ["r3".to_string()]);
    }
}
