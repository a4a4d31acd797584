//! Exercises `QueueSource::run` against the fake queue/node clients, covering
//! duplicate delivery and unresolved-node handling end to end.

use std::sync::Arc;
use std::time::Duration;

use draind_cloud::test_utils::FakeQueueClient;
use draind_cloud::{QueueClient, QueueMessage};
use draind_node::test_utils::FakeNodeClient;
use draind_sources::QueueSource;
use draind_types::{EventSource, NodeClient};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn duplicate_spot_warning_messages_both_surface_but_only_one_drains_downstream() {
    let node_client = Arc::new(FakeNodeClient::default());
    node_client.add_node("ip-10-0-0-9", &[("kubernetes.io/instance-id", "i-dup")], None, true).await;
    let node_client: Arc<dyn NodeClient> = node_client;

    let queue_client = Arc::new(FakeQueueClient::default());
    let body = r#"{"kind":"spot-interruption-warning","event_id":"evt-dup","instance_id":"i-dup","description":"spot warning","start_time":"2026-07-28T00:00:00Z"}"#;
    queue_client.messages.lock().await.push(QueueMessage { receipt_handle: "r1".to_string(), body: body.to_string() });
    queue_client.messages.lock().await.push(QueueMessage { receipt_handle: "r2".to_string(), body: body.to_string() });
    let queue_client: Arc<dyn QueueClient> = queue_client;

    let source = QueueSource::new(queue_client, node_client, false, false);

    let (interrupt_tx, mut interrupt_rx) = mpsc::channel(8);
    let (cancel_tx, _cancel_rx) = mpsc::channel(8);
    let stop = CancellationToken::new();
    let run_stop = stop.clone();
    let handle = tokio::spawn(async move { source.run(interrupt_tx, cancel_tx, run_stop).await });

    let first = tokio::time::timeout(Duration::from_secs(2), interrupt_rx.recv()).await.unwrap().unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), interrupt_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.event_id, "evt-dup");
    assert_eq!(second.event_id, "evt-dup");
    assert_eq!(first.node_name.as_deref(), Some("ip-10-0-0-9"));

    stop.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn message_for_unknown_node_is_deleted_when_configured_to_drop() {
    let node_client: Arc<dyn NodeClient> = Arc::new(FakeNodeClient::default());

    let queue_client = Arc::new(FakeQueueClient::default());
    let body = r#"{"kind":"spot-interruption-warning","event_id":"evt-missing","instance_id":"i-ghost","description":"spot warning","start_time":"2026-07-28T00:00:00Z"}"#;
    queue_client.messages.lock().await.push(QueueMessage { receipt_handle: "r-ghost".to_string(), body: body.to_string() });
    let queue_client_handle = queue_client.clone();
    let queue_client: Arc<dyn QueueClient> = queue_client;

    let source = QueueSource::new(queue_client, node_client, false, true);

    let (interrupt_tx, mut interrupt_rx) = mpsc::channel(8);
    let (cancel_tx, _cancel_rx) = mpsc::channel(8);
    let stop = CancellationToken::new();
    let run_stop = stop.clone();
    let handle = tokio::spawn(async move { source.run(interrupt_tx, cancel_tx, run_stop).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    stop.cancel();
    let _ = handle.await;

    assert!(interrupt_rx.try_recv().is_err());
    assert_eq!(*queue_client_handle.deleted.lock().await, vec!["r-ghost".to_string()]);
}
