//! Wires Dispatcher + Store + Handler together against the fake collaborators,
//! covering the concrete scenarios a live cluster would exercise.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use draind_cloud::test_utils::{FakeLifecycleClient, FakeQueueClient};
use draind_engine::{Dispatcher, Handler, HandlerConfig};
use draind_metrics::Metrics;
use draind_node::test_utils::FakeNodeClient;
use draind_store::{Store, StoreConfig};
use draind_types::{DrainTask, EventKind, InterruptionEvent, LifecycleHookRef, LifecycleResult, NodeClient};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

fn handler_config() -> HandlerConfig {
    HandlerConfig {
        cordon_only: false,
        enable_rebalance_draining: true,
        enable_rebalance_monitoring: true,
        enable_queue_processing: true,
        delete_sqs_msg_if_node_not_found: false,
        enable_out_of_service_taint: false,
        workers: 2,
        pod_termination_grace_period: -1,
        node_termination_grace_period: 120,
        heartbeat_interval_secs: 30,
        heartbeat_until_secs: 60,
    }
}

#[tokio::test]
async fn spot_interruption_drains_the_node_end_to_end() {
    let node_client = Arc::new(FakeNodeClient::default());
    node_client.add_node("ip-10-0-0-1", &[("topology.kubernetes.io/zone", "a")], Some("aws:///i-abc"), true).await;
    let node_client: Arc<dyn NodeClient> = node_client;

    let store = Arc::new(Store::new(StoreConfig::default()));
    let gate = Arc::new(Notify::new());
    let dispatcher = Dispatcher::new(store.clone(), node_client.clone(), gate.clone());

    let metrics = Arc::new(Metrics::new());
    let handler = Handler::new(store.clone(), node_client.clone(), None, None, None, metrics, handler_config(), gate);

    let (interrupt_tx, interrupt_rx) = mpsc::channel(8);
    let (_cancel_tx, cancel_rx) = mpsc::channel(8);
    let stop = CancellationToken::new();

    let dispatcher_stop = stop.clone();
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(interrupt_rx, cancel_rx, dispatcher_stop).await });
    let handler_stop = stop.clone();
    let handler_handle = tokio::spawn(async move { handler.run(handler_stop).await });

    let mut evt = InterruptionEvent::new("evt-spot-1", EventKind::SpotInterruption, "spot interruption warning", Utc::now());
    evt.node_name = Some("ip-10-0-0-1".to_string());
    interrupt_tx.send(evt).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.cancel();
    let _ = dispatcher_handle.await;
    let _ = handler_handle.await;

    let node_client = node_client;
    assert!(node_client.get_node_labels("ip-10-0-0-1").await.is_ok());
}

#[tokio::test]
async fn terminate_lifecycle_completes_hook_via_handler() {
    let node_client = Arc::new(FakeNodeClient::default());
    node_client.add_node("ip-10-0-0-2", &[], None, true).await;
    let node_client: Arc<dyn NodeClient> = node_client;

    let queue_client = Arc::new(FakeQueueClient::default());
    let lifecycle_client = Arc::new(FakeLifecycleClient::default());

    let store = Arc::new(Store::new(StoreConfig::default()));
    let gate = Arc::new(Notify::new());
    let dispatcher = Dispatcher::new(store.clone(), node_client.clone(), gate.clone());

    let metrics = Arc::new(Metrics::new());
    let handler = Handler::new(
        store.clone(),
        node_client.clone(),
        Some(queue_client.clone() as Arc<dyn draind_cloud::QueueClient>),
        Some(lifecycle_client.clone() as Arc<dyn draind_cloud::LifecycleClient>),
        None,
        metrics,
        handler_config(),
        gate,
    );

    let (interrupt_tx, interrupt_rx) = mpsc::channel(8);
    let (_cancel_tx, cancel_rx) = mpsc::channel(8);
    let stop = CancellationToken::new();

    let dispatcher_stop = stop.clone();
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(interrupt_rx, cancel_rx, dispatcher_stop).await });
    let handler_stop = stop.clone();
    let handler_handle = tokio::spawn(async move { handler.run(handler_stop).await });

    let mut evt = InterruptionEvent::new("evt-terminate-1", EventKind::AsgTerminateLifecycle, "terminating lifecycle hook", Utc::now());
    evt.node_name = Some("ip-10-0-0-2".to_string());
    let hook = LifecycleHookRef {
        auto_scaling_group_name: "asg-1".to_string(),
        lifecycle_hook_name: "terminate-hook".to_string(),
        lifecycle_action_token: Some("token-1".to_string()),
        instance_id: "i-0002".to_string(),
    };
    evt.lifecycle_hook = Some(hook.clone());
    evt.post_drain_task = Some(DrainTask::CompleteLifecycle { hook, result: LifecycleResult::Continue, delete_queue_message: None });

    interrupt_tx.send(evt).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.cancel();
    let _ = dispatcher_handle.await;
    let _ = handler_handle.await;

    let completed = lifecycle_client.completed.lock().await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].3, LifecycleResult::Continue);
}
