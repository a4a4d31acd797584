//! Single-task serializer of all Store mutations (spec §4.3).
//!
//! One owner fans every interrupt/cancel channel and tick into serialized
//! `Store::add`/`Store::cancel` calls, so the store itself never needs its
//! own internal write queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use draind_store::Store;
use draind_types::{CancelEvent, EventReason, InterruptionEvent, NodeClient};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

const DEFAULT_TICK: Duration = Duration::from_secs(1);
const DEFAULT_STOP_DRAIN: Duration = Duration::from_secs(30);

/// Drains `interrupt_rx`/`cancel_rx` into `store`, wakes the handler gate on
/// every insert or drain-actionable tick, and uncordons nodes the store no
/// longer has an active reference for.
///
/// The dispatcher is the sole writer to the store; sources and the handler
/// only ever read it (spec §5, "Shared resources").
pub struct Dispatcher {
    store: Arc<Store>,
    node_client: Arc<dyn NodeClient>,
    handler_gate: Arc<Notify>,
    tick_interval: Duration,
    stop_drain_duration: Duration,
}

impl Dispatcher {
    /// Build a dispatcher writing to `store`, uncordoning nodes via
    /// `node_client`, and waking `handler_gate` whenever the handler should
    /// look for work.
    #[must_use]
    pub fn new(store: Arc<Store>, node_client: Arc<dyn NodeClient>, handler_gate: Arc<Notify>) -> Self {
        Self {
            store,
            node_client,
            handler_gate,
            tick_interval: DEFAULT_TICK,
            stop_drain_duration: DEFAULT_STOP_DRAIN,
        }
    }

    /// Run until `stop` is cancelled. On cancellation, keeps draining the
    /// channels for `stop_drain_duration` so in-flight sends are not lost,
    /// then returns (spec §5, "Cancellation and timeouts").
    pub async fn run(
        &self,
        mut interrupt_rx: mpsc::Receiver<InterruptionEvent>,
        mut cancel_rx: mpsc::Receiver<CancelEvent>,
        stop: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        let mut known_nodes: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                Some(evt) = interrupt_rx.recv() => {
                    if let Some(node_name) = evt.node_name.clone() {
                        known_nodes.insert(node_name);
                    }
                    self.store.add(evt).await;
                    self.handler_gate.notify_one();
                }
                Some(cancel) = cancel_rx.recv() => {
                    self.store.cancel(&cancel.event_id).await;
                }
                _ = ticker.tick() => {
                    if self.store.should_drain().await {
                        self.handler_gate.notify_one();
                    }
                    self.uncordon_stale_nodes(&mut known_nodes).await;
                }
            }
        }

        self.drain_remaining(interrupt_rx, cancel_rx).await;
    }

    async fn uncordon_stale_nodes(&self, known_nodes: &mut HashSet<String>) {
        let mut uncordoned = Vec::new();
        for node_name in known_nodes.iter() {
            if self.store.should_uncordon(node_name).await {
                match self.node_client.uncordon(node_name).await {
                    Ok(()) => {
                        self.node_client.record_event(node_name, EventReason::Uncordon, "node uncordoned: no active interruption references it").await;
                        uncordoned.push(node_name.clone());
                    }
                    Err(e) => {
                        tracing::warn!(node_name, error = %e, "failed to uncordon stale node");
                    }
                }
            }
        }
        for node_name in uncordoned {
            known_nodes.remove(&node_name);
        }
    }

    async fn drain_remaining(&self, mut interrupt_rx: mpsc::Receiver<InterruptionEvent>, mut cancel_rx: mpsc::Receiver<CancelEvent>) {
        let deadline = tokio::time::sleep(self.stop_drain_duration);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => break,
                Some(evt) = interrupt_rx.recv() => self.store.add(evt).await,
                Some(cancel) = cancel_rx.recv() => self.store.cancel(&cancel.event_id).await,
                else => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use draind_node::test_utils::FakeNodeClient;
    use draind_store::StoreConfig;
    use draind_types::EventKind;

    fn past_event(id: &str, node: &str) -> InterruptionEvent {
        let mut evt = InterruptionEvent::new(id, EventKind::SpotInterruption, "test", Utc::now() - ChronoDuration::seconds(5));
        evt.node_name = Some(node.to_string());
        evt
    }

    #[tokio::test]
    async fn interrupt_event_wakes_handler_gate() {
        let store = Arc::new(Store::new(StoreConfig { node_termination_grace_period: Duration::from_secs(0), ..StoreConfig::default() }));
        let nodes = Arc::new(FakeNodeClient::default());
        let gate = Arc::new(Notify::new());
        let dispatcher = Dispatcher::new(store.clone(), nodes, gate.clone());

        let (itx, irx) = mpsc::channel(4);
        let (_ctx, crx) = mpsc::channel(4);
        let stop = CancellationToken::new();
        let stop_clone = stop.clone();

        itx.send(past_event("e1", "node-a")).await.unwrap();
        let handle = tokio::spawn(async move { dispatcher.run(irx, crx, stop_clone).await });

        tokio::time::timeout(Duration::from_secs(1), gate.notified()).await.unwrap();
        assert_eq!(store.len().await, 1);

        stop.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn stale_node_is_uncordoned_after_cancel() {
        let store = Arc::new(Store::new(StoreConfig { node_termination_grace_period: Duration::from_secs(0), ..StoreConfig::default() }));
        let nodes = Arc::new(FakeNodeClient::default());
        nodes.add_node("node-a", &[], None, true).await;
        let gate = Arc::new(Notify::new());
        let dispatcher = Dispatcher::new(store.clone(), nodes.clone(), gate);

        let evt = past_event("e1", "node-a");
        store.add(evt.clone()).await;
        store.cancel(&evt.event_id).await;

        let mut known = HashSet::new();
        known.insert("node-a".to_string());
        dispatcher.uncordon_stale_nodes(&mut known).await;
        assert!(nodes.calls.lock().await.iter().any(|(n, op)| n == "node-a" && op == "uncordon"));
        assert!(known.is_empty());
    }
}
