#![deny(missing_docs)]
//! The Interruption Event Store: a concurrent-safe map from event id to
//! [`InterruptionEvent`], with the auxiliary sets and counters the
//! dispatcher and handler need to decide "should this node drain now?" and
//! "should this node be uncordoned?" (spec §4.2).
//!
//! Prefers a single lock over the map plus fine-grained per-event fields
//! (spec §9, "Design Notes — Store"): the workload is low-frequency writes
//! and frequent reads, and iteration in `get_active` is bounded by the
//! small number of concurrently-pending events.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use draind_types::{InterruptionEvent, StoreError};
use tokio::sync::RwLock;

/// Tuning knobs for garbage collection and periodic size logging.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Subtracted from `start_time` to derive the drain deadline.
    pub node_termination_grace_period: Duration,
    /// Number of `get_active` calls between sweeps that drop processed
    /// entries. Default 7,200 (spec §4.2).
    pub gc_threshold: u64,
    /// Number of `get_active` calls between size/drainable-count log lines.
    /// Default 1,800 (60 at debug level) per spec §4.2.
    pub log_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            node_termination_grace_period: Duration::from_secs(120),
            gc_threshold: 7_200,
            log_interval: 1_800,
        }
    }
}

struct Inner {
    events: HashMap<String, InterruptionEvent>,
    ignored: HashSet<String>,
    at_least_one_event: bool,
    get_active_calls: u64,
    log_calls: u64,
}

/// The concurrent Interruption Event Store. Cheap to clone via `Arc` at the
/// call site; the store itself holds its lock internally.
pub struct Store {
    inner: RwLock<Inner>,
    config: StoreConfig,
}

impl Store {
    /// Create an empty store.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                events: HashMap::new(),
                ignored: HashSet::new(),
                at_least_one_event: false,
                get_active_calls: 0,
                log_calls: 0,
            }),
            config,
        }
    }

    /// Insert an event. A no-op if the id is already present or ignored
    /// (spec §8 idempotence: `Add(evt); Add(evt)` ≡ `Add(evt)`).
    pub async fn add(&self, evt: InterruptionEvent) {
        let mut inner = self.inner.write().await;
        if inner.events.contains_key(&evt.event_id) {
            return;
        }
        let ignored = inner.ignored.contains(&evt.event_id);
        if !ignored {
            inner.at_least_one_event = true;
        }
        tracing::info!(event_id = %evt.event_id, kind = ?evt.kind, ignored, "event stored");
        inner.events.insert(evt.event_id.clone(), evt);
    }

    /// Remove an event if present. A no-op otherwise.
    pub async fn cancel(&self, event_id: &str) {
        let mut inner = self.inner.write().await;
        if inner.events.remove(event_id).is_some() {
            tracing::info!(event_id, "event canceled");
        }
    }

    /// Suppress future drain decisions for `event_id`. Events already
    /// stored, or stored later, under this id remain visible but are never
    /// returned by `get_active`/`should_drain`.
    pub async fn ignore(&self, event_id: &str) -> Result<(), StoreError> {
        if event_id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        let mut inner = self.inner.write().await;
        inner.ignored.insert(event_id.to_string());
        Ok(())
    }

    /// `start_time − node_termination_grace_period − now`. May be negative.
    #[must_use]
    pub fn time_until_drain(&self, evt: &InterruptionEvent) -> chrono::Duration {
        let grace = chrono::Duration::from_std(self.config.node_termination_grace_period)
            .unwrap_or(chrono::Duration::zero());
        let deadline = evt.start_time - grace;
        deadline - Utc::now()
    }

    /// True for events that actually drive a node drain: deadline passed,
    /// not ignored, in progress, or already processed.
    fn is_drain_actionable(&self, evt: &InterruptionEvent, ignored: &HashSet<String>) -> bool {
        evt.kind.drains_node()
            && !ignored.contains(&evt.event_id)
            && !evt.in_progress
            && !evt.node_processed
            && self.time_until_drain(evt) <= chrono::Duration::zero()
    }

    /// True for events the Handler should pick up, whether or not they ever
    /// drain a node. Launch-lifecycle events never pass `is_drain_actionable`
    /// (they have no drain deadline) but still need to be handed to the
    /// Handler so it can poll node readiness and complete the hook (spec
    /// §4.4, "Launch-lifecycle specialisation").
    fn is_actionable(&self, evt: &InterruptionEvent, ignored: &HashSet<String>) -> bool {
        if ignored.contains(&evt.event_id) || evt.in_progress || evt.node_processed {
            return false;
        }
        if evt.kind.drains_node() {
            self.time_until_drain(evt) <= chrono::Duration::zero()
        } else {
            true
        }
    }

    /// Return the first event ready for the Handler: either a drain whose
    /// deadline has passed, or a non-draining (launch-lifecycle) event that
    /// has never been picked up. Also drives the periodic GC sweep and
    /// size/drainable-count log line (spec §4.2).
    pub async fn get_active(&self) -> Option<InterruptionEvent> {
        let mut inner = self.inner.write().await;
        inner.get_active_calls += 1;
        inner.log_calls += 1;

        if inner.get_active_calls >= self.config.gc_threshold {
            let before = inner.events.len();
            inner.events.retain(|_, e| !e.node_processed);
            inner.get_active_calls = 0;
            tracing::debug!(
                removed = before - inner.events.len(),
                remaining = inner.events.len(),
                "store garbage collection swept processed events"
            );
        }

        if inner.log_calls >= self.config.log_interval {
            inner.log_calls = 0;
            let drainable = inner
                .events
                .values()
                .filter(|e| self.is_drain_actionable(e, &inner.ignored))
                .count();
            tracing::info!(
                store_size = inner.events.len(),
                drainable,
                "store status"
            );
        }

        let ignored = inner.ignored.clone();
        inner
            .events
            .values()
            .find(|e| self.is_actionable(e, &ignored))
            .cloned()
    }

    /// Read-only version of the `get_active` predicate, without GC/logging
    /// side effects. Used by the Dispatcher's tick to decide whether to
    /// wake the Handler.
    pub async fn should_drain(&self) -> bool {
        let inner = self.inner.read().await;
        inner
            .events
            .values()
            .any(|e| self.is_actionable(e, &inner.ignored))
    }

    /// True iff at least one non-ignored event was ever added AND no
    /// non-ignored event currently references `node_name` (spec §8
    /// invariant 5).
    pub async fn should_uncordon(&self, node_name: &str) -> bool {
        let inner = self.inner.read().await;
        if !inner.at_least_one_event {
            return false;
        }
        !inner.events.values().any(|e| {
            !inner.ignored.contains(&e.event_id) && e.node_name.as_deref() == Some(node_name)
        })
    }

    /// Mark every stored event for `node_name` as processed. Idempotent
    /// (spec §8: `MarkProcessed(n); MarkProcessed(n)` ≡ `MarkProcessed(n)`).
    pub async fn mark_processed(&self, node_name: &str) {
        let mut inner = self.inner.write().await;
        for evt in inner.events.values_mut() {
            if evt.node_name.as_deref() == Some(node_name) {
                evt.node_processed = true;
                evt.in_progress = false;
            }
        }
    }

    /// Mark an event as currently being drained. Used by the Handler
    /// immediately after pulling an active event off the store, so a
    /// concurrent dispatcher tick does not hand the same event to a second
    /// worker.
    pub async fn mark_in_progress(&self, event_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(evt) = inner.events.get_mut(event_id) {
            evt.in_progress = true;
        }
    }

    /// Number of events currently stored (for tests/metrics).
    pub async fn len(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// True if the store holds no events.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use draind_types::EventKind;

    fn past_event(id: &str, node: &str) -> InterruptionEvent {
        let mut evt = InterruptionEvent::new(
            id,
            EventKind::SpotInterruption,
            "test",
            Utc::now() - ChronoDuration::seconds(60),
        );
        evt.node_name = Some(node.to_string());
        evt
    }

    fn store() -> Store {
        Store::new(StoreConfig {
            node_termination_grace_period: Duration::from_secs(0),
            ..StoreConfig::default()
        })
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let store = store();
        let evt = past_event("e1", "node-a");
        store.add(evt.clone()).await;
        store.add(evt).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn cancel_then_readd_is_fresh() {
        let store = store();
        let evt = past_event("e1", "node-a");
        store.add(evt.clone()).await;
        store.cancel(&evt.event_id).await;
        assert!(store.is_empty().await);

        let mut fresh = evt;
        fresh.description = "fresh".into();
        store.add(fresh).await;
        assert_eq!(store.len().await, 1);
        let active = store.get_active().await.unwrap();
        assert_eq!(active.description, "fresh");
    }

    #[tokio::test]
    async fn get_active_respects_deadline() {
        let store = store();
        let mut evt = past_event("e1", "node-a");
        evt.start_time = Utc::now() + ChronoDuration::seconds(3600);
        store.add(evt).await;
        assert!(store.get_active().await.is_none());
        assert!(!store.should_drain().await);
    }

    #[tokio::test]
    async fn ignored_event_is_stored_but_never_drains() {
        let store = store();
        store.ignore("e1").await.unwrap();
        store.add(past_event("e1", "node-a")).await;
        assert_eq!(store.len().await, 1);
        assert!(store.get_active().await.is_none());
    }

    #[tokio::test]
    async fn mark_processed_prevents_future_drain() {
        let store = store();
        let evt = past_event("e1", "node-a");
        store.add(evt).await;
        store.mark_processed("node-a").await;
        assert!(store.get_active().await.is_none());
    }

    #[tokio::test]
    async fn mark_processed_is_idempotent() {
        let store = store();
        store.add(past_event("e1", "node-a")).await;
        store.mark_processed("node-a").await;
        store.mark_processed("node-a").await;
        assert!(store.get_active().await.is_none());
    }

    #[tokio::test]
    async fn should_uncordon_requires_prior_event_and_no_current_reference() {
        let store = store();
        assert!(!store.should_uncordon("node-a").await);

        let evt = past_event("e1", "node-a");
        store.add(evt.clone()).await;
        assert!(!store.should_uncordon("node-a").await);

        store.cancel(&evt.event_id).await;
        assert!(store.should_uncordon("node-a").await);
    }

    #[tokio::test]
    async fn launch_lifecycle_is_actionable_without_a_deadline() {
        let store = store();
        let mut evt = past_event("e1", "node-a");
        evt.kind = EventKind::AsgLaunchLifecycle;
        evt.start_time = Utc::now() + ChronoDuration::seconds(3600);
        store.add(evt).await;
        assert!(store.should_drain().await);
        let active = store.get_active().await;
        assert_eq!(active.unwrap().kind, EventKind::AsgLaunchLifecycle);
    }

    #[tokio::test]
    async fn launch_lifecycle_in_progress_is_not_returned_again() {
        let store = store();
        let mut evt = past_event("e1", "node-a");
        evt.kind = EventKind::AsgLaunchLifecycle;
        store.add(evt).await;
        store.mark_in_progress("e1").await;
        assert!(store.get_active().await.is_none());
    }

    #[tokio::test]
    async fn time_until_drain_matches_formula() {
        let store = Store::new(StoreConfig {
            node_termination_grace_period: Duration::from_secs(120),
            ..StoreConfig::default()
        });
        let evt = InterruptionEvent::new(
            "e1",
            EventKind::SpotInterruption,
            "test",
            Utc::now() + ChronoDuration::seconds(120),
        );
        let remaining = store.time_until_drain(&evt);
        assert!(remaining.num_seconds().abs() < 2);
    }
}
