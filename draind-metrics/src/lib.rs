#![deny(missing_docs)]
//! A typed facade over a `prometheus::Registry`: the ambient observability
//! surface a running agent carries regardless of whether a dashboard
//! product is in scope — a `/metrics` endpoint is not the same thing.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

/// Handle to every metric draind exports. Cheap to clone (`Registry` and
/// the typed metrics are themselves `Arc`-backed internally).
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total interruption events received, across all sources.
    pub events_received_total: IntCounterVec,
    /// Total drains attempted, labeled by terminal result.
    pub drains_total: IntCounterVec,
    /// Current number of events held in the store.
    pub store_size: IntGauge,
    /// Current number of events the store considers drain-actionable.
    pub drainable_events: IntGauge,
    /// Total lifecycle heartbeats sent.
    pub heartbeats_sent_total: IntCounter,
    /// Total source poll errors, labeled by source name.
    pub source_errors_total: IntCounterVec,
}

impl Metrics {
    /// Build a fresh registry and register every metric under the
    /// `draind_` namespace.
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();
        let events_received_total = register_int_counter_vec_with_registry!(
            "draind_events_received_total",
            "Interruption events received, by kind",
            &["kind"],
            registry
        )
        .expect("metric registration cannot fail with a unique name");
        let drains_total = register_int_counter_vec_with_registry!(
            "draind_drains_total",
            "Drain attempts completed, by result",
            &["result"],
            registry
        )
        .expect("metric registration cannot fail with a unique name");
        let store_size = register_int_gauge_with_registry!(
            "draind_store_size",
            "Number of events currently held in the store",
            registry
        )
        .expect("metric registration cannot fail with a unique name");
        let drainable_events = register_int_gauge_with_registry!(
            "draind_drainable_events",
            "Number of events the store currently considers drain-actionable",
            registry
        )
        .expect("metric registration cannot fail with a unique name");
        let heartbeats_sent_total = register_int_counter_with_registry!(
            "draind_heartbeats_sent_total",
            "Lifecycle heartbeat extensions sent",
            registry
        )
        .expect("metric registration cannot fail with a unique name");
        let source_errors_total = register_int_counter_vec_with_registry!(
            "draind_source_errors_total",
            "Event source poll errors, by source name",
            &["source"],
            registry
        )
        .expect("metric registration cannot fail with a unique name");

        Self {
            registry,
            events_received_total,
            drains_total,
            store_size,
            drainable_events,
            heartbeats_sent_total,
            source_errors_total,
        }
    }

    /// Render every registered metric in Prometheus text exposition format,
    /// the body the binary's `/metrics` handler returns.
    pub fn render(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .expect("encoding registered metric families cannot fail");
        String::from_utf8(buffer).expect("prometheus text encoding is always valid UTF-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.events_received_total.with_label_values(&["spot-interruption"]).inc();
        metrics.store_size.set(3);
        let rendered = metrics.render();
        assert!(rendered.contains("draind_events_received_total"));
        assert!(rendered.contains("draind_store_size 3"));
    }
}
