//! Background lifecycle-heartbeat task.
//!
//! Spawn once, hold the `JoinHandle`, abort it when the owning drain
//! finishes.

use std::sync::Arc;
use std::time::Duration;

use draind_cloud::LifecycleClient;
use draind_metrics::Metrics;
use draind_types::LifecycleHookRef;
use tokio::task::JoinHandle;

/// Spawns (and returns a handle to) a task that periodically extends
/// `hook`'s lifecycle timeout until `until` total has elapsed. The caller
/// aborts the handle once the drain this heartbeat was protecting finishes
/// (spec: "started when the handler begins and stopped when it finishes").
pub struct HeartbeatScheduler;

impl HeartbeatScheduler {
    /// Spawn the heartbeat task. A `None` lifecycle client spawns a no-op
    /// task (non-lifecycle events still call this uniformly from the
    /// Handler in a future revision; today callers only invoke it for
    /// lifecycle-hook events, so `client` should be `Some`).
    #[must_use]
    pub fn spawn(client: Option<Arc<dyn LifecycleClient>>, hook: LifecycleHookRef, interval: Duration, until: Duration, metrics: Arc<Metrics>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(client) = client else { return };
            let mut elapsed = Duration::ZERO;
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            while elapsed < until {
                ticker.tick().await;
                elapsed += interval;
                match client
                    .heartbeat(&hook.auto_scaling_group_name, &hook.lifecycle_hook_name, &hook.instance_id, hook.lifecycle_action_token.as_deref())
                    .await
                {
                    Ok(()) => metrics.heartbeats_sent_total.inc(),
                    Err(e) => tracing::warn!(instance_id = %hook.instance_id, error = %e, "lifecycle heartbeat failed, retrying next tick"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draind_cloud::FakeLifecycleClient;

    #[tokio::test]
    async fn sends_heartbeats_until_budget_exhausted() {
        let client = Arc::new(FakeLifecycleClient::default());
        let hook = LifecycleHookRef {
            auto_scaling_group_name: "asg-1".to_string(),
            lifecycle_hook_name: "hook-1".to_string(),
            instance_id: "i-1".to_string(),
            lifecycle_action_token: None,
        };
        let metrics = Arc::new(Metrics::new());
        let handle = HeartbeatScheduler::spawn(Some(client.clone() as Arc<dyn LifecycleClient>), hook, Duration::from_millis(20), Duration::from_millis(60), metrics);
        handle.await.unwrap();
        assert!(client.heartbeats.lock().await.len() >= 2);
    }

    #[tokio::test]
    async fn abort_stops_heartbeats_immediately() {
        let client = Arc::new(FakeLifecycleClient::default());
        let hook = LifecycleHookRef {
            auto_scaling_group_name: "asg-1".to_string(),
            lifecycle_hook_name: "hook-1".to_string(),
            instance_id: "i-1".to_string(),
            lifecycle_action_token: None,
        };
        let metrics = Arc::new(Metrics::new());
        let handle = HeartbeatScheduler::spawn(Some(client.clone() as Arc<dyn LifecycleClient>), hook, Duration::from_secs(10), Duration::from_secs(100), metrics);
        handle.abort();
        let _ = handle.await;
        assert!(client.heartbeats.lock().await.is_empty());
    }
}
