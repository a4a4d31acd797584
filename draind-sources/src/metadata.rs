//! Instance-metadata pollers: spot interruption, scheduled maintenance,
//! rebalance recommendation, and ASG target-lifecycle-state. Each is scoped
//! to the node the agent itself runs on (the real-world deployment shape:
//! one replica per node, polling that node's own link-local IMDS), per spec
//! §4.1's "Instance-metadata sources" paragraph.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use draind_cloud::ImdsClient;
use draind_types::{CancelEvent, DrainTask, EventKind, EventSource, InterruptionEvent, SourceError};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

async fn poll_loop<F, Fut>(stop: &CancellationToken, interval: Duration, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = stop.cancelled() => return,
            _ = ticker.tick() => tick().await,
        }
    }
}

fn is_not_found(err: &draind_types::CloudError) -> bool {
    matches!(err, draind_types::CloudError::NotFound(_))
}

/// Polls `/latest/meta-data/spot/instance-action`.
pub struct SpotInterruptionSource {
    imds: Arc<ImdsClient>,
    node_name: String,
    poll_interval: Duration,
}

#[derive(Deserialize)]
struct SpotAction {
    action: String,
    time: DateTime<Utc>,
}

impl SpotInterruptionSource {
    /// Build a source polling the local node's spot-action endpoint.
    #[must_use]
    pub fn new(imds: Arc<ImdsClient>, node_name: impl Into<String>) -> Self {
        Self {
            imds,
            node_name: node_name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[async_trait]
impl EventSource for SpotInterruptionSource {
    fn name(&self) -> &str {
        "spot-interruption"
    }

    async fn run(
        &self,
        interrupt_tx: mpsc::Sender<InterruptionEvent>,
        _cancel_tx: mpsc::Sender<CancelEvent>,
        stop: CancellationToken,
    ) -> Result<(), SourceError> {
        poll_loop(&stop, self.poll_interval, || async {
            match self.imds.get("/latest/meta-data/spot/instance-action").await {
                Ok(body) => match serde_json::from_str::<SpotAction>(&body) {
                    Ok(action) => {
                        let event_id = crate::hash::stable_event_id("spot", &[&action.action, &action.time.to_rfc3339()]);
                        let mut evt = InterruptionEvent::new(event_id, EventKind::SpotInterruption, format!("spot {}", action.action), action.time);
                        evt.node_name = Some(self.node_name.clone());
                        evt.state = "active".to_string();
                        let _ = interrupt_tx.send(evt).await;
                    }
                    Err(e) => tracing::warn!(source = self.name(), error = %e, "parse failure, skipping tick"),
                },
                Err(e) if is_not_found(&e) => {}
                Err(e) => tracing::warn!(source = self.name(), error = %e, "transient poll failure"),
            }
        })
        .await;
        Ok(())
    }
}

/// Polls `/latest/meta-data/events/maintenance/scheduled`.
pub struct ScheduledEventSource {
    imds: Arc<ImdsClient>,
    node_name: String,
    poll_interval: Duration,
}

#[derive(Deserialize)]
struct ScheduledEntry {
    #[serde(rename = "NotBefore")]
    not_before: String,
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Description")]
    description: String,
    #[serde(rename = "EventId")]
    event_id: String,
    #[serde(rename = "State")]
    state: String,
}

const RESTART_CODES: &[&str] = &["system-reboot", "instance-retirement", "instance-stop"];

fn parse_go_reference_time(s: &str) -> Result<DateTime<Utc>, SourceError> {
    NaiveDateTime::parse_from_str(s, "%e %b %Y %H:%M:%S GMT")
        .map(|naive| naive.and_utc())
        .map_err(|e| SourceError::ParseFailure(format!("could not parse {s:?}: {e}")))
}

impl ScheduledEventSource {
    /// Build a source polling the local node's scheduled-events endpoint.
    #[must_use]
    pub fn new(imds: Arc<ImdsClient>, node_name: impl Into<String>) -> Self {
        Self {
            imds,
            node_name: node_name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[async_trait]
impl EventSource for ScheduledEventSource {
    fn name(&self) -> &str {
        "scheduled-event"
    }

    async fn run(
        &self,
        interrupt_tx: mpsc::Sender<InterruptionEvent>,
        cancel_tx: mpsc::Sender<CancelEvent>,
        stop: CancellationToken,
    ) -> Result<(), SourceError> {
        poll_loop(&stop, self.poll_interval, || async {
            match self.imds.get("/latest/meta-data/events/maintenance/scheduled").await {
                Ok(body) => match serde_json::from_str::<Vec<ScheduledEntry>>(&body) {
                    Ok(entries) => {
                        for entry in entries {
                            if entry.state == "canceled" || entry.state == "completed" {
                                let _ = cancel_tx.send(CancelEvent { event_id: entry.event_id }).await;
                                continue;
                            }
                            let not_before = match parse_go_reference_time(&entry.not_before) {
                                Ok(t) => t,
                                Err(e) => {
                                    tracing::warn!(source = self.name(), error = %e, "unparseable NotBefore, dropping entry");
                                    continue;
                                }
                            };
                            let mut evt = InterruptionEvent::new(entry.event_id, EventKind::ScheduledEvent, entry.description, not_before);
                            evt.node_name = Some(self.node_name.clone());
                            evt.state = entry.state;
                            if RESTART_CODES.contains(&entry.code.as_str()) {
                                evt.pre_drain_task = Some(DrainTask::UncordonAfterReboot);
                            }
                            let _ = interrupt_tx.send(evt).await;
                        }
                    }
                    Err(e) => tracing::warn!(source = self.name(), error = %e, "parse failure, skipping tick"),
                },
                Err(e) if is_not_found(&e) => {}
                Err(e) => tracing::warn!(source = self.name(), error = %e, "transient poll failure"),
            }
        })
        .await;
        Ok(())
    }
}

/// Polls `/latest/meta-data/events/recommendations/rebalance`.
pub struct RebalanceRecommendationSource {
    imds: Arc<ImdsClient>,
    node_name: String,
    poll_interval: Duration,
}

#[derive(Deserialize)]
struct RebalanceNotice {
    #[serde(rename = "noticeTime")]
    notice_time: DateTime<Utc>,
}

impl RebalanceRecommendationSource {
    /// Build a source polling the local node's rebalance-recommendation endpoint.
    #[must_use]
    pub fn new(imds: Arc<ImdsClient>, node_name: impl Into<String>) -> Self {
        Self {
            imds,
            node_name: node_name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[async_trait]
impl EventSource for RebalanceRecommendationSource {
    fn name(&self) -> &str {
        "rebalance-recommendation"
    }

    async fn run(
        &self,
        interrupt_tx: mpsc::Sender<InterruptionEvent>,
        _cancel_tx: mpsc::Sender<CancelEvent>,
        stop: CancellationToken,
    ) -> Result<(), SourceError> {
        poll_loop(&stop, self.poll_interval, || async {
            match self.imds.get("/latest/meta-data/events/recommendations/rebalance").await {
                Ok(body) => match serde_json::from_str::<RebalanceNotice>(&body) {
                    Ok(notice) => {
                        let event_id = crate::hash::stable_event_id("rebalance", &[&self.node_name, &notice.notice_time.to_rfc3339()]);
                        let mut evt = InterruptionEvent::new(event_id, EventKind::RebalanceRecommendation, "rebalance recommendation", notice.notice_time);
                        evt.node_name = Some(self.node_name.clone());
                        evt.state = "active".to_string();
                        let _ = interrupt_tx.send(evt).await;
                    }
                    Err(e) => tracing::warn!(source = self.name(), error = %e, "parse failure, skipping tick"),
                },
                Err(e) if is_not_found(&e) => {}
                Err(e) => tracing::warn!(source = self.name(), error = %e, "transient poll failure"),
            }
        })
        .await;
        Ok(())
    }
}

/// Polls `/latest/meta-data/autoscaling/target-lifecycle-state`, a
/// plain-text endpoint (`InService`, `Terminated`, `Warmed:Terminated`,
/// ...). Unlike the queue-sourced lifecycle path, IMDS carries no ASG/hook
/// name, so this source can only drive a drain — it cannot complete a
/// lifecycle hook. Its event is therefore an `AsgTerminateLifecycle` with no
/// `lifecycle_hook` bound.
pub struct TargetLifecycleStateSource {
    imds: Arc<ImdsClient>,
    node_name: String,
    poll_interval: Duration,
}

impl TargetLifecycleStateSource {
    /// Build a source polling the local node's target-lifecycle-state endpoint.
    #[must_use]
    pub fn new(imds: Arc<ImdsClient>, node_name: impl Into<String>) -> Self {
        Self {
            imds,
            node_name: node_name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[async_trait]
impl EventSource for TargetLifecycleStateSource {
    fn name(&self) -> &str {
        "target-lifecycle-state"
    }

    async fn run(
        &self,
        interrupt_tx: mpsc::Sender<InterruptionEvent>,
        _cancel_tx: mpsc::Sender<CancelEvent>,
        stop: CancellationToken,
    ) -> Result<(), SourceError> {
        poll_loop(&stop, self.poll_interval, || async {
            match self.imds.get("/latest/meta-data/autoscaling/target-lifecycle-state").await {
                Ok(state) => {
                    let state = state.trim();
                    if state == "InService" {
                        return;
                    }
                    let event_id = crate::hash::stable_event_id("lifecycle-state", &[&self.node_name, state]);
                    let mut evt = InterruptionEvent::new(event_id, EventKind::AsgTerminateLifecycle, format!("target lifecycle state: {state}"), Utc::now());
                    evt.node_name = Some(self.node_name.clone());
                    evt.state = "active".to_string();
                    let _ = interrupt_tx.send(evt).await;
                }
                Err(e) if is_not_found(&e) => {}
                Err(e) => tracing::warn!(source = self.name(), error = %e, "transient poll failure"),
            }
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_codes_attach_uncordon_after_reboot() {
        assert!(RESTART_CODES.contains(&"system-reboot"));
        assert!(!RESTART_CODES.contains(&"system-maintenance"));
    }

    #[test]
    fn parses_go_reference_scheduled_time() {
        let parsed = parse_go_reference_time("21 Jan 2019 09:00:43 GMT").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2019-01-21T09:00:43+00:00");
    }

    #[test]
    fn unparseable_time_is_rejected() {
        assert!(parse_go_reference_time("not a time").is_err());
    }
}
