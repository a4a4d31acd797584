//! Autoscaling lifecycle action completion and heartbeating.

use async_trait::async_trait;
use draind_types::{CloudError, LifecycleResult};
use serde::Serialize;

use crate::backoff::retry_with_backoff;
use crate::error::{map_reqwest_error, map_response};

/// `CompleteLifecycleAction` / `RecordLifecycleActionHeartbeat` surface.
#[async_trait]
pub trait LifecycleClient: Send + Sync {
    /// Resolve a paused lifecycle hook with `outcome`.
    async fn complete(
        &self,
        group: &str,
        hook: &str,
        instance: &str,
        token: Option<&str>,
        outcome: LifecycleResult,
    ) -> Result<(), CloudError>;

    /// Extend the hook's timeout window before it auto-resolves.
    async fn heartbeat(
        &self,
        group: &str,
        hook: &str,
        instance: &str,
        token: Option<&str>,
    ) -> Result<(), CloudError>;
}

#[derive(Serialize)]
struct CompleteRequest<'a> {
    auto_scaling_group_name: &'a str,
    lifecycle_hook_name: &'a str,
    instance_id: &'a str,
    lifecycle_action_token: Option<&'a str>,
    lifecycle_action_result: &'static str,
}

#[derive(Serialize)]
struct HeartbeatRequest<'a> {
    auto_scaling_group_name: &'a str,
    lifecycle_hook_name: &'a str,
    instance_id: &'a str,
    lifecycle_action_token: Option<&'a str>,
}

/// `reqwest`-based [`LifecycleClient`] against an operator-configured
/// endpoint, matching `SqsLikeQueueClient`'s shape.
pub struct LifecycleHttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl LifecycleHttpClient {
    /// Build a client against `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LifecycleClient for LifecycleHttpClient {
    async fn complete(
        &self,
        group: &str,
        hook: &str,
        instance: &str,
        token: Option<&str>,
        outcome: LifecycleResult,
    ) -> Result<(), CloudError> {
        let body = CompleteRequest {
            auto_scaling_group_name: group,
            lifecycle_hook_name: hook,
            instance_id: instance,
            lifecycle_action_token: token,
            lifecycle_action_result: outcome.as_str(),
        };
        retry_with_backoff(|| async {
            let resp = self
                .client
                .post(format!("{}/complete-lifecycle-action", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            map_response(resp).await?;
            Ok(())
        })
        .await
    }

    async fn heartbeat(
        &self,
        group: &str,
        hook: &str,
        instance: &str,
        token: Option<&str>,
    ) -> Result<(), CloudError> {
        let body = HeartbeatRequest {
            auto_scaling_group_name: group,
            lifecycle_hook_name: hook,
            instance_id: instance,
            lifecycle_action_token: token,
        };
        retry_with_backoff(|| async {
            let resp = self
                .client
                .post(format!("{}/record-lifecycle-action-heartbeat", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            map_response(resp).await?;
            Ok(())
        })
        .await
    }
}
