//! The interruption message queue collaborator.
//!
//! The real wire protocol (AWS SQS) is out of scope (spec §1's Non-goals);
//! `QueueClient` is the trait boundary draind-sources programs against, and
//! `SqsLikeQueueClient` is a thin `reqwest` implementation hitting an
//! operator-configured long-poll endpoint, matching the stand-in-collaborator
//! guidance in spec §6.

use async_trait::async_trait;
use draind_types::CloudError;
use serde::Deserialize;

use crate::backoff::retry_with_backoff;
use crate::error::{map_reqwest_error, map_response};

/// One message received from the queue, still un-acknowledged.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueMessage {
    /// Opaque receipt handle, echoed back on [`QueueClient::delete_message`].
    pub receipt_handle: String,
    /// Raw JSON body of the notification.
    pub body: String,
}

#[derive(Deserialize)]
struct ReceiveResponse {
    #[serde(default)]
    messages: Vec<QueueMessage>,
}

/// Long-poll receive / delete surface for the interruption queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Long-poll for up to `max_messages` messages, waiting up to
    /// `wait_seconds` before returning an empty batch.
    async fn receive(&self, max_messages: u32, wait_seconds: u32) -> Result<Vec<QueueMessage>, CloudError>;

    /// Acknowledge and remove a message so it is not redelivered.
    async fn delete_message(&self, receipt_handle: &str) -> Result<(), CloudError>;
}

/// `reqwest`-based [`QueueClient`] against an operator-configured HTTP
/// endpoint speaking a minimal SQS-like JSON protocol.
pub struct SqsLikeQueueClient {
    client: reqwest::Client,
    base_url: String,
}

impl SqsLikeQueueClient {
    /// Build a client against `base_url` (the queue endpoint configured via
    /// `draind-config::EngineConfig`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl QueueClient for SqsLikeQueueClient {
    async fn receive(&self, max_messages: u32, wait_seconds: u32) -> Result<Vec<QueueMessage>, CloudError> {
        retry_with_backoff(|| async {
            let resp = self
                .client
                .get(format!("{}/messages", self.base_url))
                .query(&[
                    ("max_messages", max_messages.to_string()),
                    ("wait_seconds", wait_seconds.to_string()),
                ])
                .timeout(std::time::Duration::from_secs(u64::from(wait_seconds) + 5))
                .send()
                .await
                .map_err(map_reqwest_error)?;
            let resp = map_response(resp).await?;
            let parsed: ReceiveResponse = resp.json().await.map_err(map_reqwest_error)?;
            Ok(parsed.messages)
        })
        .await
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), CloudError> {
        retry_with_backoff(|| async {
            let resp = self
                .client
                .delete(format!("{}/messages/{receipt_handle}", self.base_url))
                .send()
                .await
                .map_err(map_reqwest_error)?;
            map_response(resp).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_client_drains_and_records_deletes() {
        let fake = crate::FakeQueueClient {
            messages: tokio::sync::Mutex::new(vec![QueueMessage {
                receipt_handle: "r1".into(),
                body: "{}".into(),
            }]),
            deleted: tokio::sync::Mutex::new(Vec::new()),
        };
        let batch = fake.receive(10, 0).await.unwrap();
        assert_eq!(batch.len(), 1);
        fake.delete_message("r1").await.unwrap();
        assert_eq!(fake.deleted.lock().await.as_slice(), ["r1".to_string()]);
    }
}
