//! In-memory collaborator doubles, available under the `test-utils` feature
//! (or automatically in `cfg(test)` builds).

use async_trait::async_trait;
use draind_types::{CloudError, LifecycleResult};
use tokio::sync::Mutex;

use crate::lifecycle::LifecycleClient;
use crate::queue::{QueueClient, QueueMessage};

/// In-memory [`QueueClient`]: `receive` drains a preloaded `Vec`, `delete_message`
/// records the receipt handles it was asked to delete.
#[derive(Default)]
pub struct FakeQueueClient {
    /// Messages waiting to be drained by `receive`.
    pub messages: Mutex<Vec<QueueMessage>>,
    /// Receipt handles passed to `delete_message`, in call order.
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl QueueClient for FakeQueueClient {
    async fn receive(&self, max_messages: u32, _wait_seconds: u32) -> Result<Vec<QueueMessage>, CloudError> {
        let mut guard = self.messages.lock().await;
        let take = (max_messages as usize).min(guard.len());
        Ok(guard.drain(..take).collect())
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), CloudError> {
        self.deleted.lock().await.push(receipt_handle.to_string());
        Ok(())
    }
}

/// In-memory [`LifecycleClient`] recording every `complete`/`heartbeat` call.
#[derive(Default)]
pub struct FakeLifecycleClient {
    /// `(group, hook, instance, outcome)` tuples passed to `complete`.
    pub completed: Mutex<Vec<(String, String, String, LifecycleResult)>>,
    /// `(group, hook, instance)` tuples passed to `heartbeat`.
    pub heartbeats: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl LifecycleClient for FakeLifecycleClient {
    async fn complete(
        &self,
        group: &str,
        hook: &str,
        instance: &str,
        _token: Option<&str>,
        outcome: LifecycleResult,
    ) -> Result<(), CloudError> {
        self.completed
            .lock()
            .await
            .push((group.to_string(), hook.to_string(), instance.to_string(), outcome));
        Ok(())
    }

    async fn heartbeat(
        &self,
        group: &str,
        hook: &str,
        instance: &str,
        _token: Option<&str>,
    ) -> Result<(), CloudError> {
        self.heartbeats
            .lock()
            .await
            .push((group.to_string(), hook.to_string(), instance.to_string()));
        Ok(())
    }
}
