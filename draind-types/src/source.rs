//! The `EventSource` protocol — how raw upstream signals become
//! [`InterruptionEvent`]s and [`CancelEvent`]s on the shared channels.
//!
//! Implementations: instance-metadata pollers (spot, scheduled, rebalance,
//! lifecycle-state) and the message-queue long-poller, all in
//! `draind-sources`. New sources can be added without touching the
//! Dispatcher or Store (spec §9, "Event sources as interfaces").

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::event::{CancelEvent, InterruptionEvent};

/// One producer of interruption events.
///
/// Every source is polite: it must honour `stop` promptly and never block
/// the channels past a bounded send timeout (spec §4.1).
#[async_trait]
pub trait EventSource: Send + Sync {
    /// A short, stable name for logs and metrics (e.g. `"spot"`, `"queue"`).
    fn name(&self) -> &str;

    /// Run the source's poll loop until `stop` is cancelled.
    ///
    /// Implementations push normalized events onto `interrupt_tx` and
    /// cancellations onto `cancel_tx`. A source that cannot make progress
    /// (e.g. permanent auth failure) should log and return rather than
    /// busy-loop; the process does not exit because one source failed
    /// (spec §7, "Propagation policy").
    async fn run(
        &self,
        interrupt_tx: mpsc::Sender<InterruptionEvent>,
        cancel_tx: mpsc::Sender<CancelEvent>,
        stop: CancellationToken,
    ) -> Result<(), SourceError>;
}
