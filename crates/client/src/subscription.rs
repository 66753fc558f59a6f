//! Cancelable handle over a job's progress stream.
//!
//! A subscription is a bounded channel fed by a producer (usually a
//! spawned reader task) plus a [`CancellationToken`] the consumer trips
//! to stop it. Closing or dropping the [`ProgressSubscription`] cancels
//! the token, so an abandoned subscription never keeps a connection open.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use v2n_core::progress::ProgressEvent;
use v2n_core::types::JobId;

/// One item delivered on a progress subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressItem {
    Event(ProgressEvent),
    /// The transport lost the stream. No further items follow.
    Error(String),
}

/// Consumer side of a progress stream for one job.
#[derive(Debug)]
pub struct ProgressSubscription {
    job_id: JobId,
    rx: mpsc::Receiver<ProgressItem>,
    cancel: CancellationToken,
}

/// Producer side of a progress stream.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressItem>,
    cancel: CancellationToken,
}

impl ProgressSubscription {
    /// Create a connected sender / subscription pair for `job_id`.
    pub fn channel(job_id: JobId, capacity: usize) -> (ProgressSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let sender = ProgressSender {
            tx,
            cancel: cancel.clone(),
        };
        (sender, Self { job_id, rx, cancel })
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Next item in delivery order, or `None` once the producer is gone or
    /// the subscription was closed.
    pub async fn next(&mut self) -> Option<ProgressItem> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop the producer and drop anything still buffered.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ProgressSender {
    /// Deliver an event. Returns `false` once the subscriber is gone.
    pub async fn send_event(&self, event: ProgressEvent) -> bool {
        self.send(ProgressItem::Event(event)).await
    }

    /// Report a transport failure. Returns `false` once the subscriber is gone.
    pub async fn send_error(&self, reason: impl Into<String>) -> bool {
        self.send(ProgressItem::Error(reason.into())).await
    }

    async fn send(&self, item: ProgressItem) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    /// Whether the subscriber closed or dropped its handle.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the subscriber closes or drops its handle.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}
