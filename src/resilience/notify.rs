//! Asynchronous retry notifications.
//!
//! Retry events are handed to a bounded queue and consumed by a worker task,
//! so the callback never runs on the retrying call's path. When the queue is
//! full the event is dropped and counted.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::middleware::RequestInfo;
use crate::observability::metrics;

/// Default queue depth for retry events.
pub const DEFAULT_NOTIFY_CAPACITY: usize = 64;

/// Snapshot delivered to the retry callback before each retry attempt.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// Request state with `attempt` set to the attempt about to run and
    /// `last_error` describing the failure that triggered it.
    pub info: RequestInfo,
    /// Wait scheduled before this retry runs.
    pub delay: Duration,
}

/// Sending half of the retry notification queue.
#[derive(Debug, Clone)]
pub struct RetryNotifier {
    tx: mpsc::Sender<RetryEvent>,
}

impl RetryNotifier {
    /// Start a worker that invokes `callback` for every delivered event.
    ///
    /// The callback runs on the runtime and should not block. Must be called
    /// from within a Tokio runtime. The worker exits once
    /// every `RetryNotifier` clone has been dropped.
    pub fn spawn<F>(capacity: usize, mut callback: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut(RetryEvent) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                callback(event);
            }
            tracing::debug!("Retry notifier worker stopped");
        });
        (Self { tx }, handle)
    }

    /// Queue `event` without waiting. Returns false if it was dropped.
    pub fn notify(&self, event: RetryEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    provider = %event.info.provider,
                    request_id = %event.info.request_id,
                    attempt = event.info.attempt,
                    "Retry notification queue full, dropping event"
                );
                metrics::record_retry_event_dropped("full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Retry notifier worker gone, dropping event");
                metrics::record_retry_event_dropped("closed");
                false
            }
        }
    }
}
