//! Background processing of queued webhook events.
//!
//! ```text
//! claim_ready ──▶ dispatch ──ok──▶ mark_succeeded
//!                    │
//!                    └──err──▶ mark_failed(kind)
//!                                 ├─ Retryable:    backoff 2^attempt s, then retry
//!                                 └─ NonRetryable or out of attempts: dead letter
//! ```
//!
//! Leases that expire (a processor died mid-event) are returned to the queue
//! by the housekeeping tick, which also purges old processed-event marks.

use super::dispatch::{Dispatch, WebhookDispatcher};
use super::event::WebhookEnvelope;
use crate::error::{ErrorKind, Result, SyncError};
use crate::store::{ClaimedEvent, EventQueue, FailureKind, ProcessedEventStore};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// Which handler failures are worth another attempt.
///
/// Wider than [`SyncError::is_retryable`], which answers for a caller
/// repeating one provider call. A queued event is re-run from the top, and
/// its handlers look the resource up before writing, so `UnknownOutcome`
/// and `NotFound` are safe to retry here.
pub fn failure_kind(err: &SyncError) -> FailureKind {
    match err.kind() {
        // NotFound usually means the event beat the record it refers to.
        ErrorKind::TransientProvider
        | ErrorKind::Store
        | ErrorKind::UnknownOutcome
        | ErrorKind::NotFound => FailureKind::Retryable,
        ErrorKind::Authentication
        | ErrorKind::Conflict
        | ErrorKind::PermanentProvider
        | ErrorKind::Validation => FailureKind::NonRetryable,
    }
}

#[derive(Clone)]
pub struct WebhookProcessor {
    queue: Arc<dyn EventQueue>,
    dispatcher: WebhookDispatcher,
    processed_events: Arc<dyn ProcessedEventStore>,
    retention: chrono::Duration,
    worker_id: String,
    batch_size: i64,
    poll_interval: Duration,
    housekeeping_interval: Duration,
}

impl WebhookProcessor {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        dispatcher: WebhookDispatcher,
        processed_events: Arc<dyn ProcessedEventStore>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            processed_events,
            retention: chrono::Duration::days(7),
            worker_id: format!("webhook-{}", uuid::Uuid::new_v4().simple()),
            batch_size: 16,
            poll_interval: Duration::from_millis(500),
            housekeeping_interval: Duration::from_secs(60),
        }
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    /// Claim one batch and process it concurrently.
    pub async fn run_once(&self) -> Result<BatchOutcome> {
        let claimed = self
            .queue
            .claim_ready(&self.worker_id, self.batch_size)
            .await?;
        let mut outcome = BatchOutcome {
            claimed: claimed.len(),
            ..BatchOutcome::default()
        };
        if claimed.is_empty() {
            return Ok(outcome);
        }

        let results = join_all(claimed.into_iter().map(|event| self.process(event))).await;
        for result in results {
            match result? {
                None => outcome.succeeded += 1,
                Some(FailureKind::Retryable) => outcome.retried += 1,
                Some(FailureKind::NonRetryable) => outcome.dead_lettered += 1,
            }
        }
        debug!(
            claimed = outcome.claimed,
            succeeded = outcome.succeeded,
            retried = outcome.retried,
            dead_lettered = outcome.dead_lettered,
            "Processed webhook batch"
        );
        Ok(outcome)
    }

    /// Returns the failure kind recorded, `None` on success.
    async fn process(&self, event: ClaimedEvent) -> Result<Option<FailureKind>> {
        let envelope: WebhookEnvelope = match serde_json::from_value(event.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(
                    event_id = %event.event_id,
                    error = %err,
                    "Queued webhook payload is not an envelope"
                );
                self.queue
                    .mark_failed(event.id, &err.to_string(), FailureKind::NonRetryable)
                    .await?;
                return Ok(Some(FailureKind::NonRetryable));
            }
        };

        match self.dispatcher.dispatch(&envelope).await {
            Ok(dispatch) => {
                if dispatch == Dispatch::Duplicate {
                    debug!(event_id = %event.event_id, "Queued event was already processed");
                }
                self.queue.mark_succeeded(event.id).await?;
                Ok(None)
            }
            Err(err) => {
                let kind = failure_kind(&err);
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    attempt = event.attempt,
                    failure = kind.as_str(),
                    error = %err,
                    "Webhook processing failed"
                );
                self.queue
                    .mark_failed(event.id, &err.to_string(), kind)
                    .await?;
                Ok(Some(kind))
            }
        }
    }

    /// Return expired leases and purge processed marks past retention.
    pub async fn housekeeping(&self) -> Result<()> {
        let reclaimed = self.queue.reclaim_expired().await?;
        let purged = self
            .processed_events
            .purge_older_than(Utc::now() - self.retention)
            .await?;
        if reclaimed > 0 || purged > 0 {
            info!(reclaimed, purged, "Webhook housekeeping");
        }
        Ok(())
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "Webhook processor started");
        let mut poll = tokio::time::interval(self.poll_interval);
        let mut housekeeping = tokio::time::interval(self.housekeeping_interval);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    // Keep draining while batches come back full.
                    loop {
                        match self.run_once().await {
                            Ok(outcome) if outcome.claimed as i64 >= self.batch_size => continue,
                            Ok(_) => break,
                            Err(err) => {
                                error!(error = %err, "Webhook batch failed");
                                break;
                            }
                        }
                    }
                }
                _ = housekeeping.tick() => {
                    if let Err(err) = self.housekeeping().await {
                        error!(error = %err, "Webhook housekeeping failed");
                    }
                }
            }
        }
        info!(worker_id = %self.worker_id, "Webhook processor stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
