//! Persistence ports.
//!
//! Three stores back the engine:
//!
//! - [`RecordStore`] - one per resource family, keyed by local id with a
//!   unique index on external id
//! - [`ProcessedEventStore`] - delivered event ids, for webhook dedup
//! - [`EventQueue`] - durable queue between webhook intake and processing
//!
//! Infrastructure traits return `anyhow::Result`; the engine wraps failures
//! into [`SyncError::Store`](crate::SyncError::Store).

use crate::ids::{EventId, ExternalId, LocalId, ProviderId};
use crate::record::{Record, Resource};
use crate::webhook::WebhookEnvelope;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of an atomic insert keyed by external id.
#[derive(Debug, Clone)]
pub enum Inserted<T: Resource> {
    Created(Record<T>),
    /// A record with the same external id already exists; it is returned
    /// unchanged.
    Existing(Record<T>),
}

#[async_trait]
pub trait RecordStore<T: Resource>: Send + Sync {
    async fn find(&self, local_id: LocalId) -> Result<Option<Record<T>>>;

    async fn find_by_external_id(&self, external_id: &ExternalId) -> Result<Option<Record<T>>>;

    async fn find_by_provider_id(&self, provider_id: &ProviderId) -> Result<Option<Record<T>>>;

    /// Insert unless a record with the same external id exists.
    ///
    /// Must be atomic: of two concurrent inserts with the same key exactly
    /// one returns `Created`.
    async fn insert_if_absent(&self, record: Record<T>) -> Result<Inserted<T>>;

    /// Overwrite an existing record.
    async fn update(&self, record: &Record<T>) -> Result<()>;

    async fn delete(&self, local_id: LocalId) -> Result<bool>;

    /// Records whose last provider call did not succeed, oldest first.
    async fn list_unsynced(&self, limit: usize) -> Result<Vec<Record<T>>>;
}

/// A delivered event, kept for the dedup retention window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: EventId,
    pub processed_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Record the event id; `false` if it was already present.
    async fn record_if_absent(&self, event_id: &EventId, processed_at: DateTime<Utc>)
        -> Result<bool>;

    async fn contains(&self, event_id: &EventId) -> Result<bool>;

    /// Forget an event id so a redelivery is processed again.
    async fn release(&self, event_id: &EventId) -> Result<()>;

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

// ============================================================================
// Event queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Try again after backoff until attempts run out.
    Retryable,
    /// Move to dead letters immediately.
    NonRetryable,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::NonRetryable => "non_retryable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    New(Uuid),
    /// An entry for the same event id already exists.
    Duplicate,
}

/// A queued event leased to one processor.
#[derive(Debug, Clone)]
pub struct ClaimedEvent {
    pub id: Uuid,
    pub event_id: EventId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub attempt: i32,
}

/// An event that exhausted its attempts or failed permanently.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: Uuid,
    pub event_id: EventId,
    pub event_type: String,
    pub attempt: i32,
    pub error_message: Option<String>,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub succeeded: i64,
    pub dead_letter: i64,
}

/// Durable queue between webhook intake and processing.
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn enqueue(&self, envelope: &WebhookEnvelope) -> Result<Enqueued>;

    /// Lease up to `limit` ready events.
    async fn claim_ready(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedEvent>>;

    async fn mark_succeeded(&self, id: Uuid) -> Result<()>;

    async fn mark_failed(&self, id: Uuid, error: &str, kind: FailureKind) -> Result<()>;

    /// Return events whose lease expired to the pending state.
    async fn reclaim_expired(&self) -> Result<u64>;

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>>;

    async fn stats(&self) -> Result<QueueStats>;
}

/// Attempts before a retryable failure is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Backoff before retry `attempt`: `2^attempt` seconds, capped at an hour.
pub fn backoff_delay(attempt: i32) -> Duration {
    let exponent = attempt.clamp(0, 12) as u32;
    Duration::seconds(2i64.pow(exponent).min(3600))
}
