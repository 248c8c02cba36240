//! In-memory webhook event queue with the same retry and dead-letter rules
//! as the Postgres queue.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use paysync_core::store::{backoff_delay, DEFAULT_MAX_ATTEMPTS};
use paysync_core::webhook::WebhookEnvelope;
use paysync_core::{ClaimedEvent, DeadLetter, Enqueued, EventId, EventQueue, FailureKind, QueueStats};
use serde_json::Value;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Running,
    Succeeded,
    DeadLetter,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: Uuid,
    pub event_id: EventId,
    pub event_type: String,
    pub payload: Value,
    pub status: EntryStatus,
    pub attempt: i32,
    pub run_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
}

pub struct InMemoryQueue {
    entries: Mutex<Vec<QueueEntry>>,
    max_attempts: i32,
    lease: Duration,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lease: Duration::seconds(60),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.lock().clone()
    }

    pub fn entry(&self, event_id: &str) -> Option<QueueEntry> {
        self.lock()
            .iter()
            .find(|entry| entry.event_id.as_str() == event_id)
            .cloned()
    }

    /// Make backed-off entries ready now, so tests need not wait.
    pub fn release_delayed(&self) {
        let now = Utc::now();
        for entry in self.lock().iter_mut() {
            if entry.status == EntryStatus::Pending {
                entry.run_at = now;
            }
        }
    }

    /// Expire every running lease, as if its processor had died.
    pub fn expire_leases(&self) {
        let past = Utc::now() - Duration::seconds(1);
        for entry in self.lock().iter_mut() {
            if entry.status == EntryStatus::Running {
                entry.lease_expires_at = Some(past);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueueEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_entry(&self, id: Uuid, f: impl FnOnce(&mut QueueEntry)) -> Result<()> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| anyhow::anyhow!("queue entry {id} not found"))?;
        f(entry);
        Ok(())
    }
}

#[async_trait]
impl EventQueue for InMemoryQueue {
    async fn enqueue(&self, envelope: &WebhookEnvelope) -> Result<Enqueued> {
        let payload = serde_json::to_value(envelope)?;
        let mut entries = self.lock();
        if entries.iter().any(|entry| entry.event_id == envelope.id) {
            return Ok(Enqueued::Duplicate);
        }
        let id = Uuid::new_v4();
        entries.push(QueueEntry {
            id,
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            payload,
            status: EntryStatus::Pending,
            attempt: 0,
            run_at: Utc::now(),
            lease_expires_at: None,
            error_message: None,
            failed_at: None,
        });
        Ok(Enqueued::New(id))
    }

    async fn claim_ready(&self, _worker_id: &str, limit: i64) -> Result<Vec<ClaimedEvent>> {
        let now = Utc::now();
        let mut entries = self.lock();
        let mut claimed = Vec::new();
        for entry in entries.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if entry.status != EntryStatus::Pending || entry.run_at > now {
                continue;
            }
            entry.status = EntryStatus::Running;
            entry.attempt += 1;
            entry.lease_expires_at = Some(now + self.lease);
            claimed.push(ClaimedEvent {
                id: entry.id,
                event_id: entry.event_id.clone(),
                event_type: entry.event_type.clone(),
                payload: entry.payload.clone(),
                attempt: entry.attempt,
            });
        }
        Ok(claimed)
    }

    async fn mark_succeeded(&self, id: Uuid) -> Result<()> {
        self.with_entry(id, |entry| {
            entry.status = EntryStatus::Succeeded;
            entry.lease_expires_at = None;
            entry.error_message = None;
        })
    }

    async fn mark_failed(&self, id: Uuid, error: &str, kind: FailureKind) -> Result<()> {
        let max_attempts = self.max_attempts;
        self.with_entry(id, |entry| {
            let now = Utc::now();
            entry.lease_expires_at = None;
            entry.error_message = Some(error.to_string());
            if kind == FailureKind::Retryable && entry.attempt < max_attempts {
                entry.status = EntryStatus::Pending;
                entry.run_at = now + backoff_delay(entry.attempt);
            } else {
                entry.status = EntryStatus::DeadLetter;
                entry.failed_at = Some(now);
            }
        })
    }

    async fn reclaim_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut reclaimed = 0;
        for entry in self.lock().iter_mut() {
            let expired = entry.lease_expires_at.is_some_and(|lease| lease < now);
            if entry.status == EntryStatus::Running && expired {
                entry.status = EntryStatus::Pending;
                entry.lease_expires_at = None;
                entry.run_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>> {
        Ok(self
            .lock()
            .iter()
            .filter(|entry| entry.status == EntryStatus::DeadLetter)
            .take(limit.max(0) as usize)
            .map(|entry| DeadLetter {
                id: entry.id,
                event_id: entry.event_id.clone(),
                event_type: entry.event_type.clone(),
                attempt: entry.attempt,
                error_message: entry.error_message.clone(),
                failed_at: entry.failed_at.unwrap_or_else(Utc::now),
            })
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for entry in self.lock().iter() {
            match entry.status {
                EntryStatus::Pending => stats.pending += 1,
                EntryStatus::Running => stats.running += 1,
                EntryStatus::Succeeded => stats.succeeded += 1,
                EntryStatus::DeadLetter => stats.dead_letter += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(id: &str) -> WebhookEnvelope {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "type": "worker.created",
            "data": {"object": {}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn retryable_failures_back_off_then_dead_letter() {
        let queue = InMemoryQueue::new().with_max_attempts(2);
        queue.enqueue(&envelope("evt_1")).await.unwrap();

        let first = queue.claim_ready("w", 10).await.unwrap();
        assert_eq!(first.len(), 1);
        queue
            .mark_failed(first[0].id, "db down", FailureKind::Retryable)
            .await
            .unwrap();
        assert!(queue.claim_ready("w", 10).await.unwrap().is_empty());

        queue.release_delayed();
        let second = queue.claim_ready("w", 10).await.unwrap();
        assert_eq!(second[0].attempt, 2);
        queue
            .mark_failed(second[0].id, "db down", FailureKind::Retryable)
            .await
            .unwrap();

        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error_message.as_deref(), Some("db down"));
    }

    #[tokio::test]
    async fn expired_leases_are_reclaimed() {
        let queue = InMemoryQueue::new();
        queue.enqueue(&envelope("evt_2")).await.unwrap();
        assert_eq!(
            queue.enqueue(&envelope("evt_2")).await.unwrap(),
            Enqueued::Duplicate
        );
        queue.claim_ready("w", 10).await.unwrap();
        queue.expire_leases();
        assert_eq!(queue.reclaim_expired().await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().pending, 1);
    }
}
