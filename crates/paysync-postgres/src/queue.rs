//! Durable webhook queue on `paysync_webhook_events`.
//!
//! - Claims with `FOR UPDATE SKIP LOCKED`, so concurrent processors never
//!   lease the same event
//! - Enqueue is deduplicated by the provider's event id
//! - Retryable failures back off `2^attempt` seconds (max 1 hour) until
//!   `max_attempts`, then move to dead letter

use crate::PgStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use paysync_core::store::backoff_delay;
use paysync_core::webhook::WebhookEnvelope;
use paysync_core::{ClaimedEvent, DeadLetter, Enqueued, EventId, EventQueue, FailureKind, QueueStats};
use sqlx::Row;
use uuid::Uuid;

#[async_trait]
impl EventQueue for PgStore {
    async fn enqueue(&self, envelope: &WebhookEnvelope) -> Result<Enqueued> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO paysync_webhook_events (id, event_id, event_type, payload, max_attempts)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(envelope.id.as_str())
        .bind(&envelope.event_type)
        .bind(serde_json::to_value(envelope)?)
        .bind(self.max_attempts)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            Enqueued::New(id)
        } else {
            Enqueued::Duplicate
        })
    }

    /// Leases up to `limit` due events to `worker_id`, oldest `run_at` first.
    async fn claim_ready(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedEvent>> {
        let lease_expires_at = Utc::now() + Duration::milliseconds(self.lease_ms);

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM paysync_webhook_events
                WHERE status = 'pending'
                  AND run_at <= NOW()
                ORDER BY run_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE paysync_webhook_events
            SET status = 'running',
                attempt = attempt + 1,
                worker_id = $2,
                lease_expires_at = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, event_id, event_type, payload, attempt
            "#,
        )
        .bind(limit)
        .bind(worker_id)
        .bind(lease_expires_at)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ClaimedEvent> {
                Ok(ClaimedEvent {
                    id: row.try_get("id")?,
                    event_id: EventId::new(row.try_get::<String, _>("event_id")?),
                    event_type: row.try_get("event_type")?,
                    payload: row.try_get("payload")?,
                    attempt: row.try_get("attempt")?,
                })
            })
            .collect()
    }

    async fn mark_succeeded(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE paysync_webhook_events
            SET status = 'succeeded',
                worker_id = NULL,
                lease_expires_at = NULL,
                error_message = NULL,
                error_kind = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Schedule a retry or dead-letter the event.
    async fn mark_failed(&self, id: Uuid, error: &str, kind: FailureKind) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let event = sqlx::query(
            "SELECT attempt, max_attempts FROM paysync_webhook_events WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let attempt: i32 = event.try_get("attempt")?;
        let max_attempts: i32 = event.try_get("max_attempts")?;

        match kind {
            FailureKind::Retryable if attempt < max_attempts => {
                let retry_at = Utc::now() + backoff_delay(attempt);

                sqlx::query(
                    r#"
                    UPDATE paysync_webhook_events
                    SET status = 'pending',
                        run_at = $1,
                        error_message = $2,
                        error_kind = 'retryable',
                        worker_id = NULL,
                        lease_expires_at = NULL,
                        updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(retry_at)
                .bind(error)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
            _ => {
                sqlx::query(
                    r#"
                    UPDATE paysync_webhook_events
                    SET status = 'dead_letter',
                        error_message = $1,
                        error_kind = $2,
                        worker_id = NULL,
                        lease_expires_at = NULL,
                        updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(error)
                .bind(kind.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE paysync_webhook_events
            SET status = 'pending',
                run_at = NOW(),
                worker_id = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
              AND lease_expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, event_type, attempt, error_message, updated_at
            FROM paysync_webhook_events
            WHERE status = 'dead_letter'
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<DeadLetter> {
                Ok(DeadLetter {
                    id: row.try_get("id")?,
                    event_id: EventId::new(row.try_get::<String, _>("event_id")?),
                    event_type: row.try_get("event_type")?,
                    attempt: row.try_get("attempt")?,
                    error_message: row.try_get("error_message")?,
                    failed_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'running') as running,
                COUNT(*) FILTER (WHERE status = 'succeeded') as succeeded,
                COUNT(*) FILTER (WHERE status = 'dead_letter') as dead_letter
            FROM paysync_webhook_events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.try_get("pending")?,
            running: row.try_get("running")?,
            succeeded: row.try_get("succeeded")?,
            dead_letter: row.try_get("dead_letter")?,
        })
    }
}

/// Maintenance outside the engine's queue port.
impl PgStore {
    /// Put a dead-lettered event back in the queue with a fresh attempt
    /// budget, e.g. after fixing the bug that failed it.
    pub async fn requeue_dead_letter(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE paysync_webhook_events
            SET status = 'pending',
                attempt = 0,
                run_at = NOW(),
                error_message = NULL,
                error_kind = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'dead_letter'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete succeeded events last touched before `older_than`.
    pub async fn cleanup_succeeded(&self, older_than: chrono::DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM paysync_webhook_events
            WHERE status = 'succeeded'
              AND updated_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
