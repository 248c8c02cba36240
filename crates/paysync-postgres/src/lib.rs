//! PostgreSQL storage for paysync.
//!
//! One [`PgStore`] implements every persistence port of the engine:
//!
//! - `RecordStore<T>` for all resource families, in one table keyed by
//!   family and local id, with a unique index on family and external id
//! - `ProcessedEventStore` for webhook dedup
//! - `EventQueue`, the durable webhook queue (see [`queue`])
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE paysync_records (
//!     family TEXT NOT NULL,
//!     local_id UUID NOT NULL,
//!     external_id TEXT NOT NULL,
//!     provider_id TEXT,
//!     synced BOOLEAN NOT NULL DEFAULT FALSE,
//!     record JSONB NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (family, local_id),
//!     UNIQUE (family, external_id)
//! );
//!
//! CREATE INDEX idx_paysync_records_provider ON paysync_records (family, provider_id)
//!     WHERE provider_id IS NOT NULL;
//! CREATE INDEX idx_paysync_records_unsynced ON paysync_records (family, created_at)
//!     WHERE NOT synced;
//!
//! CREATE TABLE paysync_processed_events (
//!     event_id TEXT PRIMARY KEY,
//!     processed_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE paysync_webhook_events (
//!     id UUID PRIMARY KEY,
//!     event_id TEXT NOT NULL UNIQUE,
//!     event_type TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!
//!     -- Execution
//!     status TEXT NOT NULL DEFAULT 'pending'
//!         CHECK (status IN ('pending', 'running', 'succeeded', 'dead_letter')),
//!     attempt INTEGER NOT NULL DEFAULT 0,
//!     max_attempts INTEGER NOT NULL,
//!     run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!
//!     -- Worker tracking
//!     worker_id TEXT,
//!     lease_expires_at TIMESTAMPTZ,
//!
//!     -- Error tracking
//!     error_message TEXT,
//!     error_kind TEXT CHECK (error_kind IN ('retryable', 'non_retryable')),
//!
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE INDEX idx_paysync_webhook_events_ready ON paysync_webhook_events (run_at)
//!     WHERE status = 'pending';
//! CREATE INDEX idx_paysync_webhook_events_lease ON paysync_webhook_events (lease_expires_at)
//!     WHERE status = 'running';
//! ```
//!
//! [`PgStore::migrate`] creates all of the above if missing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use paysync_core::{Engine, Gateways, Stores, SyncContext};
//! use paysync_postgres::PgStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/payroll").await?;
//! let store = Arc::new(PgStore::new(pool));
//! store.migrate().await?;
//!
//! let ctx = SyncContext::new(Stores::shared(store.clone()), gateways);
//! let engine = Engine::new(ctx);
//! let processor = engine.processor(store);
//! ```

pub mod queue;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paysync_core::store::DEFAULT_MAX_ATTEMPTS;
use paysync_core::{
    EventId, ExternalId, Inserted, LocalId, ProcessedEventStore, ProviderId, Record, RecordStore,
    Resource,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS paysync_records (
    family TEXT NOT NULL,
    local_id UUID NOT NULL,
    external_id TEXT NOT NULL,
    provider_id TEXT,
    synced BOOLEAN NOT NULL DEFAULT FALSE,
    record JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (family, local_id),
    UNIQUE (family, external_id)
);

CREATE INDEX IF NOT EXISTS idx_paysync_records_provider ON paysync_records (family, provider_id)
    WHERE provider_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_paysync_records_unsynced ON paysync_records (family, created_at)
    WHERE NOT synced;

CREATE TABLE IF NOT EXISTS paysync_processed_events (
    event_id TEXT PRIMARY KEY,
    processed_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS paysync_webhook_events (
    id UUID PRIMARY KEY,
    event_id TEXT NOT NULL UNIQUE,
    event_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'running', 'succeeded', 'dead_letter')),
    attempt INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    worker_id TEXT,
    lease_expires_at TIMESTAMPTZ,
    error_message TEXT,
    error_kind TEXT CHECK (error_kind IN ('retryable', 'non_retryable')),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_paysync_webhook_events_ready ON paysync_webhook_events (run_at)
    WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_paysync_webhook_events_lease ON paysync_webhook_events (lease_expires_at)
    WHERE status = 'running';
"#;

/// PostgreSQL store for records, processed events and the webhook queue.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lease_ms: i64,
    max_attempts: i32,
}

impl PgStore {
    /// Create a store over `pool`.
    ///
    /// # Default Settings
    ///
    /// - Queue lease timeout: 60 seconds
    /// - Queue attempts before dead letter: 5
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_ms: 60_000,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// How long a processor may hold a claimed event before it is reclaimed.
    pub fn with_lease_timeout(mut self, lease_ms: i64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    /// Attempts a retryable event gets before it is dead-lettered. Applies
    /// to events enqueued afterwards.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("applying paysync schema")?;
        info!("Paysync schema ready");
        Ok(())
    }
}

fn decode<T: Resource>(row: &PgRow) -> Result<Record<T>> {
    let value: serde_json::Value = row.try_get("record")?;
    serde_json::from_value(value).with_context(|| format!("corrupt {} record", T::FAMILY))
}

// ============================================================================
// Records
// ============================================================================

#[async_trait]
impl<T: Resource> RecordStore<T> for PgStore {
    async fn find(&self, local_id: LocalId) -> Result<Option<Record<T>>> {
        let row = sqlx::query("SELECT record FROM paysync_records WHERE family = $1 AND local_id = $2")
            .bind(T::FAMILY.as_str())
            .bind(local_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode::<T>).transpose()
    }

    async fn find_by_external_id(&self, external_id: &ExternalId) -> Result<Option<Record<T>>> {
        let row = sqlx::query(
            "SELECT record FROM paysync_records WHERE family = $1 AND external_id = $2",
        )
        .bind(T::FAMILY.as_str())
        .bind(external_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode::<T>).transpose()
    }

    async fn find_by_provider_id(&self, provider_id: &ProviderId) -> Result<Option<Record<T>>> {
        let row = sqlx::query(
            "SELECT record FROM paysync_records WHERE family = $1 AND provider_id = $2 LIMIT 1",
        )
        .bind(T::FAMILY.as_str())
        .bind(provider_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode::<T>).transpose()
    }

    /// `ON CONFLICT DO NOTHING` on the external-id index makes the insert
    /// atomic across processes.
    async fn insert_if_absent(&self, record: Record<T>) -> Result<Inserted<T>> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO paysync_records
                (family, local_id, external_id, provider_id, synced, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (family, external_id) DO NOTHING
            "#,
        )
        .bind(T::FAMILY.as_str())
        .bind(record.local_id().as_uuid())
        .bind(record.external_id().as_str())
        .bind(record.provider_id().map(ProviderId::as_str))
        .bind(record.is_synced())
        .bind(serde_json::to_value(&record)?)
        .bind(record.created_at())
        .bind(record.updated_at())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(Inserted::Created(record));
        }
        let existing = RecordStore::<T>::find_by_external_id(self, record.external_id())
            .await?
            .context("external id conflicted but no record holds it")?;
        Ok(Inserted::Existing(existing))
    }

    async fn update(&self, record: &Record<T>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE paysync_records
            SET provider_id = $1,
                synced = $2,
                record = $3,
                updated_at = $4
            WHERE family = $5 AND local_id = $6
            "#,
        )
        .bind(record.provider_id().map(ProviderId::as_str))
        .bind(record.is_synced())
        .bind(serde_json::to_value(record)?)
        .bind(record.updated_at())
        .bind(T::FAMILY.as_str())
        .bind(record.local_id().as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("{} {} does not exist", T::FAMILY, record.local_id());
        }
        Ok(())
    }

    async fn delete(&self, local_id: LocalId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM paysync_records WHERE family = $1 AND local_id = $2")
            .bind(T::FAMILY.as_str())
            .bind(local_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_unsynced(&self, limit: usize) -> Result<Vec<Record<T>>> {
        let rows = sqlx::query(
            r#"
            SELECT record
            FROM paysync_records
            WHERE family = $1 AND NOT synced
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(T::FAMILY.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode::<T>).collect()
    }
}

// ============================================================================
// Processed events
// ============================================================================

#[async_trait]
impl ProcessedEventStore for PgStore {
    async fn record_if_absent(&self, event_id: &EventId, processed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO paysync_processed_events (event_id, processed_at)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id.as_str())
        .bind(processed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn contains(&self, event_id: &EventId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM paysync_processed_events WHERE event_id = $1")
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn release(&self, event_id: &EventId) -> Result<()> {
        sqlx::query("DELETE FROM paysync_processed_events WHERE event_id = $1")
            .bind(event_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM paysync_processed_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
