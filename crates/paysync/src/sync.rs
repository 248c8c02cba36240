//! Idempotent create-and-sync.
//!
//! ```text
//!  create_and_sync(key, body)
//!        │
//!        ▼
//!  ┌──────────────┐  Existing + synced      ┌──────────────┐
//!  │ lock(key)    │────────────────────────▶│ return local │
//!  │ insert draft │                         └──────────────┘
//!  └──────┬───────┘  Existing + unsynced    ┌───────────────────────┐
//!         │  ───────────────────────────────▶ provider lookup by key│──┐
//!         │ Created                         └───────────────────────┘  │
//!         ▼                                            found │  absent │
//!  ┌──────────────┐  ok   ┌─────────────────────┐          │         │
//!  │ provider     │──────▶│ project: provider id │◀─────────┘         │
//!  │ create(key)  │       │ projection, synced   │                    │
//!  └──────┬───────┘       └─────────────────────┘                    │
//!         │ err                    ▲                                  │
//!         ▼                        └──────── create(key) ◀────────────┘
//!  mark unsynced, classify error
//! ```
//!
//! The draft is persisted before the provider is called, so the key survives
//! a crash between the two. Calls for the same key are serialized in-process
//! by [`KeyLocks`]; across processes the unique key index plus the provider's
//! own dedup on the external id carry the guarantee.

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::gateway::{DeleteOptions, ProviderError, ProviderGateway};
use crate::ids::{ExternalId, LocalId, ProviderId};
use crate::payable::PayableFields;
use crate::record::{Record, Resource};
use crate::shift::ShiftFields;
use crate::store::{Inserted, RecordStore};
use crate::work_location::WorkLocationFields;
use crate::worker::WorkerFields;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// A resource family the synchronizer can mirror.
///
/// Ties a body type to its store, its gateway and its wire shapes.
#[async_trait]
pub trait SyncFamily: Resource {
    type CreateRequest: Serialize + fmt::Debug + Send + Sync;
    type UpdateRequest: Serialize + fmt::Debug + Send + Sync;
    type Response: Clone + fmt::Debug + Send + Sync;

    fn store(ctx: &SyncContext) -> &Arc<dyn RecordStore<Self>>;

    fn gateway(ctx: &SyncContext) -> &Arc<dyn ProviderGateway<Self>>;

    fn synchronizer(all: &Synchronizers) -> &Synchronizer<Self>;

    fn create_request(record: &Record<Self>) -> Self::CreateRequest;

    /// Request that pushes the current body, `None` when the provider does
    /// not support updates for this family.
    fn update_request(record: &Record<Self>) -> Option<Self::UpdateRequest>;

    fn provider_id(response: &Self::Response) -> ProviderId;

    /// Fold provider-computed values into the current projection.
    fn merge_projection(projection: &mut Self::Projection, response: &Self::Response);

    /// Apply provider-observed lifecycle facts to the local body.
    fn observe(_record: &mut Record<Self>, _response: &Self::Response, _now: DateTime<Utc>) {}

    /// Build a local body for a resource that exists only at the provider.
    async fn materialize(
        ctx: &SyncContext,
        response: &Self::Response,
    ) -> Result<(ExternalId, Self)>;
}

// ============================================================================
// Per-key locks
// ============================================================================

/// In-process mutual exclusion per idempotency key.
///
/// Slots are created on demand and dropped once nobody holds or waits on
/// them, so the map stays proportional to in-flight keys.
#[derive(Default)]
pub struct KeyLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let slot = self.slots.entry(key.to_string()).or_default().clone();
        let guard = slot.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Keys with a live slot.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

// ============================================================================
// Synchronizer
// ============================================================================

pub struct Synchronizer<F: SyncFamily> {
    ctx: SyncContext,
    locks: Arc<KeyLocks>,
    _family: PhantomData<fn() -> F>,
}

impl<F: SyncFamily> Clone for Synchronizer<F> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            locks: self.locks.clone(),
            _family: PhantomData,
        }
    }
}

impl<F: SyncFamily> Synchronizer<F> {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            locks: Arc::new(KeyLocks::default()),
            _family: PhantomData,
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    fn store(&self) -> &Arc<dyn RecordStore<F>> {
        F::store(&self.ctx)
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn ProviderGateway<F>> {
        F::gateway(&self.ctx)
    }

    pub(crate) async fn lock(&self, external_id: &ExternalId) -> KeyGuard<'_> {
        self.locks.lock(external_id.as_str()).await
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn get(&self, local_id: LocalId) -> Result<Record<F>> {
        self.store()
            .find(local_id)
            .await?
            .ok_or_else(|| SyncError::not_found(F::FAMILY, local_id))
    }

    pub async fn find(&self, local_id: LocalId) -> Result<Option<Record<F>>> {
        Ok(self.store().find(local_id).await?)
    }

    pub async fn find_by_external_id(&self, external_id: &ExternalId) -> Result<Option<Record<F>>> {
        Ok(self.store().find_by_external_id(external_id).await?)
    }

    pub async fn find_by_provider_id(&self, provider_id: &ProviderId) -> Result<Option<Record<F>>> {
        Ok(self.store().find_by_provider_id(provider_id).await?)
    }

    pub async fn list_unsynced(&self, limit: usize) -> Result<Vec<Record<F>>> {
        Ok(self.store().list_unsynced(limit).await?)
    }

    /// Lock a record's key and read it fresh under the lock.
    pub(crate) async fn locked(&self, local_id: LocalId) -> Result<(KeyGuard<'_>, Record<F>)> {
        let key = self.get(local_id).await?.external_id().clone();
        let guard = self.lock(&key).await;
        let record = self.get(local_id).await?;
        Ok((guard, record))
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Persist a draft under `external_id` and create it at the provider.
    ///
    /// Safe to repeat with the same key: a synced record is returned as-is,
    /// an unsynced one is resumed. Reusing a key with a different body fails
    /// with a conflict.
    pub async fn create_and_sync(&self, external_id: ExternalId, body: F) -> Result<Record<F>> {
        let draft = Record::new(external_id, body, Utc::now())?;
        let _guard = self.lock(draft.external_id()).await;
        let fingerprint = draft.fingerprint().to_string();

        match self.store().insert_if_absent(draft).await? {
            Inserted::Created(record) => {
                debug!(
                    family = %F::FAMILY,
                    external_id = %record.external_id(),
                    local_id = %record.local_id(),
                    "Persisted draft, creating at provider"
                );
                self.push_create(record).await
            }
            Inserted::Existing(existing) => {
                if existing.fingerprint() != fingerprint {
                    warn!(
                        family = %F::FAMILY,
                        external_id = %existing.external_id(),
                        "Idempotency key reused with a different request"
                    );
                    return Err(SyncError::conflict(
                        F::FAMILY,
                        existing.external_id(),
                        "idempotency key already used for a different request",
                    ));
                }
                if existing.is_synced() {
                    warn!(
                        family = %F::FAMILY,
                        external_id = %existing.external_id(),
                        local_id = %existing.local_id(),
                        "Duplicate create detected, returning existing record"
                    );
                    return Ok(existing);
                }
                info!(
                    family = %F::FAMILY,
                    external_id = %existing.external_id(),
                    "Resuming unsynced record"
                );
                self.resume(existing).await
            }
        }
    }

    /// Re-drive an unsynced record: resume its create, or push its body.
    pub async fn resync(&self, local_id: LocalId) -> Result<Record<F>> {
        let (_guard, record) = self.locked(local_id).await?;
        if record.provider_id().is_none() {
            return self.resume(record).await;
        }
        self.push_update(record).await
    }

    async fn resume(&self, record: Record<F>) -> Result<Record<F>> {
        let key = record.external_id().clone();
        let found = self
            .call("lookup", &key, self.gateway().get_by_external_id(&key))
            .await?;
        match found {
            Some(response) => {
                info!(
                    family = %F::FAMILY,
                    external_id = %key,
                    "Provider already holds resource, adopting it"
                );
                self.project(record, &response).await
            }
            None => self.push_create(record).await,
        }
    }

    async fn push_create(&self, mut record: Record<F>) -> Result<Record<F>> {
        let request = F::create_request(&record);
        let key = record.external_id().clone();
        match self.call("create", &key, self.gateway().create(&request)).await {
            Ok(response) => self.project(record, &response).await,
            Err(err) => {
                warn!(
                    family = %F::FAMILY,
                    external_id = %key,
                    kind = err.kind().as_str(),
                    error = %err,
                    "Provider create failed"
                );
                record.mark_failed(err.to_string(), Utc::now());
                self.store().update(&record).await?;
                Err(err)
            }
        }
    }

    /// Persist a locally edited body and push it to the provider.
    ///
    /// Records never created at the provider are only saved locally; their
    /// body goes out with the create when they are resumed.
    ///
    /// On failure the edited body is still saved, marked unsynced with the
    /// error, and [`resync`](Self::resync) is how it reaches the provider.
    pub(crate) async fn push_update(&self, mut record: Record<F>) -> Result<Record<F>> {
        let now = Utc::now();
        let (Some(provider_id), Some(request)) =
            (record.provider_id().cloned(), F::update_request(&record))
        else {
            record.touch(now);
            self.store().update(&record).await?;
            return Ok(record);
        };

        let key = record.external_id().clone();
        match self
            .call("update", &key, self.gateway().update(&provider_id, &request))
            .await
        {
            Ok(response) => self.project(record, &response).await,
            Err(err) => {
                warn!(
                    family = %F::FAMILY,
                    external_id = %key,
                    kind = err.kind().as_str(),
                    error = %err,
                    "Provider update failed"
                );
                record.mark_failed(err.to_string(), now);
                self.store().update(&record).await?;
                Err(err)
            }
        }
    }

    /// Persist a local-only change (lifecycle, notes) without a provider call.
    pub(crate) async fn save(&self, mut record: Record<F>) -> Result<Record<F>> {
        record.touch(Utc::now());
        self.store().update(&record).await?;
        Ok(record)
    }

    /// Write provider-returned state into the record and persist it.
    pub(crate) async fn project(
        &self,
        mut record: Record<F>,
        response: &F::Response,
    ) -> Result<Record<F>> {
        let now = Utc::now();
        record.mark_synced(F::provider_id(response), now);
        F::merge_projection(record.projection_mut(), response);
        F::observe(&mut record, response, now);
        self.store().update(&record).await?;
        debug!(
            family = %F::FAMILY,
            external_id = %record.external_id(),
            provider_id = ?record.provider_id(),
            "Record synced"
        );
        Ok(record)
    }

    /// Remove the resource at the provider; a resource already gone counts
    /// as removed.
    pub(crate) async fn delete_remote(
        &self,
        record: &Record<F>,
        options: DeleteOptions,
    ) -> Result<()> {
        let Some(provider_id) = record.provider_id() else {
            return Ok(());
        };
        match self
            .call(
                "delete",
                record.external_id(),
                self.gateway().delete(provider_id, options),
            )
            .await
        {
            Ok(()) | Err(SyncError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub(crate) async fn delete_local(&self, local_id: LocalId) -> Result<()> {
        self.store().delete(local_id).await?;
        Ok(())
    }

    /// Insert a record built from provider state, or return the one that
    /// raced in first.
    pub(crate) async fn insert_materialized(&self, record: Record<F>) -> Result<Inserted<F>> {
        Ok(self.store().insert_if_absent(record).await?)
    }

    /// Bound a provider call by the configured timeout and classify failure.
    pub(crate) async fn call<R>(
        &self,
        operation: &'static str,
        key: &(impl fmt::Display + ?Sized),
        call: impl Future<Output = std::result::Result<R, ProviderError>>,
    ) -> Result<R> {
        let timeout = self.ctx.settings.call_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(SyncError::from_provider(F::FAMILY, key, operation, err)),
            Err(_) => Err(SyncError::from_provider(
                F::FAMILY,
                key,
                operation,
                ProviderError::Timeout(timeout),
            )),
        }
    }
}

/// One synchronizer per family, sharing the family's key locks.
#[derive(Clone)]
pub struct Synchronizers {
    pub workers: Synchronizer<WorkerFields>,
    pub work_locations: Synchronizer<WorkLocationFields>,
    pub shifts: Synchronizer<ShiftFields>,
    pub payables: Synchronizer<PayableFields>,
}

impl Synchronizers {
    pub fn new(ctx: &SyncContext) -> Self {
        Self {
            workers: Synchronizer::new(ctx.clone()),
            work_locations: Synchronizer::new(ctx.clone()),
            shifts: Synchronizer::new(ctx.clone()),
            payables: Synchronizer::new(ctx.clone()),
        }
    }

    pub fn get<F: SyncFamily>(&self) -> &Synchronizer<F> {
        F::synchronizer(self)
    }
}
