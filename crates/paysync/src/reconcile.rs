//! Convergence of local records with provider state.
//!
//! ```text
//!              local?   provider?
//! Repaired       yes      yes     re-project provider state onto the record
//! Materialized   no       yes     build the record from provider state, synced
//! ProviderMissing yes     no      leave the record, report it
//! NotFound       no       no      error
//! ```
//!
//! Runs after an unknown-outcome failure, when a webhook may have been
//! missed, or on operator request. Reconciling takes the same per-key lock as
//! create-and-sync, so it never races a create for the same key.

use crate::error::{Result, SyncError};
use crate::ids::{ExternalId, LocalId, ProviderId};
use crate::record::Record;
use crate::store::Inserted;
use crate::sync::{SyncFamily, Synchronizer};
use chrono::Utc;
use std::fmt;
use tracing::{info, warn};

/// Any of the identifiers a record can be looked up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKey {
    Local(LocalId),
    External(ExternalId),
    Provider(ProviderId),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{id}"),
            Self::External(id) => write!(f, "external:{id}"),
            Self::Provider(id) => write!(f, "provider:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Repaired,
    Materialized,
    /// The record exists locally but the provider has no such resource.
    ProviderMissing,
}

impl ReconcileOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repaired => "repaired",
            Self::Materialized => "materialized",
            Self::ProviderMissing => "provider_missing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation<F: SyncFamily> {
    pub outcome: ReconcileOutcome,
    pub record: Record<F>,
}

/// Per-record result of a sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub repaired: Vec<LocalId>,
    pub provider_missing: Vec<LocalId>,
    pub failed: Vec<(LocalId, SyncError)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.provider_missing.is_empty() && self.failed.is_empty()
    }
}

pub struct Reconciler<F: SyncFamily> {
    sync: Synchronizer<F>,
}

impl<F: SyncFamily> Clone for Reconciler<F> {
    fn clone(&self) -> Self {
        Self {
            sync: self.sync.clone(),
        }
    }
}

impl<F: SyncFamily> Reconciler<F> {
    pub fn new(sync: Synchronizer<F>) -> Self {
        Self { sync }
    }

    pub async fn reconcile(&self, key: ResourceKey) -> Result<Reconciliation<F>> {
        let local = self.find_local(&key).await?;
        let Some(local) = local else {
            return self.adopt(&key).await;
        };

        let _guard = self.sync.lock(local.external_id()).await;
        // Re-read under the lock; a concurrent writer may have moved it.
        let local = self
            .sync
            .find(local.local_id())
            .await?
            .ok_or_else(|| SyncError::not_found(F::FAMILY, &key))?;

        let remote = match local.provider_id() {
            Some(provider_id) => self.fetch(provider_id).await?,
            None => {
                let external_id = local.external_id();
                self.sync
                    .call(
                        "lookup",
                        external_id,
                        self.sync.gateway().get_by_external_id(external_id),
                    )
                    .await?
            }
        };

        match remote {
            Some(response) => {
                let was_synced = local.is_synced();
                let record = self.sync.project(local, &response).await?;
                info!(
                    family = %F::FAMILY,
                    external_id = %record.external_id(),
                    provider_id = ?record.provider_id(),
                    was_synced,
                    "Reconciled record with provider state"
                );
                Ok(Reconciliation {
                    outcome: ReconcileOutcome::Repaired,
                    record,
                })
            }
            None => {
                warn!(
                    family = %F::FAMILY,
                    external_id = %local.external_id(),
                    local_id = %local.local_id(),
                    "Provider has no resource for local record"
                );
                Ok(Reconciliation {
                    outcome: ReconcileOutcome::ProviderMissing,
                    record: local,
                })
            }
        }
    }

    /// Reconcile every unsynced record of the family, up to `limit`.
    pub async fn sweep_unsynced(&self, limit: usize) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for record in self.sync.list_unsynced(limit).await? {
            let local_id = record.local_id();
            match self.reconcile(ResourceKey::Local(local_id)).await {
                Ok(done) => match done.outcome {
                    ReconcileOutcome::ProviderMissing => report.provider_missing.push(local_id),
                    _ => report.repaired.push(local_id),
                },
                Err(err) => {
                    warn!(
                        family = %F::FAMILY,
                        local_id = %local_id,
                        error = %err,
                        "Reconciliation failed"
                    );
                    report.failed.push((local_id, err));
                }
            }
        }
        info!(
            family = %F::FAMILY,
            repaired = report.repaired.len(),
            provider_missing = report.provider_missing.len(),
            failed = report.failed.len(),
            "Unsynced sweep finished"
        );
        Ok(report)
    }

    async fn find_local(&self, key: &ResourceKey) -> Result<Option<Record<F>>> {
        match key {
            ResourceKey::Local(id) => self.sync.find(*id).await,
            ResourceKey::External(id) => self.sync.find_by_external_id(id).await,
            ResourceKey::Provider(id) => self.sync.find_by_provider_id(id).await,
        }
    }

    /// Provider state by id; a missing resource is `None`.
    async fn fetch(&self, provider_id: &ProviderId) -> Result<Option<F::Response>> {
        match self
            .sync
            .call("get", provider_id, self.sync.gateway().get(provider_id))
            .await
        {
            Ok(response) => Ok(Some(response)),
            Err(SyncError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// No local record: build one from provider state if the provider has it.
    async fn adopt(&self, key: &ResourceKey) -> Result<Reconciliation<F>> {
        let remote = match key {
            ResourceKey::Local(_) => None,
            ResourceKey::Provider(provider_id) => self.fetch(provider_id).await?,
            ResourceKey::External(external_id) => {
                self.sync
                    .call(
                        "lookup",
                        external_id,
                        self.sync.gateway().get_by_external_id(external_id),
                    )
                    .await?
            }
        };
        let Some(response) = remote else {
            return Err(SyncError::not_found(F::FAMILY, key));
        };

        let (external_id, body) = F::materialize(self.sync.context(), &response).await?;
        let _guard = self.sync.lock(&external_id).await;
        let draft = Record::new(external_id, body, Utc::now())?;
        let (outcome, record) = match self.sync.insert_materialized(draft).await? {
            Inserted::Created(record) => (ReconcileOutcome::Materialized, record),
            Inserted::Existing(record) => (ReconcileOutcome::Repaired, record),
        };
        let record = self.sync.project(record, &response).await?;
        info!(
            family = %F::FAMILY,
            external_id = %record.external_id(),
            provider_id = ?record.provider_id(),
            outcome = outcome.as_str(),
            "Adopted provider resource"
        );
        Ok(Reconciliation { outcome, record })
    }
}
