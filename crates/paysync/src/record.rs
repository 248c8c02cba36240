//! The local mirror of a provider-backed resource.
//!
//! ```text
//! Record<T>
//! ├── local_id        system identity, never changes
//! ├── external_id     idempotency key, fixed before the first provider call
//! ├── body: T         locally authored fields + lifecycle
//! ├── projection      provider-computed values (read-only locally)
//! ├── sync            provider id, synced flag, last error
//! └── fingerprint     digest of the body as first stored, guards key reuse
//! ```
//!
//! Sync fields are written only by the synchronizer and the reconciler; the
//! mutators are crate-private for that reason.

use crate::ids::{ExternalId, LocalId, ProviderId, ResourceFamily};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A locally authored body mirrored to the provider.
pub trait Resource:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const FAMILY: ResourceFamily;

    /// Values the provider computes and this system only reads.
    type Projection: Clone
        + fmt::Debug
        + Default
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
}

/// Synchronization status of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    provider_id: Option<ProviderId>,
    synced: bool,
    synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl SyncState {
    pub fn provider_id(&self) -> Option<&ProviderId> {
        self.provider_id.as_ref()
    }

    /// True iff the most recent provider call for this record succeeded.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn mark_synced(&mut self, provider_id: ProviderId, at: DateTime<Utc>) {
        self.provider_id = Some(provider_id);
        self.synced = true;
        self.synced_at = Some(at);
        self.last_error = None;
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) {
        self.synced = false;
        self.last_error = Some(error.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Record<T: Resource> {
    local_id: LocalId,
    external_id: ExternalId,
    body: T,
    #[serde(default)]
    projection: Option<T::Projection>,
    #[serde(default)]
    sync: SyncState,
    fingerprint: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<T: Resource> Record<T> {
    /// An unsynced record, not yet persisted.
    pub(crate) fn new(
        external_id: ExternalId,
        body: T,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let fingerprint = fingerprint(&body)?;
        Ok(Self {
            local_id: LocalId::new(),
            external_id,
            body,
            projection: None,
            sync: SyncState::default(),
            fingerprint,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn external_id(&self) -> &ExternalId {
        &self.external_id
    }

    pub fn family(&self) -> ResourceFamily {
        T::FAMILY
    }

    pub fn body(&self) -> &T {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut T {
        &mut self.body
    }

    pub fn projection(&self) -> Option<&T::Projection> {
        self.projection.as_ref()
    }

    pub fn sync(&self) -> &SyncState {
        &self.sync
    }

    pub fn provider_id(&self) -> Option<&ProviderId> {
        self.sync.provider_id()
    }

    pub fn is_synced(&self) -> bool {
        self.sync.is_synced()
    }

    /// Provider id of a record whose last provider call succeeded.
    pub fn synced_provider_id(&self) -> Option<&ProviderId> {
        self.sync.provider_id().filter(|_| self.sync.is_synced())
    }

    /// Digest of the body this record was created from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn mark_synced(&mut self, provider_id: ProviderId, now: DateTime<Utc>) {
        self.sync.mark_synced(provider_id, now);
        self.updated_at = now;
    }

    pub(crate) fn projection_mut(&mut self) -> &mut T::Projection {
        self.projection.get_or_insert_with(Default::default)
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.sync.mark_failed(error);
        self.updated_at = now;
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// SHA-256 over the canonical JSON encoding of `value`, hex encoded.
pub fn fingerprint<V: Serialize + ?Sized>(value: &V) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct NoteProjection {
        revision: u32,
    }

    impl Resource for Note {
        const FAMILY: ResourceFamily = ResourceFamily::Worker;
        type Projection = NoteProjection;
    }

    fn note(text: &str) -> Record<Note> {
        Record::new(
            ExternalId::parse("note-1").unwrap(),
            Note { text: text.into() },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn fingerprint_follows_content() {
        assert_eq!(note("a").fingerprint(), note("a").fingerprint());
        assert_ne!(note("a").fingerprint(), note("b").fingerprint());
    }

    #[test]
    fn sync_success_clears_error() {
        let mut record = note("a");
        record.mark_failed("boom", Utc::now());
        assert!(!record.is_synced());
        assert_eq!(record.sync().last_error(), Some("boom"));
        assert!(record.synced_provider_id().is_none());

        record.mark_synced(ProviderId::new("77"), Utc::now());
        record.projection_mut().revision = 3;
        assert!(record.is_synced());
        assert_eq!(record.sync().last_error(), None);
        assert_eq!(record.synced_provider_id().map(ProviderId::as_str), Some("77"));
        assert_eq!(record.projection().map(|p| p.revision), Some(3));
    }

    #[test]
    fn records_survive_storage_encoding() {
        let record = note("stored");
        let json = serde_json::to_value(&record).unwrap();
        let back: Record<Note> = serde_json::from_value(json).unwrap();
        assert_eq!(back.local_id(), record.local_id());
        assert_eq!(back.fingerprint(), record.fingerprint());
        assert_eq!(back.body().text, "stored");
    }
}
