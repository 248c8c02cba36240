//! In-memory record and processed-event store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use paysync_core::{
    EventId, ExternalId, Inserted, LocalId, ProcessedEventStore, ProviderId, Record, RecordStore,
    Resource, ResourceFamily,
};
use serde_json::Value;

/// Every family in one set of maps, records kept as JSON the way a database
/// column would hold them.
///
/// The external-id index is claimed through a `DashMap` entry, which makes
/// `insert_if_absent` atomic per key.
#[derive(Default)]
pub struct InMemoryStore {
    records: DashMap<(ResourceFamily, LocalId), Value>,
    external_index: DashMap<(ResourceFamily, ExternalId), LocalId>,
    processed: DashMap<EventId, DateTime<Utc>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored for `family`.
    pub fn count(&self, family: ResourceFamily) -> usize {
        self.records.iter().filter(|entry| entry.key().0 == family).count()
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    fn load<T: Resource>(&self, local_id: LocalId) -> Result<Option<Record<T>>> {
        self.records
            .get(&(T::FAMILY, local_id))
            .map(|value| decode(value.value()))
            .transpose()
    }

    fn all<T: Resource>(&self) -> Result<Vec<Record<T>>> {
        self.records
            .iter()
            .filter(|entry| entry.key().0 == T::FAMILY)
            .map(|entry| decode(entry.value()))
            .collect()
    }
}

fn decode<T: Resource>(value: &Value) -> Result<Record<T>> {
    serde_json::from_value(value.clone()).with_context(|| format!("corrupt {} record", T::FAMILY))
}

#[async_trait]
impl<T: Resource> RecordStore<T> for InMemoryStore {
    async fn find(&self, local_id: LocalId) -> Result<Option<Record<T>>> {
        self.load(local_id)
    }

    async fn find_by_external_id(&self, external_id: &ExternalId) -> Result<Option<Record<T>>> {
        let local_id = self
            .external_index
            .get(&(T::FAMILY, external_id.clone()))
            .map(|entry| *entry.value());
        match local_id {
            Some(local_id) => self.load(local_id),
            None => Ok(None),
        }
    }

    async fn find_by_provider_id(&self, provider_id: &ProviderId) -> Result<Option<Record<T>>> {
        Ok(self
            .all::<T>()?
            .into_iter()
            .find(|record| record.provider_id() == Some(provider_id)))
    }

    async fn insert_if_absent(&self, record: Record<T>) -> Result<Inserted<T>> {
        let key = (T::FAMILY, record.external_id().clone());
        match self.external_index.entry(key) {
            Entry::Occupied(existing) => {
                let local_id = *existing.get();
                drop(existing);
                let found = self
                    .load(local_id)?
                    .context("external id index points at a missing record")?;
                Ok(Inserted::Existing(found))
            }
            Entry::Vacant(slot) => {
                self.records
                    .insert((T::FAMILY, record.local_id()), serde_json::to_value(&record)?);
                slot.insert(record.local_id());
                Ok(Inserted::Created(record))
            }
        }
    }

    async fn update(&self, record: &Record<T>) -> Result<()> {
        let key = (T::FAMILY, record.local_id());
        let value = serde_json::to_value(record)?;
        match self.records.get_mut(&key) {
            Some(mut slot) => {
                *slot = value;
                Ok(())
            }
            None => anyhow::bail!("{} {} does not exist", T::FAMILY, record.local_id()),
        }
    }

    async fn delete(&self, local_id: LocalId) -> Result<bool> {
        let Some(existing) = self.load::<T>(local_id)? else {
            return Ok(false);
        };
        self.external_index
            .remove(&(T::FAMILY, existing.external_id().clone()));
        Ok(self.records.remove(&(T::FAMILY, local_id)).is_some())
    }

    async fn list_unsynced(&self, limit: usize) -> Result<Vec<Record<T>>> {
        let mut unsynced: Vec<Record<T>> = self
            .all::<T>()?
            .into_iter()
            .filter(|record| !record.is_synced())
            .collect();
        unsynced.sort_by_key(|record| record.created_at());
        unsynced.truncate(limit);
        Ok(unsynced)
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryStore {
    async fn record_if_absent(&self, event_id: &EventId, processed_at: DateTime<Utc>) -> Result<bool> {
        match self.processed.entry(event_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(processed_at);
                Ok(true)
            }
        }
    }

    async fn contains(&self, event_id: &EventId) -> Result<bool> {
        Ok(self.processed.contains_key(event_id))
    }

    async fn release(&self, event_id: &EventId) -> Result<()> {
        self.processed.remove(event_id);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.processed.len();
        self.processed.retain(|_, processed_at| *processed_at >= cutoff);
        Ok((before - self.processed.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn processed_events_dedup_and_purge() {
        let store = InMemoryStore::new();
        let old = EventId::new("evt_old");
        let fresh = EventId::new("evt_fresh");
        let now = Utc::now();

        assert!(store.record_if_absent(&old, now - Duration::days(10)).await.unwrap());
        assert!(!store.record_if_absent(&old, now).await.unwrap());
        assert!(store.record_if_absent(&fresh, now).await.unwrap());

        let purged = store.purge_older_than(now - Duration::days(7)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(!store.contains(&old).await.unwrap());
        assert!(store.contains(&fresh).await.unwrap());
    }
}
