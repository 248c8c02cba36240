//! Work locations: the addresses shifts and payables are taxed against.
//!
//! Locations are created once and archived instead of edited; the provider
//! exposes no update for them.

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::gateway::{DeleteOptions, ProviderGateway};
use crate::ids::{ExternalId, KeySource, LocalId, ProviderId, ResourceFamily};
use crate::record::{Record, Resource};
use crate::store::RecordStore;
use crate::sync::{SyncFamily, Synchronizer, Synchronizers};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    /// Two-letter state code.
    pub state: String,
    pub postal_code: String,
}

impl Address {
    fn validate(&self) -> Result<()> {
        if self.line1.trim().is_empty() || self.city.trim().is_empty() {
            return Err(SyncError::validation("address", "line1 and city are required"));
        }
        if self.state.len() != 2 || !self.state.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(SyncError::validation(
                "address.state",
                format!("expected a two-letter state code, got {:?}", self.state),
            ));
        }
        if self.postal_code.trim().is_empty() {
            return Err(SyncError::validation("address.postal_code", "required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkLocationFields {
    name: String,
    address: Address,
    effective_date: NaiveDate,
    phone_number: Option<String>,
    #[serde(default)]
    archived: bool,
}

impl WorkLocationFields {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn effective_date(&self) -> NaiveDate {
        self.effective_date
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }
}

/// Geocoding the provider performs on create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkLocationProjection {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub time_zone: Option<String>,
}

impl Resource for WorkLocationFields {
    const FAMILY: ResourceFamily = ResourceFamily::WorkLocation;
    type Projection = WorkLocationProjection;
}

pub type WorkLocation = Record<WorkLocationFields>;

/// A synced location as referenced from workers, shifts and payables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRef {
    pub local_id: LocalId,
    pub provider_id: ProviderId,
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkLocationRequest {
    pub external_id: String,
    pub name: String,
    pub line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub effective_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkLocationResponse {
    pub id: i64,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
}

#[async_trait]
impl SyncFamily for WorkLocationFields {
    type CreateRequest = CreateWorkLocationRequest;
    type UpdateRequest = ();
    type Response = WorkLocationResponse;

    fn store(ctx: &SyncContext) -> &Arc<dyn RecordStore<Self>> {
        &ctx.stores.work_locations
    }

    fn gateway(ctx: &SyncContext) -> &Arc<dyn ProviderGateway<Self>> {
        &ctx.gateways.work_locations
    }

    fn synchronizer(all: &Synchronizers) -> &Synchronizer<Self> {
        &all.work_locations
    }

    fn create_request(record: &Record<Self>) -> CreateWorkLocationRequest {
        let body = record.body();
        CreateWorkLocationRequest {
            external_id: record.external_id().to_string(),
            name: body.name.clone(),
            line1: body.address.line1.clone(),
            line2: body.address.line2.clone(),
            city: body.address.city.clone(),
            state: body.address.state.clone(),
            postal_code: body.address.postal_code.clone(),
            phone_number: body.phone_number.clone(),
            effective_date: body.effective_date,
        }
    }

    fn update_request(_record: &Record<Self>) -> Option<()> {
        None
    }

    fn provider_id(response: &WorkLocationResponse) -> ProviderId {
        ProviderId::new(response.id.to_string())
    }

    fn merge_projection(projection: &mut WorkLocationProjection, response: &WorkLocationResponse) {
        projection.latitude = response.latitude;
        projection.longitude = response.longitude;
        projection.time_zone = response.time_zone.clone();
    }

    async fn materialize(
        _ctx: &SyncContext,
        response: &WorkLocationResponse,
    ) -> Result<(ExternalId, Self)> {
        let external_id = provider_external_id(
            ResourceFamily::WorkLocation,
            response.external_id.as_deref(),
            &response.id.to_string(),
        );
        let body = WorkLocationFields {
            name: response
                .name
                .clone()
                .unwrap_or_else(|| format!("{}, {}", response.line1, response.city)),
            address: Address {
                line1: response.line1.clone(),
                line2: response.line2.clone(),
                city: response.city.clone(),
                state: response.state.clone(),
                postal_code: response.postal_code.clone(),
            },
            effective_date: response
                .effective_date
                .unwrap_or_else(|| Utc::now().date_naive()),
            phone_number: None,
            archived: false,
        };
        Ok((external_id, body))
    }
}

/// The key a provider-only resource is adopted under: the key it carries,
/// or one derived from its provider id.
pub(crate) fn provider_external_id(
    family: ResourceFamily,
    carried: Option<&str>,
    provider_id: &str,
) -> ExternalId {
    carried
        .and_then(|key| ExternalId::parse(key).ok())
        .unwrap_or_else(|| ExternalId::from_natural_key(family, &format!("provider:{provider_id}")))
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewWorkLocation {
    pub key: KeySource,
    pub name: String,
    pub address: Address,
    pub effective_date: NaiveDate,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkLocationUpdate {
    pub name: String,
    pub phone_number: Option<String>,
}

#[derive(Clone)]
pub struct WorkLocationService {
    sync: Synchronizer<WorkLocationFields>,
}

impl WorkLocationService {
    pub fn new(all: &Synchronizers) -> Self {
        Self {
            sync: all.work_locations.clone(),
        }
    }

    pub async fn create(&self, new: NewWorkLocation) -> Result<WorkLocation> {
        if new.name.trim().is_empty() {
            return Err(SyncError::validation("name", "required"));
        }
        new.address.validate()?;
        let body = WorkLocationFields {
            name: new.name,
            address: new.address,
            effective_date: new.effective_date,
            phone_number: new.phone_number,
            archived: false,
        };
        self.sync
            .create_and_sync(new.key.resolve(ResourceFamily::WorkLocation), body)
            .await
    }

    pub async fn get(&self, id: LocalId) -> Result<WorkLocation> {
        self.sync.get(id).await
    }

    /// Rename or change the phone number. Kept locally only.
    pub async fn update(&self, id: LocalId, update: WorkLocationUpdate) -> Result<WorkLocation> {
        if update.name.trim().is_empty() {
            return Err(SyncError::validation("name", "required"));
        }
        let (_guard, mut record) = self.sync.locked(id).await?;
        if record.body().archived {
            return Err(SyncError::conflict(
                ResourceFamily::WorkLocation,
                record.external_id(),
                "archived work locations cannot be changed",
            ));
        }
        let body = record.body_mut();
        body.name = update.name;
        body.phone_number = update.phone_number;
        self.sync.save(record).await
    }

    /// Archive the location at the provider and locally. The record is kept
    /// so past shifts still resolve.
    pub async fn archive(&self, id: LocalId) -> Result<WorkLocation> {
        let (_guard, mut record) = self.sync.locked(id).await?;
        if record.body().archived {
            return Err(SyncError::conflict(
                ResourceFamily::WorkLocation,
                record.external_id(),
                "work location is already archived",
            ));
        }
        self.sync
            .delete_remote(&record, DeleteOptions::default())
            .await?;
        record.body_mut().archived = true;
        info!(local_id = %id, "Archived work location");
        self.sync.save(record).await
    }

    /// Reference to a location that is synced and still active.
    pub async fn require_synced(&self, id: LocalId) -> Result<LocationRef> {
        let record = self.sync.get(id).await?;
        if record.body().archived {
            return Err(SyncError::validation(
                "work_location_id",
                format!("work location {id} is archived"),
            ));
        }
        let provider_id = record.synced_provider_id().cloned().ok_or_else(|| {
            SyncError::validation(
                "work_location_id",
                format!("work location {id} is not synced with the provider"),
            )
        })?;
        Ok(LocationRef {
            local_id: id,
            provider_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            line1: "1 Market St".into(),
            line2: None,
            city: "San Francisco".into(),
            state: "CA".into(),
            postal_code: "94105".into(),
        }
    }

    #[test]
    fn address_requires_state_code() {
        assert!(address().validate().is_ok());
        let bad = Address {
            state: "California".into(),
            ..address()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn adopted_keys_prefer_the_carried_key() {
        let carried = provider_external_id(ResourceFamily::WorkLocation, Some("loc-7"), "7");
        assert_eq!(carried.as_str(), "loc-7");
        let derived = provider_external_id(ResourceFamily::WorkLocation, None, "7");
        assert_eq!(
            derived,
            provider_external_id(ResourceFamily::WorkLocation, Some("not valid"), "7")
        );
    }

    #[test]
    fn response_parses_provider_shape() {
        let response: WorkLocationResponse = serde_json::from_value(serde_json::json!({
            "id": 41,
            "line1": "1 Market St",
            "city": "San Francisco",
            "state": "CA",
            "postalCode": "94105",
            "latitude": 37.79,
            "longitude": -122.39,
            "timeZone": "America/Los_Angeles"
        }))
        .unwrap();
        assert_eq!(WorkLocationFields::provider_id(&response).as_str(), "41");
        let mut projection = WorkLocationProjection::default();
        WorkLocationFields::merge_projection(&mut projection, &response);
        assert_eq!(projection.time_zone.as_deref(), Some("America/Los_Angeles"));
    }
}
