//! Payables: pre-calculated payments (contractor pay, bonuses,
//! reimbursements) the provider pays out.

mod machine;
mod service;

pub use machine::{PayableAction, PayableLifecycle, PayableStatus};
pub use service::{NewPayable, PayableService, PayableUpdate, PaymentOutcome, PayoutOutcome};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::gateway::ProviderGateway;
use crate::ids::{ExternalId, ProviderId, ResourceFamily};
use crate::lifecycle::Machine;
use crate::money::Money;
use crate::record::{Record, Resource};
use crate::store::RecordStore;
use crate::sync::{SyncFamily, Synchronizer, Synchronizers};
use crate::work_location::{provider_external_id, LocationRef};
use crate::worker::WorkerRef;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayableKind {
    ContractorPayment,
    Bonus,
    Reimbursement,
    Commission,
    Other,
}

/// Provider earning classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EarningType {
    Contractor,
    Bonus,
    Commission,
    Reimbursement,
    Advance,
    Tips,
    PerDiem,
    #[serde(other)]
    Other,
}

impl EarningType {
    fn kind(self) -> PayableKind {
        match self {
            Self::Contractor => PayableKind::ContractorPayment,
            Self::Bonus => PayableKind::Bonus,
            Self::Commission => PayableKind::Commission,
            Self::Reimbursement => PayableKind::Reimbursement,
            _ => PayableKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayableFields {
    worker: WorkerRef,
    amount: Money,
    kind: PayableKind,
    earning_type: EarningType,
    description: String,
    notes: Option<String>,
    /// When the pay was earned; the creation time when not given.
    earned_at: Option<DateTime<Utc>>,
    work_location: Option<LocationRef>,
    #[serde(default)]
    lifecycle: PayableLifecycle,
}

impl PayableFields {
    pub fn worker(&self) -> &WorkerRef {
        &self.worker
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn kind(&self) -> PayableKind {
        self.kind
    }

    pub fn earning_type(&self) -> EarningType {
        self.earning_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn earned_at(&self) -> Option<DateTime<Utc>> {
        self.earned_at
    }

    pub fn work_location(&self) -> Option<&LocationRef> {
        self.work_location.as_ref()
    }

    pub fn lifecycle(&self) -> &PayableLifecycle {
        &self.lifecycle
    }

    pub fn status(&self) -> PayableStatus {
        self.lifecycle.status()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderPaymentStatus {
    PendingApproval,
    Approved,
    Paid,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayableProjection {
    pub company_id: Option<i64>,
    pub payment_id: Option<i64>,
    pub payment_status: Option<ProviderPaymentStatus>,
    pub payable_payment_request_id: Option<i64>,
    pub last_payment_error: Option<String>,
}

impl Resource for PayableFields {
    const FAMILY: ResourceFamily = ResourceFamily::Payable;
    type Projection = PayableProjection;
}

pub type Payable = Record<PayableFields>;

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayableModel {
    PreCalculated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayableRequest {
    pub external_id: String,
    pub external_worker_id: String,
    #[serde(rename = "type")]
    pub payable_type: PayableModel,
    pub label: String,
    pub verified: bool,
    pub earning_amount: Money,
    pub payable_model: PayableModel,
    pub earning_type: EarningType,
    pub earning_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_location_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayableRequest {
    pub external_worker_id: String,
    #[serde(rename = "type")]
    pub payable_type: PayableModel,
    pub label: String,
    pub verified: bool,
    pub earning_amount: Money,
    pub payable_model: PayableModel,
    pub earning_type: EarningType,
    pub earning_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_location_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayableResponse {
    pub external_id: String,
    #[serde(default)]
    pub company_id: Option<i64>,
    pub external_worker_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub verified: bool,
    pub earning_amount: Money,
    pub earning_type: EarningType,
    pub earning_timestamp: i64,
    #[serde(default)]
    pub payment_id: Option<i64>,
    #[serde(default)]
    pub payment_status: Option<ProviderPaymentStatus>,
    #[serde(default)]
    pub payable_payment_request_id: Option<i64>,
}

fn label(body: &PayableFields) -> String {
    match &body.notes {
        Some(notes) => format!("{} ({notes})", body.description),
        None => body.description.clone(),
    }
}

fn earning_timestamp(record: &Payable) -> i64 {
    record
        .body()
        .earned_at
        .unwrap_or_else(|| record.created_at())
        .timestamp()
}

/// Provider-side approval mirrors the local one.
fn verified(status: PayableStatus) -> bool {
    !matches!(
        status,
        PayableStatus::PendingApproval | PayableStatus::Rejected
    )
}

fn location_id(body: &PayableFields) -> Option<i64> {
    body.work_location
        .as_ref()
        .and_then(|location| location.provider_id.as_str().parse().ok())
}

#[async_trait]
impl SyncFamily for PayableFields {
    type CreateRequest = CreatePayableRequest;
    type UpdateRequest = UpdatePayableRequest;
    type Response = PayableResponse;

    fn store(ctx: &SyncContext) -> &Arc<dyn RecordStore<Self>> {
        &ctx.stores.payables
    }

    fn gateway(ctx: &SyncContext) -> &Arc<dyn ProviderGateway<Self>> {
        &ctx.gateways.payables
    }

    fn synchronizer(all: &Synchronizers) -> &Synchronizer<Self> {
        &all.payables
    }

    fn create_request(record: &Record<Self>) -> CreatePayableRequest {
        let body = record.body();
        CreatePayableRequest {
            external_id: record.external_id().to_string(),
            external_worker_id: body.worker.external_id.to_string(),
            payable_type: PayableModel::PreCalculated,
            label: label(body),
            verified: verified(body.status()),
            earning_amount: body.amount,
            payable_model: PayableModel::PreCalculated,
            earning_type: body.earning_type,
            earning_timestamp: earning_timestamp(record),
            work_location_id: location_id(body),
        }
    }

    fn update_request(record: &Record<Self>) -> Option<UpdatePayableRequest> {
        let body = record.body();
        Some(UpdatePayableRequest {
            external_worker_id: body.worker.external_id.to_string(),
            payable_type: PayableModel::PreCalculated,
            label: label(body),
            verified: verified(body.status()),
            earning_amount: body.amount,
            payable_model: PayableModel::PreCalculated,
            earning_type: body.earning_type,
            earning_timestamp: earning_timestamp(record),
            work_location_id: location_id(body),
        })
    }

    /// Payables are addressed by the key they were created with.
    fn provider_id(response: &PayableResponse) -> ProviderId {
        ProviderId::new(response.external_id.clone())
    }

    fn merge_projection(projection: &mut PayableProjection, response: &PayableResponse) {
        projection.company_id = response.company_id.or(projection.company_id);
        projection.payment_id = response.payment_id.or(projection.payment_id);
        projection.payment_status = response.payment_status.or(projection.payment_status);
        projection.payable_payment_request_id = response
            .payable_payment_request_id
            .or(projection.payable_payment_request_id);
    }

    fn observe(record: &mut Record<Self>, response: &PayableResponse, now: DateTime<Utc>) {
        let external_id = record.external_id().clone();
        let lifecycle = &mut record.body_mut().lifecycle;
        let before = lifecycle.status();
        let outcome = match response.payment_status {
            Some(ProviderPaymentStatus::Paid) => lifecycle.settle_paid(now),
            Some(ProviderPaymentStatus::Approved) if before == PayableStatus::PendingApproval => {
                lifecycle
                    .apply(PayableAction::Approve { by: "provider".to_string() }, now)
                    .map(|()| true)
            }
            Some(ProviderPaymentStatus::Cancelled) if before == PayableStatus::PendingApproval => {
                lifecycle
                    .apply(
                        PayableAction::Reject {
                            by: "provider".to_string(),
                            reason: "cancelled by provider".to_string(),
                        },
                        now,
                    )
                    .map(|()| true)
            }
            _ => Ok(false),
        };
        match outcome {
            Ok(true) => info!(
                external_id = %external_id,
                from = before.as_str(),
                to = lifecycle.status().as_str(),
                "Payable status advanced from provider state"
            ),
            Ok(false) => {}
            Err(err) => warn!(
                external_id = %external_id,
                error = %err,
                "Provider payment state does not fit local lifecycle, keeping local status"
            ),
        }
    }

    async fn materialize(
        ctx: &SyncContext,
        response: &PayableResponse,
    ) -> Result<(ExternalId, Self)> {
        let worker_key = ExternalId::parse(response.external_worker_id.clone()).map_err(|err| {
            SyncError::validation("external_worker_id", err.to_string())
        })?;
        let worker = ctx
            .stores
            .workers
            .find_by_external_id(&worker_key)
            .await?
            .ok_or_else(|| SyncError::not_found(ResourceFamily::Worker, &worker_key))?;
        let external_id =
            provider_external_id(ResourceFamily::Payable, Some(response.external_id.as_str()), &response.external_id);
        let body = PayableFields {
            worker: WorkerRef {
                local_id: worker.local_id(),
                external_id: worker_key,
            },
            amount: response.earning_amount,
            kind: response.earning_type.kind(),
            earning_type: response.earning_type,
            description: response
                .label
                .clone()
                .unwrap_or_else(|| format!("{:?} payable", response.earning_type)),
            notes: None,
            earned_at: Utc.timestamp_opt(response.earning_timestamp, 0).single(),
            work_location: None,
            lifecycle: PayableLifecycle::default(),
        };
        Ok((external_id, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::LocalId;
    use rust_decimal::Decimal;

    #[test]
    fn create_request_matches_provider_shape() {
        let body = PayableFields {
            worker: WorkerRef {
                local_id: LocalId::new(),
                external_id: ExternalId::parse("W1").unwrap(),
            },
            amount: Money::usd(Decimal::new(10000, 2)),
            kind: PayableKind::Bonus,
            earning_type: EarningType::Bonus,
            description: "May bonus".into(),
            notes: None,
            earned_at: Utc.timestamp_opt(1_714_953_600, 0).single(),
            work_location: None,
            lifecycle: PayableLifecycle::default(),
        };
        let record = Record::new(ExternalId::parse("pay-1").unwrap(), body, Utc::now()).unwrap();
        let json = serde_json::to_value(PayableFields::create_request(&record)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "externalId": "pay-1",
                "externalWorkerId": "W1",
                "type": "PRE_CALCULATED",
                "label": "May bonus",
                "verified": false,
                "earningAmount": {"amount": "100.00", "currency": "USD"},
                "payableModel": "PRE_CALCULATED",
                "earningType": "BONUS",
                "earningTimestamp": 1_714_953_600
            })
        );
    }

    #[test]
    fn unknown_provider_values_parse() {
        let response: PayableResponse = serde_json::from_value(serde_json::json!({
            "externalId": "pay-1",
            "externalWorkerId": "W1",
            "earningAmount": {"amount": "10", "currency": "USD"},
            "earningType": "SEVERANCE",
            "earningTimestamp": 0,
            "paymentStatus": "ON_HOLD"
        }))
        .unwrap();
        assert_eq!(response.earning_type, EarningType::Other);
        assert_eq!(response.payment_status, Some(ProviderPaymentStatus::Unknown));
        assert_eq!(PayableFields::provider_id(&response).as_str(), "pay-1");
    }

    #[test]
    fn projection_keeps_known_values_when_absent() {
        let mut projection = PayableProjection {
            payment_id: Some(88),
            ..PayableProjection::default()
        };
        let response: PayableResponse = serde_json::from_value(serde_json::json!({
            "externalId": "pay-1",
            "externalWorkerId": "W1",
            "earningAmount": {"amount": "10", "currency": "USD"},
            "earningType": "BONUS",
            "earningTimestamp": 0,
            "paymentStatus": "APPROVED"
        }))
        .unwrap();
        PayableFields::merge_projection(&mut projection, &response);
        assert_eq!(projection.payment_id, Some(88));
        assert_eq!(projection.payment_status, Some(ProviderPaymentStatus::Approved));
    }
}
