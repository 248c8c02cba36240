//! Scripted in-memory payroll provider.
//!
//! Behaves like the provider closely enough to drive the engine end to end,
//! and lets a test script failures per family and operation:
//!
//! - [`FakeProvider::fail_next`] rejects the next call without applying it
//! - [`FakeProvider::accept_then_fail_next`] applies the next call, then
//!   reports a failure, the way a timeout after a committed write looks
//!
//! Creates are not deduplicated by external id, so
//! [`FakeProvider::resource_count`] exposes any duplicate the engine lets
//! through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paysync_core::payable::{
    CreatePayableRequest, PayableFields, PayableResponse, ProviderPaymentStatus,
    UpdatePayableRequest,
};
use paysync_core::shift::{
    CreateShiftRequest, PayableDetails, PunchTime, ShiftFields, ShiftResponse, UpdateShiftRequest,
};
use paysync_core::work_location::{
    CreateWorkLocationRequest, WorkLocationFields, WorkLocationResponse,
};
use paysync_core::worker::{
    CreateWorkerRequest, UpdateWorkerRequest, WorkerClassification, WorkerFields, WorkerResponse,
};
use paysync_core::{
    DeleteOptions, ExternalId, Money, PayoutGateway, PayoutRequest, PayoutResponse,
    ProviderError, ProviderGateway, ProviderId, ResourceFamily,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Get,
    Lookup,
    Update,
    Delete,
    Payout,
}

#[derive(Debug, Clone)]
enum Script {
    Fail(ProviderError),
    AcceptThenFail(ProviderError),
}

#[derive(Debug, Clone)]
struct Stored {
    provider_id: String,
    external_id: Option<String>,
    value: Value,
}

#[derive(Default)]
struct State {
    next_id: i64,
    resources: HashMap<ResourceFamily, Vec<Stored>>,
    scripts: HashMap<(ResourceFamily, Operation), VecDeque<Script>>,
    calls: HashMap<(ResourceFamily, Operation), usize>,
    payouts: Vec<PayoutRequest>,
    deletes: Vec<(ResourceFamily, String, DeleteOptions)>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        1000 + self.next_id
    }

    fn family(&mut self, family: ResourceFamily) -> &mut Vec<Stored> {
        self.resources.entry(family).or_default()
    }

    fn insert<R: Serialize>(
        &mut self,
        family: ResourceFamily,
        provider_id: String,
        external_id: Option<String>,
        response: &R,
    ) -> Result<(), ProviderError> {
        let value = encode(response)?;
        self.family(family).push(Stored {
            provider_id,
            external_id,
            value,
        });
        Ok(())
    }

    fn get<R: DeserializeOwned>(
        &mut self,
        family: ResourceFamily,
        provider_id: &str,
    ) -> Result<R, ProviderError> {
        let stored = self
            .family(family)
            .iter()
            .find(|stored| stored.provider_id == provider_id)
            .ok_or_else(|| not_found(family, provider_id))?;
        decode(&stored.value)
    }

    fn lookup<R: DeserializeOwned>(
        &mut self,
        family: ResourceFamily,
        external_id: &str,
    ) -> Result<Option<R>, ProviderError> {
        self.family(family)
            .iter()
            .find(|stored| stored.external_id.as_deref() == Some(external_id))
            .map(|stored| decode(&stored.value))
            .transpose()
    }

    fn modify<R: Serialize + DeserializeOwned>(
        &mut self,
        family: ResourceFamily,
        provider_id: &str,
        change: impl FnOnce(&mut R),
    ) -> Result<R, ProviderError> {
        let stored = self
            .family(family)
            .iter_mut()
            .find(|stored| stored.provider_id == provider_id)
            .ok_or_else(|| not_found(family, provider_id))?;
        let mut response: R = decode(&stored.value)?;
        change(&mut response);
        stored.value = encode(&response)?;
        Ok(response)
    }

    fn remove(&mut self, family: ResourceFamily, provider_id: &str) -> Result<(), ProviderError> {
        let resources = self.family(family);
        let before = resources.len();
        resources.retain(|stored| stored.provider_id != provider_id);
        if resources.len() == before {
            return Err(not_found(family, provider_id));
        }
        Ok(())
    }
}

fn encode<R: Serialize>(response: &R) -> Result<Value, ProviderError> {
    serde_json::to_value(response).map_err(|err| ProviderError::Decode(err.to_string()))
}

fn decode<R: DeserializeOwned>(value: &Value) -> Result<R, ProviderError> {
    serde_json::from_value(value.clone()).map_err(|err| ProviderError::Decode(err.to_string()))
}

fn not_found(family: ResourceFamily, provider_id: &str) -> ProviderError {
    ProviderError::status(
        404,
        Some("NOT_FOUND".to_string()),
        format!("{family} {provider_id} not found"),
    )
}

fn bad_request(message: impl Into<String>) -> ProviderError {
    ProviderError::status(400, Some("INVALID_REQUEST".to_string()), message)
}

fn punch(epoch_seconds: i64) -> Result<PunchTime, ProviderError> {
    DateTime::<Utc>::from_timestamp(epoch_seconds, 0)
        .map(|effective_punch_at| PunchTime { effective_punch_at })
        .ok_or_else(|| bad_request(format!("invalid epoch {epoch_seconds}")))
}

/// A timeout error as the engine would see it.
pub fn timeout() -> ProviderError {
    ProviderError::Timeout(Duration::from_secs(30))
}

/// A 5xx the engine should treat as transient.
pub fn unavailable() -> ProviderError {
    ProviderError::status(503, None, "service unavailable")
}

#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, widening race windows in concurrency tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail_next(&self, family: ResourceFamily, operation: Operation, error: ProviderError) {
        self.script(family, operation, Script::Fail(error));
    }

    pub fn accept_then_fail_next(
        &self,
        family: ResourceFamily,
        operation: Operation,
        error: ProviderError,
    ) {
        self.script(family, operation, Script::AcceptThenFail(error));
    }

    fn script(&self, family: ResourceFamily, operation: Operation, script: Script) {
        self.lock()
            .scripts
            .entry((family, operation))
            .or_default()
            .push_back(script);
    }

    pub fn calls(&self, family: ResourceFamily, operation: Operation) -> usize {
        self.lock()
            .calls
            .get(&(family, operation))
            .copied()
            .unwrap_or(0)
    }

    /// Provider resources created under `external_id`.
    pub fn resource_count(&self, family: ResourceFamily, external_id: &str) -> usize {
        self.lock()
            .family(family)
            .iter()
            .filter(|stored| stored.external_id.as_deref() == Some(external_id))
            .count()
    }

    pub fn total(&self, family: ResourceFamily) -> usize {
        self.lock().family(family).len()
    }

    pub fn payouts(&self) -> Vec<PayoutRequest> {
        self.lock().payouts.clone()
    }

    pub fn deletes(&self) -> Vec<(ResourceFamily, String, DeleteOptions)> {
        self.lock().deletes.clone()
    }

    /// Drop a resource behind the engine's back.
    pub fn remove_remote(&self, family: ResourceFamily, provider_id: &str) -> bool {
        self.lock().remove(family, provider_id).is_ok()
    }

    pub fn worker(&self, worker_id: &str) -> Option<WorkerResponse> {
        self.lock().get(ResourceFamily::Worker, worker_id).ok()
    }

    pub fn shift(&self, worked_shift_id: &str) -> Option<ShiftResponse> {
        self.lock().get(ResourceFamily::Shift, worked_shift_id).ok()
    }

    pub fn payable(&self, external_id: &str) -> Option<PayableResponse> {
        self.lock().get(ResourceFamily::Payable, external_id).ok()
    }

    /// A worker that exists only at the provider, e.g. onboarded through
    /// the provider's own UI.
    pub fn seed_worker(&self, external_worker_id: Option<&str>, email: &str) -> WorkerResponse {
        let mut state = self.lock();
        let worker_id = state.next_id().to_string();
        let response = WorkerResponse {
            worker_id: worker_id.clone(),
            external_worker_id: external_worker_id.map(str::to_string),
            first_name: Some("Remote".to_string()),
            last_name: Some("Worker".to_string()),
            email: Some(email.to_string()),
            phone_number: None,
            hire_date: Some(Utc::now().date_naive()),
            employment_type: Some("CONTRACTOR".to_string()),
            onboarding_status: Some("COMPLETE".to_string()),
            lifecycle_status: Some("ACTIVE".to_string()),
            onboarding_complete: true,
        };
        if let Ok(value) = encode(&response) {
            state.family(ResourceFamily::Worker).push(Stored {
                provider_id: worker_id,
                external_id: external_worker_id.map(str::to_string),
                value,
            });
        }
        response
    }

    pub fn complete_onboarding(&self, worker_id: &str) -> bool {
        self.lock()
            .modify(ResourceFamily::Worker, worker_id, |worker: &mut WorkerResponse| {
                worker.onboarding_status = Some("COMPLETE".to_string());
                worker.lifecycle_status = Some("ACTIVE".to_string());
                worker.onboarding_complete = true;
            })
            .is_ok()
    }

    pub fn verify_shift(&self, worked_shift_id: &str) -> bool {
        self.lock()
            .modify(ResourceFamily::Shift, worked_shift_id, |shift: &mut ShiftResponse| {
                shift.verified_at = Some(Utc::now().to_rfc3339());
            })
            .is_ok()
    }

    pub fn mark_shift_paid(&self, worked_shift_id: &str, total: Money) -> bool {
        self.lock()
            .modify(ResourceFamily::Shift, worked_shift_id, |shift: &mut ShiftResponse| {
                shift.payable_details = Some(PayableDetails {
                    total_payable_amount: total,
                    paid: true,
                });
            })
            .is_ok()
    }

    pub fn set_payable_status(
        &self,
        external_id: &str,
        status: ProviderPaymentStatus,
        payment_id: Option<i64>,
    ) -> bool {
        self.lock()
            .modify(ResourceFamily::Payable, external_id, |payable: &mut PayableResponse| {
                payable.payment_status = Some(status);
                payable.payment_id = payment_id.or(payable.payment_id);
            })
            .is_ok()
    }

    /// Run one provider operation under the failure script.
    async fn run<R>(
        &self,
        family: ResourceFamily,
        operation: Operation,
        apply: impl FnOnce(&mut State) -> Result<R, ProviderError>,
    ) -> Result<R, ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        *state.calls.entry((family, operation)).or_default() += 1;
        let script = state
            .scripts
            .get_mut(&(family, operation))
            .and_then(VecDeque::pop_front);
        match script {
            Some(Script::Fail(error)) => Err(error),
            Some(Script::AcceptThenFail(error)) => {
                apply(&mut *state)?;
                Err(error)
            }
            None => apply(&mut *state),
        }
    }
}

// ============================================================================
// Workers
// ============================================================================

#[async_trait]
impl ProviderGateway<WorkerFields> for FakeProvider {
    async fn create(&self, request: &CreateWorkerRequest) -> Result<WorkerResponse, ProviderError> {
        self.run(ResourceFamily::Worker, Operation::Create, |state| {
            let worker_id = state.next_id().to_string();
            let employment_type = match request.classification {
                WorkerClassification::Employee => "EMPLOYEE",
                WorkerClassification::Contractor => "CONTRACTOR",
            };
            let response = WorkerResponse {
                worker_id: worker_id.clone(),
                external_worker_id: Some(request.external_worker_id.clone()),
                first_name: Some(request.first_name.clone()),
                last_name: Some(request.last_name.clone()),
                email: Some(request.email.clone()),
                phone_number: request.phone_number.clone(),
                hire_date: Some(request.hire_date),
                employment_type: Some(employment_type.to_string()),
                onboarding_status: Some("IN_PROGRESS".to_string()),
                lifecycle_status: Some("ONBOARDING".to_string()),
                onboarding_complete: false,
            };
            state.insert(
                ResourceFamily::Worker,
                worker_id,
                Some(request.external_worker_id.clone()),
                &response,
            )?;
            Ok(response)
        })
        .await
    }

    async fn get(&self, provider_id: &ProviderId) -> Result<WorkerResponse, ProviderError> {
        self.run(ResourceFamily::Worker, Operation::Get, |state| {
            state.get(ResourceFamily::Worker, provider_id.as_str())
        })
        .await
    }

    async fn get_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<WorkerResponse>, ProviderError> {
        self.run(ResourceFamily::Worker, Operation::Lookup, |state| {
            state.lookup(ResourceFamily::Worker, external_id.as_str())
        })
        .await
    }

    async fn update(
        &self,
        provider_id: &ProviderId,
        request: &UpdateWorkerRequest,
    ) -> Result<WorkerResponse, ProviderError> {
        self.run(ResourceFamily::Worker, Operation::Update, |state| {
            state.modify(
                ResourceFamily::Worker,
                provider_id.as_str(),
                |worker: &mut WorkerResponse| match request {
                    UpdateWorkerRequest::Profile(profile) => {
                        worker.first_name = Some(profile.first_name.clone());
                        worker.last_name = Some(profile.last_name.clone());
                        worker.email = Some(profile.email.clone());
                        worker.phone_number = profile.phone_number.clone();
                    }
                    UpdateWorkerRequest::Terminate(_) => {
                        worker.lifecycle_status = Some("TERMINATED".to_string());
                    }
                },
            )
        })
        .await
    }

    async fn delete(
        &self,
        provider_id: &ProviderId,
        options: DeleteOptions,
    ) -> Result<(), ProviderError> {
        self.run(ResourceFamily::Worker, Operation::Delete, |state| {
            state.remove(ResourceFamily::Worker, provider_id.as_str())?;
            state
                .deletes
                .push((ResourceFamily::Worker, provider_id.to_string(), options));
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Work locations
// ============================================================================

#[async_trait]
impl ProviderGateway<WorkLocationFields> for FakeProvider {
    async fn create(
        &self,
        request: &CreateWorkLocationRequest,
    ) -> Result<WorkLocationResponse, ProviderError> {
        self.run(ResourceFamily::WorkLocation, Operation::Create, |state| {
            let id = state.next_id();
            let response = WorkLocationResponse {
                id,
                external_id: Some(request.external_id.clone()),
                name: Some(request.name.clone()),
                line1: request.line1.clone(),
                line2: request.line2.clone(),
                city: request.city.clone(),
                state: request.state.clone(),
                postal_code: request.postal_code.clone(),
                latitude: Some(37.7749),
                longitude: Some(-122.4194),
                time_zone: Some("America/Los_Angeles".to_string()),
                effective_date: Some(request.effective_date),
            };
            state.insert(
                ResourceFamily::WorkLocation,
                id.to_string(),
                Some(request.external_id.clone()),
                &response,
            )?;
            Ok(response)
        })
        .await
    }

    async fn get(&self, provider_id: &ProviderId) -> Result<WorkLocationResponse, ProviderError> {
        self.run(ResourceFamily::WorkLocation, Operation::Get, |state| {
            state.get(ResourceFamily::WorkLocation, provider_id.as_str())
        })
        .await
    }

    async fn get_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<WorkLocationResponse>, ProviderError> {
        self.run(ResourceFamily::WorkLocation, Operation::Lookup, |state| {
            state.lookup(ResourceFamily::WorkLocation, external_id.as_str())
        })
        .await
    }

    async fn update(
        &self,
        provider_id: &ProviderId,
        _request: &(),
    ) -> Result<WorkLocationResponse, ProviderError> {
        self.run(ResourceFamily::WorkLocation, Operation::Update, |state| {
            state.get(ResourceFamily::WorkLocation, provider_id.as_str())
        })
        .await
    }

    async fn delete(
        &self,
        provider_id: &ProviderId,
        options: DeleteOptions,
    ) -> Result<(), ProviderError> {
        self.run(ResourceFamily::WorkLocation, Operation::Delete, |state| {
            state.remove(ResourceFamily::WorkLocation, provider_id.as_str())?;
            state
                .deletes
                .push((ResourceFamily::WorkLocation, provider_id.to_string(), options));
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Shifts
// ============================================================================

#[async_trait]
impl ProviderGateway<ShiftFields> for FakeProvider {
    async fn create(&self, request: &CreateShiftRequest) -> Result<ShiftResponse, ProviderError> {
        self.run(ResourceFamily::Shift, Operation::Create, |state| {
            let worker_id = state
                .family(ResourceFamily::Worker)
                .iter()
                .find(|stored| stored.external_id.as_deref() == Some(request.external_worker_id.as_str()))
                .map(|stored| stored.provider_id.clone())
                .ok_or_else(|| {
                    bad_request(format!("unknown worker {}", request.external_worker_id))
                })?;
            let worked_shift_id = state.next_id();
            let response = ShiftResponse {
                worked_shift_id,
                worker_id,
                external_id: Some(request.external_id.clone()),
                shift_start_at: Some(punch(request.shift_start_epoch_seconds)?),
                shift_end_at: Some(punch(request.shift_end_epoch_seconds)?),
                legal_work_time_zone: Some("America/Los_Angeles".to_string()),
                verified_at: None,
                effective_pay_rate: request.effective_hourly_pay_rate,
                pay_rate_overridden: request.effective_hourly_pay_rate.is_some(),
                payable_details: None,
                shift_durations: None,
            };
            state.insert(
                ResourceFamily::Shift,
                worked_shift_id.to_string(),
                Some(request.external_id.clone()),
                &response,
            )?;
            Ok(response)
        })
        .await
    }

    async fn get(&self, provider_id: &ProviderId) -> Result<ShiftResponse, ProviderError> {
        self.run(ResourceFamily::Shift, Operation::Get, |state| {
            state.get(ResourceFamily::Shift, provider_id.as_str())
        })
        .await
    }

    async fn get_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<ShiftResponse>, ProviderError> {
        self.run(ResourceFamily::Shift, Operation::Lookup, |state| {
            state.lookup(ResourceFamily::Shift, external_id.as_str())
        })
        .await
    }

    async fn update(
        &self,
        provider_id: &ProviderId,
        request: &UpdateShiftRequest,
    ) -> Result<ShiftResponse, ProviderError> {
        self.run(ResourceFamily::Shift, Operation::Update, |state| {
            let start = punch(request.shift_start_epoch_seconds)?;
            let end = punch(request.shift_end_epoch_seconds)?;
            state.modify(
                ResourceFamily::Shift,
                provider_id.as_str(),
                |shift: &mut ShiftResponse| {
                    shift.shift_start_at = Some(start);
                    shift.shift_end_at = Some(end);
                    shift.effective_pay_rate = request.effective_hourly_pay_rate;
                    shift.pay_rate_overridden = request.effective_hourly_pay_rate.is_some();
                },
            )
        })
        .await
    }

    async fn delete(
        &self,
        provider_id: &ProviderId,
        options: DeleteOptions,
    ) -> Result<(), ProviderError> {
        self.run(ResourceFamily::Shift, Operation::Delete, |state| {
            state.remove(ResourceFamily::Shift, provider_id.as_str())?;
            state
                .deletes
                .push((ResourceFamily::Shift, provider_id.to_string(), options));
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Payables
// ============================================================================

fn payment_status(verified: bool) -> ProviderPaymentStatus {
    if verified {
        ProviderPaymentStatus::Approved
    } else {
        ProviderPaymentStatus::PendingApproval
    }
}

#[async_trait]
impl ProviderGateway<PayableFields> for FakeProvider {
    async fn create(&self, request: &CreatePayableRequest) -> Result<PayableResponse, ProviderError> {
        self.run(ResourceFamily::Payable, Operation::Create, |state| {
            let response = PayableResponse {
                external_id: request.external_id.clone(),
                company_id: Some(1),
                external_worker_id: request.external_worker_id.clone(),
                label: Some(request.label.clone()),
                verified: request.verified,
                earning_amount: request.earning_amount,
                earning_type: request.earning_type,
                earning_timestamp: request.earning_timestamp,
                payment_id: None,
                payment_status: Some(payment_status(request.verified)),
                payable_payment_request_id: None,
            };
            state.insert(
                ResourceFamily::Payable,
                request.external_id.clone(),
                Some(request.external_id.clone()),
                &response,
            )?;
            Ok(response)
        })
        .await
    }

    async fn get(&self, provider_id: &ProviderId) -> Result<PayableResponse, ProviderError> {
        self.run(ResourceFamily::Payable, Operation::Get, |state| {
            state.get(ResourceFamily::Payable, provider_id.as_str())
        })
        .await
    }

    async fn get_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<PayableResponse>, ProviderError> {
        self.run(ResourceFamily::Payable, Operation::Lookup, |state| {
            state.lookup(ResourceFamily::Payable, external_id.as_str())
        })
        .await
    }

    async fn update(
        &self,
        provider_id: &ProviderId,
        request: &UpdatePayableRequest,
    ) -> Result<PayableResponse, ProviderError> {
        self.run(ResourceFamily::Payable, Operation::Update, |state| {
            state.modify(
                ResourceFamily::Payable,
                provider_id.as_str(),
                |payable: &mut PayableResponse| {
                    payable.label = Some(request.label.clone());
                    payable.verified = request.verified;
                    payable.earning_amount = request.earning_amount;
                    payable.earning_type = request.earning_type;
                    payable.earning_timestamp = request.earning_timestamp;
                    if payable.payment_status != Some(ProviderPaymentStatus::Paid) {
                        payable.payment_status = Some(payment_status(request.verified));
                    }
                },
            )
        })
        .await
    }

    async fn delete(
        &self,
        provider_id: &ProviderId,
        options: DeleteOptions,
    ) -> Result<(), ProviderError> {
        self.run(ResourceFamily::Payable, Operation::Delete, |state| {
            state.remove(ResourceFamily::Payable, provider_id.as_str())?;
            state
                .deletes
                .push((ResourceFamily::Payable, provider_id.to_string(), options));
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl PayoutGateway for FakeProvider {
    async fn process_payables(
        &self,
        request: &PayoutRequest,
    ) -> Result<PayoutResponse, ProviderError> {
        self.run(ResourceFamily::Payable, Operation::Payout, |state| {
            let request_id = state.next_id();
            state.payouts.push(request.clone());
            let mut paid_out = Vec::new();
            for stored in state.family(ResourceFamily::Payable).iter_mut() {
                let mut payable: PayableResponse = decode(&stored.value)?;
                let eligible = request
                    .external_worker_ids
                    .contains(&payable.external_worker_id)
                    && payable.payment_status == Some(ProviderPaymentStatus::Approved);
                if !eligible {
                    continue;
                }
                payable.payable_payment_request_id = Some(request_id);
                stored.value = encode(&payable)?;
                paid_out.push(payable.external_id);
            }
            Ok(PayoutResponse {
                payable_payment_request_id: Some(request_id),
                payable_external_ids: paid_out,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_then_fail_applies_the_write() {
        let provider = FakeProvider::new();
        provider.accept_then_fail_next(ResourceFamily::Worker, Operation::Delete, timeout());
        let seeded = provider.seed_worker(Some("wrk_1"), "remote@example.com");
        let provider_id = ProviderId::new(seeded.worker_id.clone());

        let err = ProviderGateway::<WorkerFields>::delete(&provider, &provider_id, DeleteOptions::default())
            .await
            .unwrap_err();
        assert!(err.outcome_unknown());
        assert!(provider.worker(&seeded.worker_id).is_none());
        assert_eq!(provider.calls(ResourceFamily::Worker, Operation::Delete), 1);
    }

    #[tokio::test]
    async fn fail_next_leaves_state_untouched() {
        let provider = FakeProvider::new();
        let seeded = provider.seed_worker(None, "remote@example.com");
        provider.fail_next(ResourceFamily::Worker, Operation::Get, unavailable());
        let provider_id = ProviderId::new(seeded.worker_id.clone());

        let first = ProviderGateway::<WorkerFields>::get(&provider, &provider_id).await;
        assert_eq!(first.unwrap_err().status_code(), Some(503));
        let second = ProviderGateway::<WorkerFields>::get(&provider, &provider_id)
            .await
            .unwrap();
        assert_eq!(second.worker_id, seeded.worker_id);
    }
}
