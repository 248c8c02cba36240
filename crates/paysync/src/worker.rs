//! Workers: employees and contractors paid through the provider.
//!
//! ```text
//!                 onboarding-completed
//! PendingOnboarding ───────────────▶ Active ◀──────▶ Inactive
//!        │                              │                │
//!        └──────────────┬───────────────┴────────────────┘
//!                       ▼
//!                  Terminated (terminal)
//! ```
//!
//! A worker becomes active only when the provider's onboarding-completed event
//! arrives. Provider reads refresh the projection but never activate.

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::gateway::{DeleteOptions, ProviderGateway};
use crate::ids::{ExternalId, KeySource, LocalId, ProviderId, ResourceFamily};
use crate::lifecycle::{Machine, TransitionError};
use crate::record::{Record, Resource};
use crate::store::RecordStore;
use crate::sync::{SyncFamily, Synchronizer, Synchronizers};
use crate::work_location::{provider_external_id, LocationRef};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerClassification {
    Employee,
    Contractor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    PendingOnboarding,
    Active,
    Inactive,
    Terminated,
}

impl WorkerStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingOnboarding => "pending_onboarding",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    NotStarted,
    InProgress,
    Completed,
    /// The provider locked the worker out of onboarding.
    Failed,
}

/// Result of the provider's taxpayer id check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TinVerification {
    #[serde(rename = "VERIFICATION_SUCCESS")]
    Verified,
    #[serde(rename = "VERIFICATION_FAILED")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub hire_date: NaiveDate,
}

impl WorkerProfile {
    fn validate(&self) -> Result<()> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(SyncError::validation("name", "first and last name are required"));
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((user, domain)) if !user.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(SyncError::validation(
                "email",
                format!("{email:?} is not an email address"),
            )),
        }
    }
}

/// A worker as referenced from shifts and payables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRef {
    pub local_id: LocalId,
    pub external_id: ExternalId,
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Debug, Clone)]
pub enum WorkerAction {
    StartOnboarding,
    CompleteOnboarding,
    LockOnboarding,
    Deactivate,
    Reactivate,
    Terminate {
        date: NaiveDate,
        reason: Option<String>,
    },
    Edit,
    Delete,
}

impl WorkerAction {
    const fn name(&self) -> &'static str {
        match self {
            Self::StartOnboarding => "start onboarding",
            Self::CompleteOnboarding => "complete onboarding",
            Self::LockOnboarding => "lock onboarding",
            Self::Deactivate => "deactivate",
            Self::Reactivate => "reactivate",
            Self::Terminate { .. } => "terminate",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLifecycle {
    status: WorkerStatus,
    onboarding: OnboardingStatus,
    onboarding_completed_at: Option<DateTime<Utc>>,
    deactivated_at: Option<DateTime<Utc>>,
    termination_date: Option<NaiveDate>,
    termination_reason: Option<String>,
}

impl Default for WorkerLifecycle {
    fn default() -> Self {
        Self {
            status: WorkerStatus::PendingOnboarding,
            onboarding: OnboardingStatus::NotStarted,
            onboarding_completed_at: None,
            deactivated_at: None,
            termination_date: None,
            termination_reason: None,
        }
    }
}

impl WorkerLifecycle {
    pub fn onboarding(&self) -> OnboardingStatus {
        self.onboarding
    }

    pub fn onboarding_completed_at(&self) -> Option<DateTime<Utc>> {
        self.onboarding_completed_at
    }

    pub fn deactivated_at(&self) -> Option<DateTime<Utc>> {
        self.deactivated_at
    }

    pub fn termination_date(&self) -> Option<NaiveDate> {
        self.termination_date
    }

    pub fn termination_reason(&self) -> Option<&str> {
        self.termination_reason.as_deref()
    }

    fn refuse(&self, action: &WorkerAction, reason: &'static str) -> TransitionError {
        TransitionError::new(self.status.as_str(), action.name(), reason)
    }

    pub(crate) fn apply(
        &mut self,
        action: WorkerAction,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), TransitionError> {
        let next = self.decide(&action)?;
        match action {
            WorkerAction::StartOnboarding => {
                if self.onboarding == OnboardingStatus::NotStarted {
                    self.onboarding = OnboardingStatus::InProgress;
                }
            }
            WorkerAction::CompleteOnboarding => {
                self.onboarding = OnboardingStatus::Completed;
                self.onboarding_completed_at.get_or_insert(now);
            }
            WorkerAction::LockOnboarding => self.onboarding = OnboardingStatus::Failed,
            WorkerAction::Deactivate => self.deactivated_at = Some(now),
            WorkerAction::Reactivate => self.deactivated_at = None,
            WorkerAction::Terminate { date, reason } => {
                self.termination_date = Some(date);
                self.termination_reason = reason;
            }
            WorkerAction::Edit | WorkerAction::Delete => {}
        }
        self.status = next;
        Ok(())
    }
}

impl Machine for WorkerLifecycle {
    type Status = WorkerStatus;
    type Action = WorkerAction;

    fn status(&self) -> WorkerStatus {
        self.status
    }

    fn decide(&self, action: &WorkerAction) -> std::result::Result<WorkerStatus, TransitionError> {
        use WorkerStatus::*;

        if self.status == Terminated {
            return Err(self.refuse(action, "terminated workers are immutable"));
        }
        match (action, self.status) {
            (WorkerAction::StartOnboarding, status) => Ok(status),
            (WorkerAction::CompleteOnboarding, PendingOnboarding | Active) => Ok(Active),
            (WorkerAction::CompleteOnboarding, _) => {
                Err(self.refuse(action, "only pending workers complete onboarding"))
            }
            (WorkerAction::LockOnboarding, status) => {
                if self.onboarding == OnboardingStatus::Completed {
                    Err(self.refuse(action, "onboarding already completed"))
                } else {
                    Ok(status)
                }
            }
            (WorkerAction::Deactivate, Active | PendingOnboarding) => Ok(Inactive),
            (WorkerAction::Deactivate, _) => Err(self.refuse(action, "worker is not active")),
            (WorkerAction::Reactivate, Inactive) => {
                if self.onboarding == OnboardingStatus::Completed {
                    Ok(Active)
                } else {
                    Ok(PendingOnboarding)
                }
            }
            (WorkerAction::Reactivate, _) => Err(self.refuse(action, "worker is not inactive")),
            (WorkerAction::Terminate { .. }, _) => Ok(Terminated),
            (WorkerAction::Edit, status) => Ok(status),
            (WorkerAction::Delete, PendingOnboarding) => Ok(PendingOnboarding),
            (WorkerAction::Delete, _) => {
                Err(self.refuse(action, "only workers pending onboarding can be deleted"))
            }
        }
    }

    fn is_terminal(&self) -> bool {
        self.status == WorkerStatus::Terminated
    }
}

// ============================================================================
// Body and projection
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFields {
    classification: WorkerClassification,
    profile: WorkerProfile,
    /// Legal work location; `None` uses the worker's home address.
    work_location: Option<LocationRef>,
    #[serde(default)]
    lifecycle: WorkerLifecycle,
}

impl WorkerFields {
    pub fn classification(&self) -> WorkerClassification {
        self.classification
    }

    pub fn profile(&self) -> &WorkerProfile {
        &self.profile
    }

    pub fn work_location(&self) -> Option<&LocationRef> {
        self.work_location.as_ref()
    }

    pub fn lifecycle(&self) -> &WorkerLifecycle {
        &self.lifecycle
    }

    pub fn status(&self) -> WorkerStatus {
        self.lifecycle.status
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProjection {
    pub onboarding_status: Option<String>,
    pub lifecycle_status: Option<String>,
    pub onboarding_locked_at: Option<String>,
    pub tin_verification: Option<TinVerification>,
    pub direct_deposit: Option<bool>,
    pub pay_card: Option<bool>,
    pub tax_forms_available: bool,
    pub last_payment_id: Option<i64>,
    pub returned_payment_ids: Vec<i64>,
}

impl Resource for WorkerFields {
    const FAMILY: ResourceFamily = ResourceFamily::Worker;
    type Projection = WorkerProjection;
}

pub type Worker = Record<WorkerFields>;

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalWorkAddress {
    pub use_home_address: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_location_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkerRequest {
    /// Selects the onboarding endpoint; not part of the body.
    #[serde(skip)]
    pub classification: WorkerClassification,
    pub external_worker_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub hire_date: NaiveDate,
    pub legal_work_address: LegalWorkAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateWorkerRequest {
    pub termination_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
}

/// Worker updates go to different provider endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum UpdateWorkerRequest {
    Profile(WorkerProfileUpdate),
    Terminate(TerminateWorkerRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub worker_id: String,
    #[serde(default)]
    pub external_worker_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
    /// `CONTRACTOR` or `EMPLOYEE`.
    #[serde(default)]
    pub employment_type: Option<String>,
    /// `NOT_STARTED`, `IN_PROGRESS` or `COMPLETE`.
    #[serde(default)]
    pub onboarding_status: Option<String>,
    /// `ONBOARDING`, `ACTIVE` or `TERMINATED`.
    #[serde(default)]
    pub lifecycle_status: Option<String>,
    #[serde(default)]
    pub onboarding_complete: bool,
}

#[async_trait]
impl SyncFamily for WorkerFields {
    type CreateRequest = CreateWorkerRequest;
    type UpdateRequest = UpdateWorkerRequest;
    type Response = WorkerResponse;

    fn store(ctx: &SyncContext) -> &Arc<dyn RecordStore<Self>> {
        &ctx.stores.workers
    }

    fn gateway(ctx: &SyncContext) -> &Arc<dyn ProviderGateway<Self>> {
        &ctx.gateways.workers
    }

    fn synchronizer(all: &Synchronizers) -> &Synchronizer<Self> {
        &all.workers
    }

    fn create_request(record: &Record<Self>) -> CreateWorkerRequest {
        let body = record.body();
        CreateWorkerRequest {
            classification: body.classification,
            external_worker_id: record.external_id().to_string(),
            first_name: body.profile.first_name.clone(),
            last_name: body.profile.last_name.clone(),
            email: body.profile.email.clone(),
            phone_number: body.profile.phone_number.clone(),
            hire_date: body.profile.hire_date,
            legal_work_address: LegalWorkAddress {
                use_home_address: body.work_location.is_none(),
                work_location_id: body
                    .work_location
                    .as_ref()
                    .map(|location| location.provider_id.to_string()),
            },
        }
    }

    fn update_request(record: &Record<Self>) -> Option<UpdateWorkerRequest> {
        let body = record.body();
        let request = match body.lifecycle.termination_date {
            Some(termination_date) => UpdateWorkerRequest::Terminate(TerminateWorkerRequest {
                termination_date,
                termination_reason: body.lifecycle.termination_reason.clone(),
            }),
            None => UpdateWorkerRequest::Profile(WorkerProfileUpdate {
                first_name: body.profile.first_name.clone(),
                last_name: body.profile.last_name.clone(),
                email: body.profile.email.clone(),
                phone_number: body.profile.phone_number.clone(),
            }),
        };
        Some(request)
    }

    fn provider_id(response: &WorkerResponse) -> ProviderId {
        ProviderId::new(response.worker_id.clone())
    }

    fn merge_projection(projection: &mut WorkerProjection, response: &WorkerResponse) {
        if response.onboarding_status.is_some() {
            projection.onboarding_status = response.onboarding_status.clone();
        }
        if response.lifecycle_status.is_some() {
            projection.lifecycle_status = response.lifecycle_status.clone();
        }
    }

    fn observe(record: &mut Record<Self>, response: &WorkerResponse, now: DateTime<Utc>) {
        let mut actions = Vec::new();
        // Completion is applied only from the onboarding event.
        if response.onboarding_status.as_deref() == Some("IN_PROGRESS") {
            actions.push(WorkerAction::StartOnboarding);
        }
        if response.lifecycle_status.as_deref() == Some("TERMINATED")
            && !record.body().lifecycle.is_terminal()
        {
            actions.push(WorkerAction::Terminate {
                date: now.date_naive(),
                reason: None,
            });
        }

        let external_id = record.external_id().clone();
        let lifecycle = &mut record.body_mut().lifecycle;
        for action in actions {
            let before = lifecycle.status;
            if let Err(err) = lifecycle.apply(action, now) {
                warn!(
                    external_id = %external_id,
                    error = %err,
                    "Provider worker state does not fit local lifecycle, keeping local status"
                );
            } else if before != lifecycle.status {
                info!(
                    external_id = %external_id,
                    from = before.as_str(),
                    to = lifecycle.status.as_str(),
                    "Worker status changed from provider state"
                );
            }
        }
    }

    async fn materialize(_ctx: &SyncContext, response: &WorkerResponse) -> Result<(ExternalId, Self)> {
        let (Some(first_name), Some(last_name), Some(email)) = (
            response.first_name.clone(),
            response.last_name.clone(),
            response.email.clone(),
        ) else {
            return Err(SyncError::validation(
                "worker",
                format!("provider worker {} has no profile", response.worker_id),
            ));
        };
        let classification = match response.employment_type.as_deref() {
            Some("EMPLOYEE") => WorkerClassification::Employee,
            _ => WorkerClassification::Contractor,
        };
        let external_id = provider_external_id(
            ResourceFamily::Worker,
            response.external_worker_id.as_deref(),
            &response.worker_id,
        );
        let body = WorkerFields {
            classification,
            profile: WorkerProfile {
                first_name,
                last_name,
                email,
                phone_number: response.phone_number.clone(),
                hire_date: response.hire_date.unwrap_or_else(|| Utc::now().date_naive()),
            },
            work_location: None,
            lifecycle: WorkerLifecycle::default(),
        };
        Ok((external_id, body))
    }
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewWorker {
    pub key: KeySource,
    pub classification: WorkerClassification,
    pub profile: WorkerProfile,
    pub work_location_id: Option<LocalId>,
}

#[derive(Clone)]
pub struct WorkerService {
    all: Synchronizers,
}

impl WorkerService {
    pub fn new(all: &Synchronizers) -> Self {
        Self { all: all.clone() }
    }

    fn sync(&self) -> &Synchronizer<WorkerFields> {
        &self.all.workers
    }

    /// Register a worker and start provider onboarding.
    pub async fn create(&self, new: NewWorker) -> Result<Worker> {
        new.profile.validate()?;
        let work_location = match new.work_location_id {
            Some(id) => Some(
                crate::work_location::WorkLocationService::new(&self.all)
                    .require_synced(id)
                    .await?,
            ),
            None => None,
        };
        let body = WorkerFields {
            classification: new.classification,
            profile: new.profile,
            work_location,
            lifecycle: WorkerLifecycle::default(),
        };
        self.sync()
            .create_and_sync(new.key.resolve(ResourceFamily::Worker), body)
            .await
    }

    pub async fn get(&self, id: LocalId) -> Result<Worker> {
        self.sync().get(id).await
    }

    pub async fn find_by_external_id(&self, external_id: &ExternalId) -> Result<Option<Worker>> {
        self.sync().find_by_external_id(external_id).await
    }

    pub async fn update_profile(&self, id: LocalId, profile: WorkerProfile) -> Result<Worker> {
        profile.validate()?;
        let (_guard, mut record) = self.sync().locked(id).await?;
        guard(&record, &WorkerAction::Edit)?;
        record.body_mut().profile = profile;
        self.sync().push_update(record).await
    }

    pub async fn deactivate(&self, id: LocalId) -> Result<Worker> {
        self.transition(id, WorkerAction::Deactivate).await
    }

    pub async fn reactivate(&self, id: LocalId) -> Result<Worker> {
        self.transition(id, WorkerAction::Reactivate).await
    }

    /// Terminate at the provider and locally. Terminal.
    ///
    /// The termination is kept locally even if the provider push fails, so it
    /// cannot be repeated; `Engine::resync` re-sends it.
    pub async fn terminate(
        &self,
        id: LocalId,
        date: NaiveDate,
        reason: Option<String>,
    ) -> Result<Worker> {
        let (_guard, mut record) = self.sync().locked(id).await?;
        let external_id = record.external_id().clone();
        record
            .body_mut()
            .lifecycle
            .apply(WorkerAction::Terminate { date, reason }, Utc::now())
            .map_err(|err| SyncError::transition(ResourceFamily::Worker, &external_id, err))?;
        info!(local_id = %id, %date, "Terminating worker");
        self.sync().push_update(record).await
    }

    /// Remove a worker that never finished onboarding.
    pub async fn delete(&self, id: LocalId) -> Result<()> {
        let (_guard, record) = self.sync().locked(id).await?;
        guard(&record, &WorkerAction::Delete)?;
        self.sync()
            .delete_remote(&record, DeleteOptions::default())
            .await?;
        self.sync().delete_local(id).await?;
        info!(local_id = %id, "Deleted worker");
        Ok(())
    }

    /// Shift and payable reference to an onboarded, non-terminated worker.
    pub async fn billable_ref(&self, id: LocalId) -> Result<WorkerRef> {
        let record = self.sync().get(id).await?;
        match record.body().status() {
            WorkerStatus::Active => Ok(WorkerRef {
                local_id: id,
                external_id: record.external_id().clone(),
            }),
            status => Err(SyncError::validation(
                "worker_id",
                format!("worker {id} is {}, not active", status.as_str()),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Provider-driven changes
    // ------------------------------------------------------------------------

    /// Find a worker by the provider's id, falling back to the external id.
    pub async fn resolve_provider_worker(
        &self,
        worker_id: &str,
        external_worker_id: Option<&str>,
    ) -> Result<Worker> {
        if let Some(record) = self
            .sync()
            .find_by_provider_id(&ProviderId::new(worker_id))
            .await?
        {
            return Ok(record);
        }
        if let Some(key) = external_worker_id.and_then(|key| ExternalId::parse(key).ok()) {
            if let Some(record) = self.sync().find_by_external_id(&key).await? {
                return Ok(record);
            }
        }
        Err(SyncError::not_found(ResourceFamily::Worker, worker_id))
    }

    /// Apply a provider-reported lifecycle action. Replays of an already
    /// applied action are no-ops.
    pub(crate) async fn apply_provider_action(
        &self,
        id: LocalId,
        action: WorkerAction,
    ) -> Result<Worker> {
        self.transition(id, action).await
    }

    /// Update projection-only facts reported by the provider.
    pub(crate) async fn update_projection(
        &self,
        id: LocalId,
        update: impl FnOnce(&mut WorkerProjection),
    ) -> Result<Worker> {
        let (_guard, mut record) = self.sync().locked(id).await?;
        update(record.projection_mut());
        self.sync().save(record).await
    }

    async fn transition(&self, id: LocalId, action: WorkerAction) -> Result<Worker> {
        let (_guard, mut record) = self.sync().locked(id).await?;
        let external_id = record.external_id().clone();
        let before = record.body().status();
        record
            .body_mut()
            .lifecycle
            .apply(action, Utc::now())
            .map_err(|err| SyncError::transition(ResourceFamily::Worker, &external_id, err))?;
        let after = record.body().status();
        if before != after {
            info!(
                local_id = %id,
                from = before.as_str(),
                to = after.as_str(),
                "Worker status changed"
            );
        }
        self.sync().save(record).await
    }
}

fn guard(record: &Worker, action: &WorkerAction) -> Result<()> {
    record
        .body()
        .lifecycle
        .decide(action)
        .map(|_| ())
        .map_err(|err| SyncError::transition(ResourceFamily::Worker, record.external_id(), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> WorkerLifecycle {
        WorkerLifecycle::default()
    }

    #[test]
    fn onboarding_completion_activates() {
        let mut worker = lifecycle();
        worker.apply(WorkerAction::StartOnboarding, Utc::now()).unwrap();
        assert_eq!(worker.onboarding(), OnboardingStatus::InProgress);
        worker.apply(WorkerAction::CompleteOnboarding, Utc::now()).unwrap();
        assert_eq!(worker.status(), WorkerStatus::Active);
        assert!(worker.onboarding_completed_at().is_some());
    }

    #[test]
    fn reactivation_returns_to_pending_without_onboarding() {
        let mut worker = lifecycle();
        worker.apply(WorkerAction::Deactivate, Utc::now()).unwrap();
        assert_eq!(worker.status(), WorkerStatus::Inactive);
        worker.apply(WorkerAction::Reactivate, Utc::now()).unwrap();
        assert_eq!(worker.status(), WorkerStatus::PendingOnboarding);
    }

    #[test]
    fn terminated_workers_refuse_everything() {
        let mut worker = lifecycle();
        worker
            .apply(
                WorkerAction::Terminate {
                    date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
                    reason: Some("contract ended".into()),
                },
                Utc::now(),
            )
            .unwrap();
        assert!(worker.is_terminal());
        for action in [
            WorkerAction::Edit,
            WorkerAction::Reactivate,
            WorkerAction::CompleteOnboarding,
            WorkerAction::Delete,
        ] {
            assert!(worker.decide(&action).is_err(), "{action:?} should be refused");
        }
    }

    #[test]
    fn only_pending_workers_can_be_deleted() {
        let mut worker = lifecycle();
        assert!(worker.decide(&WorkerAction::Delete).is_ok());
        worker.apply(WorkerAction::CompleteOnboarding, Utc::now()).unwrap();
        let err = worker.decide(&WorkerAction::Delete).unwrap_err();
        assert_eq!(err.from, "active");
    }

    #[test]
    fn profile_validation() {
        let mut profile = WorkerProfile {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone_number: None,
            hire_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        };
        assert!(profile.validate().is_ok());
        profile.email = "ada".into();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn update_request_switches_to_termination() {
        let json = serde_json::to_value(UpdateWorkerRequest::Terminate(TerminateWorkerRequest {
            termination_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            termination_reason: None,
        }))
        .unwrap();
        assert_eq!(json, serde_json::json!({"terminationDate": "2024-06-30"}));
    }
}
