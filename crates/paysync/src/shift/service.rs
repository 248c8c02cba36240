use super::{Correction, CorrectionTimeframe, Shift, ShiftAction, ShiftDetails, ShiftFields, ShiftLifecycle};
use crate::error::{Result, SyncError};
use crate::gateway::DeleteOptions;
use crate::ids::{KeySource, LocalId, ResourceFamily};
use crate::lifecycle::Machine;
use crate::sync::{Synchronizer, Synchronizers};
use crate::work_location::WorkLocationService;
use crate::worker::WorkerService;
use chrono::Utc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct NewShift {
    pub key: KeySource,
    pub worker_id: LocalId,
    pub work_location_id: Option<LocalId>,
    pub details: ShiftDetails,
}

/// A correction of a shift whose pay period is finalized.
#[derive(Debug, Clone)]
pub struct NewCorrection {
    /// Key of the correction itself, independent of the original's key.
    pub key: KeySource,
    pub original_shift_id: LocalId,
    pub details: ShiftDetails,
    /// Must be set explicitly; corrections are refused without it.
    pub correction_authorized: bool,
    pub notes: String,
    pub timeframe: CorrectionTimeframe,
}

#[derive(Clone)]
pub struct ShiftService {
    all: Synchronizers,
}

impl ShiftService {
    pub fn new(all: &Synchronizers) -> Self {
        Self { all: all.clone() }
    }

    fn sync(&self) -> &Synchronizer<ShiftFields> {
        &self.all.shifts
    }

    /// Record a shift and report it to the provider. A successful sync moves
    /// the shift from draft to submitted.
    pub async fn create(&self, new: NewShift) -> Result<Shift> {
        new.details.validate()?;
        let worker = WorkerService::new(&self.all)
            .billable_ref(new.worker_id)
            .await?;
        let work_location = match new.work_location_id {
            Some(id) => Some(WorkLocationService::new(&self.all).require_synced(id).await?),
            None => None,
        };
        let body = ShiftFields {
            worker,
            work_location,
            details: new.details,
            correction: None,
            lifecycle: ShiftLifecycle::default(),
        };
        self.sync()
            .create_and_sync(new.key.resolve(ResourceFamily::Shift), body)
            .await
    }

    /// File a correction against a finalized shift as a new shift record.
    pub async fn create_correction(&self, new: NewCorrection) -> Result<Shift> {
        if !new.correction_authorized {
            return Err(SyncError::validation(
                "correction_authorized",
                "corrections require explicit authorization",
            ));
        }
        if new.notes.trim().is_empty() {
            return Err(SyncError::validation("notes", "corrections must explain the change"));
        }
        new.details.validate()?;

        let original = self.sync().get(new.original_shift_id).await?;
        if !original.body().lifecycle.is_pay_period_finalized() {
            return Err(SyncError::validation(
                "original_shift_id",
                format!(
                    "shift {} is not in a finalized pay period, edit it directly",
                    new.original_shift_id
                ),
            ));
        }

        let body = ShiftFields {
            worker: original.body().worker.clone(),
            work_location: original.body().work_location.clone(),
            details: new.details,
            correction: Some(Correction {
                original_shift_id: original.local_id(),
                original_provider_id: original.provider_id().cloned(),
                correction_authorized: new.correction_authorized,
                notes: new.notes,
                timeframe: new.timeframe,
            }),
            lifecycle: ShiftLifecycle::default(),
        };
        let key = new.key.resolve(ResourceFamily::Shift);
        info!(
            original = %original.local_id(),
            correction_key = %key,
            "Filing shift correction"
        );
        self.sync().create_and_sync(key, body).await
    }

    pub async fn get(&self, id: LocalId) -> Result<Shift> {
        self.sync().get(id).await
    }

    /// Replace the editable details while the pay period is open.
    pub async fn edit(&self, id: LocalId, details: ShiftDetails) -> Result<Shift> {
        details.validate()?;
        let (_guard, mut record) = self.sync().locked(id).await?;
        self.check(&record, &ShiftAction::Edit)?;
        record.body_mut().details = details;
        self.sync().push_update(record).await
    }

    pub async fn approve(&self, id: LocalId, approved_by: impl Into<String>) -> Result<Shift> {
        self.transition(id, ShiftAction::Approve { by: approved_by.into() })
            .await
    }

    pub async fn reject(
        &self,
        id: LocalId,
        rejected_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<Shift> {
        self.transition(
            id,
            ShiftAction::Reject {
                by: rejected_by.into(),
                reason: reason.into(),
            },
        )
        .await
    }

    pub async fn mark_processed(&self, id: LocalId) -> Result<Shift> {
        self.transition(id, ShiftAction::Process).await
    }

    /// Freeze the shift; later changes must be corrections.
    pub async fn finalize_pay_period(&self, id: LocalId) -> Result<Shift> {
        self.transition(id, ShiftAction::FinalizePayPeriod).await
    }

    pub async fn delete(&self, id: LocalId) -> Result<()> {
        let (_guard, record) = self.sync().locked(id).await?;
        self.check(&record, &ShiftAction::Delete)?;
        self.sync()
            .delete_remote(&record, DeleteOptions::default())
            .await?;
        self.sync().delete_local(id).await?;
        info!(local_id = %id, "Deleted shift");
        Ok(())
    }

    fn check(&self, record: &Shift, action: &ShiftAction) -> Result<()> {
        record
            .body()
            .lifecycle
            .decide(action)
            .map(|_| ())
            .map_err(|err| SyncError::transition(ResourceFamily::Shift, record.external_id(), err))
    }

    async fn transition(&self, id: LocalId, action: ShiftAction) -> Result<Shift> {
        let (_guard, mut record) = self.sync().locked(id).await?;
        let external_id = record.external_id().clone();
        let before = record.body().status();
        record
            .body_mut()
            .lifecycle
            .apply(action, Utc::now())
            .map_err(|err| SyncError::transition(ResourceFamily::Shift, &external_id, err))?;
        info!(
            local_id = %id,
            from = before.as_str(),
            to = record.body().status().as_str(),
            finalized = record.body().lifecycle.is_pay_period_finalized(),
            "Shift transitioned"
        );
        self.sync().save(record).await
    }
}
