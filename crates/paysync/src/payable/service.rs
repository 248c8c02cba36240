use super::{EarningType, Payable, PayableAction, PayableFields, PayableLifecycle, PayableStatus};
use crate::error::{Result, SyncError};
use crate::gateway::{DeleteOptions, PayoutRequest};
use crate::ids::{ExternalId, KeySource, LocalId, ResourceFamily};
use crate::lifecycle::Machine;
use crate::money::Money;
use crate::sync::{Synchronizer, Synchronizers};
use crate::work_location::WorkLocationService;
use crate::worker::WorkerService;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct NewPayable {
    pub key: KeySource,
    pub worker_id: LocalId,
    pub amount: Money,
    pub earning_type: EarningType,
    pub description: String,
    pub notes: Option<String>,
    pub earned_at: Option<DateTime<Utc>>,
    pub work_location_id: Option<LocalId>,
}

/// Editable payable fields.
#[derive(Debug, Clone)]
pub struct PayableUpdate {
    pub amount: Money,
    pub earning_type: EarningType,
    pub description: String,
    pub notes: Option<String>,
}

/// Provider-reported result of paying out a payable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PayoutOutcome {
    pub payment_request_id: Option<i64>,
    pub payables: Vec<Payable>,
}

fn validate(amount: &Money, description: &str) -> Result<()> {
    if !amount.is_positive() {
        return Err(SyncError::validation("amount", "must be positive"));
    }
    if !amount.fits_minor_units() {
        return Err(SyncError::validation(
            "amount",
            format!("{amount} is finer than the smallest {} unit", amount.currency()),
        ));
    }
    if description.trim().is_empty() {
        return Err(SyncError::validation("description", "required"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PayableService {
    all: Synchronizers,
}

impl PayableService {
    pub fn new(all: &Synchronizers) -> Self {
        Self { all: all.clone() }
    }

    fn sync(&self) -> &Synchronizer<PayableFields> {
        &self.all.payables
    }

    pub async fn create(&self, new: NewPayable) -> Result<Payable> {
        validate(&new.amount, &new.description)?;
        let worker = WorkerService::new(&self.all)
            .billable_ref(new.worker_id)
            .await?;
        let work_location = match new.work_location_id {
            Some(id) => Some(WorkLocationService::new(&self.all).require_synced(id).await?),
            None => None,
        };
        let body = PayableFields {
            worker,
            amount: new.amount,
            kind: new.earning_type.kind(),
            earning_type: new.earning_type,
            description: new.description,
            notes: new.notes,
            earned_at: new.earned_at,
            work_location,
            lifecycle: PayableLifecycle::default(),
        };
        self.sync()
            .create_and_sync(new.key.resolve(ResourceFamily::Payable), body)
            .await
    }

    pub async fn get(&self, id: LocalId) -> Result<Payable> {
        self.sync().get(id).await
    }

    pub async fn find_by_external_id(&self, external_id: &ExternalId) -> Result<Option<Payable>> {
        self.sync().find_by_external_id(external_id).await
    }

    pub async fn edit(&self, id: LocalId, update: PayableUpdate) -> Result<Payable> {
        validate(&update.amount, &update.description)?;
        let (_guard, mut record) = self.sync().locked(id).await?;
        check(&record, &PayableAction::Edit)?;
        let body = record.body_mut();
        body.amount = update.amount;
        body.kind = update.earning_type.kind();
        body.earning_type = update.earning_type;
        body.description = update.description;
        body.notes = update.notes;
        self.sync().push_update(record).await
    }

    /// Approve locally and mark the payable verified at the provider.
    ///
    /// A failed push keeps the approval and leaves the record unsynced. A
    /// second `approve` is then an illegal transition; `Engine::resync`
    /// pushes the approved payable again.
    pub async fn approve(&self, id: LocalId, approved_by: impl Into<String>) -> Result<Payable> {
        let (_guard, record) = self
            .transition(id, PayableAction::Approve { by: approved_by.into() })
            .await?;
        self.sync().push_update(record).await
    }

    /// Reject locally and push the payable. Recovery from a failed push is
    /// the same as for [`approve`](Self::approve).
    pub async fn reject(
        &self,
        id: LocalId,
        rejected_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<Payable> {
        let (_guard, record) = self
            .transition(
                id,
                PayableAction::Reject {
                    by: rejected_by.into(),
                    reason: reason.into(),
                },
            )
            .await?;
        self.sync().push_update(record).await
    }

    pub async fn delete(&self, id: LocalId) -> Result<()> {
        let (_guard, record) = self.sync().locked(id).await?;
        check(&record, &PayableAction::Delete)?;
        self.sync()
            .delete_remote(&record, DeleteOptions::default())
            .await?;
        self.sync().delete_local(id).await?;
        info!(local_id = %id, "Deleted payable");
        Ok(())
    }

    /// Ask the provider to pay out approved payables now.
    ///
    /// Every payable must be approved and synced; nothing is sent otherwise.
    /// Repeated ids count once. The payables stay locked, in `LocalId` order,
    /// from the check until their new status is saved, so a payable can be
    /// part of at most one payout request.
    pub async fn submit_for_payout(&self, ids: &[LocalId]) -> Result<PayoutOutcome> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Err(SyncError::validation("payable_ids", "at least one payable is required"));
        }

        let mut held = Vec::with_capacity(ids.len());
        for id in &ids {
            held.push(self.sync().locked(*id).await?);
        }

        let mut workers = Vec::new();
        for (_, record) in &held {
            check(record, &PayableAction::SubmitForPayout)?;
            if !record.is_synced() {
                return Err(SyncError::validation(
                    "payable_ids",
                    format!("payable {} is not synced with the provider", record.local_id()),
                ));
            }
            let worker = record.body().worker.external_id.to_string();
            if !workers.contains(&worker) {
                workers.push(worker);
            }
        }

        let key = held[0].1.external_id().clone();
        let request = PayoutRequest {
            external_worker_ids: workers,
            include_workers_on_regular_pay_cycle: false,
        };
        let payouts = &self.sync().context().gateways.payouts;
        let response = self
            .sync()
            .call("payout", &key, payouts.process_payables(&request))
            .await?;
        info!(
            payables = held.len(),
            workers = request.external_worker_ids.len(),
            payment_request_id = ?response.payable_payment_request_id,
            "Payout requested"
        );

        let mut payables = Vec::with_capacity(held.len());
        for (_guard, mut record) in held {
            advance(&mut record, PayableAction::SubmitForPayout)?;
            record.projection_mut().payable_payment_request_id = response.payable_payment_request_id;
            payables.push(self.sync().save(record).await?);
        }
        Ok(PayoutOutcome {
            payment_request_id: response.payable_payment_request_id,
            payables,
        })
    }

    /// Send a failed payable back for payout once the retry policy allows.
    pub async fn resubmit(&self, id: LocalId) -> Result<Payable> {
        let (_guard, mut record) = self.sync().locked(id).await?;
        check(&record, &PayableAction::Resubmit)?;
        let policy = &self.sync().context().settings.payout_retry;
        let now = Utc::now();
        match record.body().lifecycle.next_retry_at(policy) {
            None => {
                return Err(SyncError::validation(
                    "payable_id",
                    format!(
                        "payable {id} failed {} times, retry ceiling reached",
                        record.body().lifecycle.retry_count()
                    ),
                ))
            }
            Some(at) if at > now => {
                return Err(SyncError::validation(
                    "payable_id",
                    format!("payable {id} may not be resubmitted before {at}"),
                ))
            }
            Some(_) => {}
        }

        let request = PayoutRequest {
            external_worker_ids: vec![record.body().worker.external_id.to_string()],
            include_workers_on_regular_pay_cycle: false,
        };
        let key = record.external_id().clone();
        let payouts = &self.sync().context().gateways.payouts;
        let response = self
            .sync()
            .call("payout", &key, payouts.process_payables(&request))
            .await?;

        record
            .body_mut()
            .lifecycle
            .apply(PayableAction::Resubmit, now)
            .map_err(|err| SyncError::transition(ResourceFamily::Payable, &key, err))?;
        record.projection_mut().payable_payment_request_id = response.payable_payment_request_id;
        info!(
            local_id = %id,
            retry_count = record.body().lifecycle.retry_count(),
            "Resubmitted payable for payout"
        );
        self.sync().save(record).await
    }

    /// Apply a payout result reported by the provider. Replays are no-ops.
    pub(crate) async fn record_payment_outcome(
        &self,
        external_id: &ExternalId,
        outcome: PaymentOutcome,
    ) -> Result<Payable> {
        let found = self
            .sync()
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| SyncError::not_found(ResourceFamily::Payable, external_id))?;
        let (_guard, mut record) = self.sync().locked(found.local_id()).await?;
        let before = record.body().status();
        let now = Utc::now();

        let settled = match &outcome {
            PaymentOutcome::Paid => record.body_mut().lifecycle.settle_paid(now),
            PaymentOutcome::Failed(message) => {
                if before == PayableStatus::Paid {
                    warn!(
                        external_id = %external_id,
                        error = %message,
                        "Payment error reported for a paid payable, ignoring"
                    );
                    return Ok(record);
                }
                record.projection_mut().last_payment_error = Some(message.clone());
                record.body_mut().lifecycle.settle_failed(message.clone(), now)
            }
        };
        let changed =
            settled.map_err(|err| SyncError::transition(ResourceFamily::Payable, external_id, err))?;
        if !changed {
            return Ok(record);
        }
        info!(
            external_id = %external_id,
            from = before.as_str(),
            to = record.body().status().as_str(),
            "Payable payment outcome recorded"
        );
        self.sync().save(record).await
    }

    /// Apply `action` under the record's lock and persist nothing; the caller
    /// decides whether to push or save.
    async fn transition(
        &self,
        id: LocalId,
        action: PayableAction,
    ) -> Result<(crate::sync::KeyGuard<'_>, Payable)> {
        let (guard, mut record) = self.sync().locked(id).await?;
        advance(&mut record, action)?;
        Ok((guard, record))
    }
}

fn advance(record: &mut Payable, action: PayableAction) -> Result<()> {
    let external_id = record.external_id().clone();
    let before = record.body().status();
    record
        .body_mut()
        .lifecycle
        .apply(action, Utc::now())
        .map_err(|err| SyncError::transition(ResourceFamily::Payable, &external_id, err))?;
    info!(
        local_id = %record.local_id(),
        from = before.as_str(),
        to = record.body().status().as_str(),
        "Payable transitioned"
    );
    Ok(())
}

fn check(record: &Payable, action: &PayableAction) -> Result<()> {
    record
        .body()
        .lifecycle
        .decide(action)
        .map(|_| ())
        .map_err(|err| SyncError::transition(ResourceFamily::Payable, record.external_id(), err))
}
