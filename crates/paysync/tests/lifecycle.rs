//! Shift and payable lifecycles: finalization, corrections and payouts.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use paysync_core::payable::{EarningType, NewPayable, PayableFields, PayableStatus, PayableUpdate};
use paysync_core::shift::{
    CorrectionTimeframe, NewCorrection, NewShift, ShiftDetails, ShiftFields, ShiftStatus,
    TimeWindow,
};
use paysync_core::webhook::{Dispatch, PayablesPaymentStatus};
use paysync_core::worker::{Worker, WorkerFields, WorkerStatus};
use paysync_core::{
    ErrorKind, KeySource, LocalId, Money, ReconcileOutcome, ResourceFamily, ResourceKey,
    RetryPolicy, SyncSettings,
};
use paysync_testing::{payables_status_changed, unavailable, FakeProvider, Harness, Operation};
use rust_decimal::Decimal;
use std::time::Duration as StdDuration;

fn details(start_hour: u32, end_hour: u32) -> ShiftDetails {
    let day = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
    ShiftDetails::new(
        TimeWindow::new(
            day + Duration::hours(start_hour.into()),
            day + Duration::hours(end_hour.into()),
        )
        .unwrap(),
    )
}

fn new_shift(key: &str, worker: &Worker) -> NewShift {
    NewShift {
        key: KeySource::natural(key),
        worker_id: worker.local_id(),
        work_location_id: None,
        details: details(9, 17),
    }
}

fn correction(key: &str, original: LocalId) -> NewCorrection {
    NewCorrection {
        key: KeySource::natural(key),
        original_shift_id: original,
        details: details(9, 18),
        correction_authorized: true,
        notes: "Clocked out late, supervisor confirmed".to_string(),
        timeframe: CorrectionTimeframe::NextPayrollPayment,
    }
}

fn new_payable(key: &str, worker: &Worker) -> NewPayable {
    NewPayable {
        key: KeySource::natural(key),
        worker_id: worker.local_id(),
        amount: Money::usd(Decimal::new(10000, 2)),
        earning_type: EarningType::Contractor,
        description: "Invoice 42".to_string(),
        notes: None,
        earned_at: None,
        work_location_id: None,
    }
}

// ============================================================================
// Shifts
// ============================================================================

#[tokio::test]
async fn synced_shift_is_submitted() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();

    let shift = h.engine.shifts().create(new_shift("s-1", &worker)).await.unwrap();

    assert!(shift.is_synced());
    assert_eq!(shift.body().status(), ShiftStatus::Submitted);
    assert!(shift.body().lifecycle().submitted_at().is_some());
    assert!(!shift.body().is_correction());
}

#[tokio::test]
async fn provider_verification_and_payment_advance_the_shift() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let shift = h.engine.shifts().create(new_shift("s-1", &worker)).await.unwrap();
    let worked_shift_id = shift.provider_id().unwrap().as_str().to_string();

    h.provider.verify_shift(&worked_shift_id);
    h.provider
        .mark_shift_paid(&worked_shift_id, Money::usd(Decimal::new(16000, 2)));
    let done = h
        .engine
        .reconciler::<ShiftFields>()
        .reconcile(ResourceKey::Local(shift.local_id()))
        .await
        .unwrap();

    assert_eq!(done.outcome, ReconcileOutcome::Repaired);
    assert_eq!(done.record.body().status(), ShiftStatus::Processed);
    assert_eq!(done.record.body().lifecycle().approved_by(), Some("provider"));
    assert!(done.record.projection().unwrap().paid);
}

#[tokio::test]
async fn edits_before_finalization_are_pushed() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let shift = h.engine.shifts().create(new_shift("s-1", &worker)).await.unwrap();

    let edited = h
        .engine
        .shifts()
        .edit(shift.local_id(), details(8, 16))
        .await
        .unwrap();

    assert_eq!(edited.body().details().window.start().time().to_string(), "08:00:00");
    let remote = h.provider.shift(shift.provider_id().unwrap().as_str()).unwrap();
    assert_eq!(
        remote.shift_start_at.unwrap().effective_punch_at,
        edited.body().details().window.start()
    );
}

#[tokio::test]
async fn finalized_shift_refuses_edit_and_delete() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let shift = h.engine.shifts().create(new_shift("s-1", &worker)).await.unwrap();

    let finalized = h
        .engine
        .shifts()
        .finalize_pay_period(shift.local_id())
        .await
        .unwrap();
    assert!(finalized.body().lifecycle().is_pay_period_finalized());
    assert_eq!(finalized.body().status(), ShiftStatus::Submitted);

    let edit = h
        .engine
        .shifts()
        .edit(shift.local_id(), details(8, 16))
        .await
        .unwrap_err();
    assert_eq!(edit.kind(), ErrorKind::Conflict);

    let delete = h.engine.shifts().delete(shift.local_id()).await.unwrap_err();
    assert_eq!(delete.kind(), ErrorKind::Conflict);
    assert!(h.provider.deletes().is_empty());

    // Approval is a status change, not an edit, and still applies.
    let approved = h
        .engine
        .shifts()
        .approve(shift.local_id(), "lead-3")
        .await
        .unwrap();
    assert_eq!(approved.body().status(), ShiftStatus::Approved);
    assert!(approved.body().lifecycle().is_pay_period_finalized());
}

#[tokio::test]
async fn corrections_need_authorization_and_notes() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let shift = h.engine.shifts().create(new_shift("s-1", &worker)).await.unwrap();
    h.engine
        .shifts()
        .finalize_pay_period(shift.local_id())
        .await
        .unwrap();

    let mut unauthorized = correction("s-1-fix", shift.local_id());
    unauthorized.correction_authorized = false;
    let err = h
        .engine
        .shifts()
        .create_correction(unauthorized)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut silent = correction("s-1-fix", shift.local_id());
    silent.notes = "  ".to_string();
    let err = h.engine.shifts().create_correction(silent).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(h.store.count(paysync_core::ResourceFamily::Shift), 1);
}

#[tokio::test]
async fn open_shifts_are_edited_not_corrected() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let shift = h.engine.shifts().create(new_shift("s-1", &worker)).await.unwrap();

    let err = h
        .engine
        .shifts()
        .create_correction(correction("s-1-fix", shift.local_id()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn authorized_correction_is_a_new_linked_shift() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let shift = h.engine.shifts().create(new_shift("s-1", &worker)).await.unwrap();
    h.engine
        .shifts()
        .finalize_pay_period(shift.local_id())
        .await
        .unwrap();

    let fixed = h
        .engine
        .shifts()
        .create_correction(correction("s-1-fix", shift.local_id()))
        .await
        .unwrap();

    assert_ne!(fixed.local_id(), shift.local_id());
    assert_ne!(fixed.external_id(), shift.external_id());
    assert!(fixed.is_synced());
    assert!(fixed.body().is_correction());
    let link = fixed.body().correction().unwrap();
    assert_eq!(link.original_shift_id, shift.local_id());
    assert_eq!(link.original_provider_id.as_ref(), shift.provider_id());
    assert_eq!(link.timeframe, CorrectionTimeframe::NextPayrollPayment);
    assert!(link.correction_authorized);
    let stored = h.engine.shifts().get(fixed.local_id()).await.unwrap();
    assert_eq!(stored.body().correction(), Some(link));

    // The original is untouched.
    let original = h.engine.shifts().get(shift.local_id()).await.unwrap();
    assert_eq!(original.body().details(), shift.body().details());

    // A second correction of the same shift is its own record.
    let again = h
        .engine
        .shifts()
        .create_correction(correction("s-1-fix-2", shift.local_id()))
        .await
        .unwrap();
    assert_ne!(again.local_id(), fixed.local_id());
    assert_eq!(h.store.count(paysync_core::ResourceFamily::Shift), 3);
}

#[tokio::test]
async fn rejection_needs_a_reason_and_is_terminal() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let shift = h.engine.shifts().create(new_shift("s-1", &worker)).await.unwrap();

    let err = h
        .engine
        .shifts()
        .reject(shift.local_id(), "lead-3", "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let rejected = h
        .engine
        .shifts()
        .reject(shift.local_id(), "lead-3", "Duplicate entry")
        .await
        .unwrap();
    assert_eq!(rejected.body().status(), ShiftStatus::Rejected);
    assert_eq!(rejected.body().lifecycle().rejection_reason(), Some("Duplicate entry"));

    let err = h
        .engine
        .shifts()
        .approve(shift.local_id(), "lead-3")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

// ============================================================================
// Payables
// ============================================================================

#[tokio::test]
async fn approval_is_pushed_to_the_provider() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let payable = h
        .engine
        .payables()
        .create(new_payable("p-1", &worker))
        .await
        .unwrap();
    assert_eq!(payable.body().status(), PayableStatus::PendingApproval);

    let approved = h
        .engine
        .payables()
        .approve(payable.local_id(), "ops-1")
        .await
        .unwrap();

    assert_eq!(approved.body().status(), PayableStatus::Approved);
    assert_eq!(approved.body().lifecycle().approved_by(), Some("ops-1"));
    assert!(h.provider.payable(payable.external_id().as_str()).unwrap().verified);
}

#[tokio::test]
async fn paid_payable_is_immutable() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let payable = h
        .engine
        .payables()
        .create(new_payable("p-1", &worker))
        .await
        .unwrap();
    h.engine
        .payables()
        .approve(payable.local_id(), "ops-1")
        .await
        .unwrap();

    let payout = h
        .engine
        .payables()
        .submit_for_payout(&[payable.local_id()])
        .await
        .unwrap();
    assert_eq!(payout.payables.len(), 1);
    assert_eq!(payout.payables[0].body().status(), PayableStatus::Processing);
    assert_eq!(h.provider.payouts().len(), 1);
    assert_eq!(
        h.provider.payouts()[0].external_worker_ids,
        vec![worker.external_id().to_string()]
    );

    // Already with the provider: edits are refused before payment lands.
    let update = PayableUpdate {
        amount: Money::usd(Decimal::new(5000, 2)),
        earning_type: EarningType::Bonus,
        description: "Adjusted".to_string(),
        notes: None,
    };
    let err = h
        .engine
        .payables()
        .edit(payable.local_id(), update.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let paid = payables_status_changed(
        "evt_paid",
        worker.provider_id().unwrap().as_str(),
        &[payable.external_id().as_str()],
        PayablesPaymentStatus::Paid,
        None,
    );
    assert_eq!(h.deliver(&paid).await.unwrap(), Dispatch::Handled);

    let settled = h.engine.payables().get(payable.local_id()).await.unwrap();
    assert_eq!(settled.body().status(), PayableStatus::Paid);
    assert!(settled.body().lifecycle().paid_at().is_some());

    let err = h
        .engine
        .payables()
        .edit(payable.local_id(), update)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let err = h.engine.payables().delete(payable.local_id()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // A late error report for a paid payable does not undo the payment.
    let late_error = payables_status_changed(
        "evt_late_error",
        worker.provider_id().unwrap().as_str(),
        &[payable.external_id().as_str()],
        PayablesPaymentStatus::Error,
        Some("bank rejected"),
    );
    h.deliver(&late_error).await.unwrap();
    let still = h.engine.payables().get(payable.local_id()).await.unwrap();
    assert_eq!(still.body().status(), PayableStatus::Paid);
}

#[tokio::test]
async fn payout_of_unapproved_payable_is_refused() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let payable = h
        .engine
        .payables()
        .create(new_payable("p-1", &worker))
        .await
        .unwrap();

    let err = h
        .engine
        .payables()
        .submit_for_payout(&[payable.local_id()])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(h.provider.payouts().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payouts_send_one_request() {
    let h = Harness::with_provider(FakeProvider::new().with_latency(StdDuration::from_millis(30)));
    let worker = h.onboarded_worker("w1").await.unwrap();
    let payable = h
        .engine
        .payables()
        .create(new_payable("p-race", &worker))
        .await
        .unwrap();
    h.engine
        .payables()
        .approve(payable.local_id(), "ops-1")
        .await
        .unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let engine = h.engine.clone();
            let id = payable.local_id();
            tokio::spawn(async move { engine.payables().submit_for_payout(&[id]).await })
        })
        .collect();
    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    let accepted = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(accepted, 1);
    let refused = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(refused.kind(), ErrorKind::Conflict);
    assert_eq!(h.provider.payouts().len(), 1);
    let stored = h.engine.payables().get(payable.local_id()).await.unwrap();
    assert_eq!(stored.body().status(), PayableStatus::Processing);
}

#[tokio::test]
async fn repeated_ids_in_one_payout_count_once() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let payable = h
        .engine
        .payables()
        .create(new_payable("p-twice", &worker))
        .await
        .unwrap();
    h.engine
        .payables()
        .approve(payable.local_id(), "ops-1")
        .await
        .unwrap();

    let payout = h
        .engine
        .payables()
        .submit_for_payout(&[payable.local_id(), payable.local_id()])
        .await
        .unwrap();

    assert_eq!(payout.payables.len(), 1);
    assert_eq!(payout.payables[0].body().status(), PayableStatus::Processing);
    assert_eq!(h.provider.payouts().len(), 1);

    let err = h
        .engine
        .payables()
        .submit_for_payout(&[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn failed_payout_is_resubmitted_within_policy() {
    let immediate = RetryPolicy {
        max_attempts: 2,
        base_delay: chrono::Duration::zero(),
        max_delay: chrono::Duration::zero(),
    };
    let h = Harness::build(
        FakeProvider::new(),
        SyncSettings::default().with_payout_retry(immediate),
    );
    let worker = h.onboarded_worker("w1").await.unwrap();
    let payable = h
        .engine
        .payables()
        .create(new_payable("p-1", &worker))
        .await
        .unwrap();
    h.engine
        .payables()
        .approve(payable.local_id(), "ops-1")
        .await
        .unwrap();
    h.engine
        .payables()
        .submit_for_payout(&[payable.local_id()])
        .await
        .unwrap();
    let worker_pid = worker.provider_id().unwrap().as_str().to_string();
    let ext = payable.external_id().as_str().to_string();

    h.deliver(&payables_status_changed(
        "evt_err_1",
        &worker_pid,
        &[ext.as_str()],
        PayablesPaymentStatus::Error,
        Some("account closed"),
    ))
    .await
    .unwrap();
    let failed = h.engine.payables().get(payable.local_id()).await.unwrap();
    assert_eq!(failed.body().status(), PayableStatus::Failed);
    assert_eq!(failed.body().lifecycle().retry_count(), 1);
    assert_eq!(failed.body().lifecycle().failure_reason(), Some("account closed"));
    assert_eq!(failed.projection().unwrap().last_payment_error.as_deref(), Some("account closed"));

    let resubmitted = h.engine.payables().resubmit(payable.local_id()).await.unwrap();
    assert_eq!(resubmitted.body().status(), PayableStatus::Processing);
    assert_eq!(h.provider.payouts().len(), 2);

    h.deliver(&payables_status_changed(
        "evt_err_2",
        &worker_pid,
        &[ext.as_str()],
        PayablesPaymentStatus::Error,
        Some("account closed"),
    ))
    .await
    .unwrap();

    // Two failures exhaust a two-attempt policy.
    let err = h.engine.payables().resubmit(payable.local_id()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.provider.payouts().len(), 2);
}

#[tokio::test]
async fn resubmit_waits_for_backoff() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let payable = h
        .engine
        .payables()
        .create(new_payable("p-1", &worker))
        .await
        .unwrap();
    h.engine
        .payables()
        .approve(payable.local_id(), "ops-1")
        .await
        .unwrap();
    h.engine
        .payables()
        .submit_for_payout(&[payable.local_id()])
        .await
        .unwrap();
    h.deliver(&payables_status_changed(
        "evt_err",
        worker.provider_id().unwrap().as_str(),
        &[payable.external_id().as_str()],
        PayablesPaymentStatus::Error,
        None,
    ))
    .await
    .unwrap();

    let err = h.engine.payables().resubmit(payable.local_id()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.provider.payouts().len(), 1);
}

#[tokio::test]
async fn pending_payable_can_be_rejected_and_deleted() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let payable = h
        .engine
        .payables()
        .create(new_payable("p-1", &worker))
        .await
        .unwrap();

    let rejected = h
        .engine
        .payables()
        .reject(payable.local_id(), "ops-1", "Wrong worker")
        .await
        .unwrap();
    assert_eq!(rejected.body().status(), PayableStatus::Rejected);

    h.engine.payables().delete(payable.local_id()).await.unwrap();

    assert_eq!(h.store.count(paysync_core::ResourceFamily::Payable), 0);
    assert_eq!(h.provider.deletes().len(), 1);
    let reconciled = h
        .engine
        .reconciler::<PayableFields>()
        .reconcile(ResourceKey::Local(payable.local_id()))
        .await
        .unwrap_err();
    assert_eq!(reconciled.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn approval_survives_a_failed_push_and_is_resent_by_resync() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let payable = h
        .engine
        .payables()
        .create(new_payable("p-push", &worker))
        .await
        .unwrap();
    h.provider
        .fail_next(ResourceFamily::Payable, Operation::Update, unavailable());

    let err = h
        .engine
        .payables()
        .approve(payable.local_id(), "ops-1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientProvider);

    let stored = h.engine.payables().get(payable.local_id()).await.unwrap();
    assert_eq!(stored.body().status(), PayableStatus::Approved);
    assert!(!stored.is_synced());
    assert!(stored.sync().last_error().is_some());
    assert!(!h.provider.payable(payable.external_id().as_str()).unwrap().verified);

    let again = h
        .engine
        .payables()
        .approve(payable.local_id(), "ops-1")
        .await
        .unwrap_err();
    assert_eq!(again.kind(), ErrorKind::Conflict);

    let resynced = h
        .engine
        .resync::<PayableFields>(payable.local_id())
        .await
        .unwrap();
    assert!(resynced.is_synced());
    assert_eq!(resynced.body().status(), PayableStatus::Approved);
    assert!(h.provider.payable(payable.external_id().as_str()).unwrap().verified);
}

#[tokio::test]
async fn termination_survives_a_failed_push_and_is_resent_by_resync() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w-leaving").await.unwrap();
    let provider_id = worker.provider_id().unwrap().as_str().to_string();
    let last_day = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
    h.provider
        .fail_next(ResourceFamily::Worker, Operation::Update, unavailable());

    let err = h
        .engine
        .workers()
        .terminate(worker.local_id(), last_day, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientProvider);

    let stored = h.engine.workers().get(worker.local_id()).await.unwrap();
    assert_eq!(stored.body().status(), WorkerStatus::Terminated);
    assert!(!stored.is_synced());

    let again = h
        .engine
        .workers()
        .terminate(worker.local_id(), last_day, None)
        .await
        .unwrap_err();
    assert_eq!(again.kind(), ErrorKind::Conflict);

    let resynced = h
        .engine
        .resync::<WorkerFields>(worker.local_id())
        .await
        .unwrap();
    assert!(resynced.is_synced());
    assert_eq!(resynced.body().status(), WorkerStatus::Terminated);
    assert_eq!(
        h.provider.worker(&provider_id).unwrap().lifecycle_status.as_deref(),
        Some("TERMINATED")
    );
}
