//! Convergence after lost responses, missed webhooks and remote deletes.

use chrono::{TimeZone, Utc};
use paysync_core::payable::{EarningType, NewPayable, PayableFields, PayableStatus};
use paysync_core::worker::{WorkerFields, WorkerStatus};
use paysync_core::{
    ErrorKind, ExternalId, KeySource, Money, ProviderId, ReconcileOutcome, ResourceFamily,
    ResourceKey,
};
use paysync_testing::{new_worker, timeout, unavailable, Harness, Operation};
use rust_decimal::Decimal;

fn payable(key: &str, worker_id: paysync_core::LocalId) -> NewPayable {
    NewPayable {
        key: KeySource::natural(key),
        worker_id,
        amount: Money::usd(Decimal::new(4250, 2)),
        earning_type: EarningType::Reimbursement,
        description: "Mileage".to_string(),
        notes: Some("March".to_string()),
        earned_at: Utc.with_ymd_and_hms(2024, 3, 29, 12, 0, 0).single(),
        work_location_id: None,
    }
}

#[tokio::test]
async fn lost_create_response_is_repaired_without_a_second_resource() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    h.provider
        .accept_then_fail_next(ResourceFamily::Payable, Operation::Create, timeout());
    let err = h
        .engine
        .payables()
        .create(payable("mileage-03", worker.local_id()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownOutcome);

    let key = ExternalId::from_natural_key(ResourceFamily::Payable, "mileage-03");
    let done = h
        .engine
        .reconciler::<PayableFields>()
        .reconcile(ResourceKey::External(key.clone()))
        .await
        .unwrap();

    assert_eq!(done.outcome, ReconcileOutcome::Repaired);
    assert!(done.record.is_synced());
    assert_eq!(done.record.provider_id().map(ProviderId::as_str), Some(key.as_str()));
    assert_eq!(done.record.body().status(), PayableStatus::PendingApproval);
    assert_eq!(h.provider.resource_count(ResourceFamily::Payable, key.as_str()), 1);
    assert_eq!(h.provider.calls(ResourceFamily::Payable, Operation::Create), 1);
}

#[tokio::test]
async fn reconcile_picks_up_provider_side_changes() {
    let h = Harness::new();
    let worker = h.onboarded_worker("w1").await.unwrap();
    let created = h
        .engine
        .payables()
        .create(payable("mileage-04", worker.local_id()))
        .await
        .unwrap();
    h.provider.set_payable_status(
        created.external_id().as_str(),
        paysync_core::payable::ProviderPaymentStatus::Paid,
        Some(77),
    );

    let done = h
        .engine
        .reconciler::<PayableFields>()
        .reconcile(ResourceKey::Local(created.local_id()))
        .await
        .unwrap();

    assert_eq!(done.outcome, ReconcileOutcome::Repaired);
    assert_eq!(done.record.body().status(), PayableStatus::Paid);
    assert_eq!(done.record.projection().unwrap().payment_id, Some(77));
}

#[tokio::test]
async fn sweep_sorts_unsynced_records() {
    let h = Harness::new();
    // Accepted but the response was lost.
    h.provider
        .accept_then_fail_next(ResourceFamily::Worker, Operation::Create, timeout());
    // Never reached the provider.
    h.provider
        .fail_next(ResourceFamily::Worker, Operation::Create, unavailable());

    let lost = h.engine.workers().create(new_worker("w-lost")).await.unwrap_err();
    assert_eq!(lost.kind(), ErrorKind::UnknownOutcome);
    let refused = h
        .engine
        .workers()
        .create(new_worker("w-refused"))
        .await
        .unwrap_err();
    assert_eq!(refused.kind(), ErrorKind::TransientProvider);
    h.engine.workers().create(new_worker("w-ok")).await.unwrap();

    let report = h
        .engine
        .reconciler::<WorkerFields>()
        .sweep_unsynced(10)
        .await
        .unwrap();

    assert_eq!(report.repaired.len(), 1);
    assert_eq!(report.provider_missing.len(), 1);
    assert!(report.failed.is_empty());
    assert!(!report.is_clean());

    let repaired = h.engine.workers().get(report.repaired[0]).await.unwrap();
    assert_eq!(
        repaired.external_id(),
        &ExternalId::from_natural_key(ResourceFamily::Worker, "w-lost")
    );
    assert!(repaired.is_synced());

    // The record the provider never saw is resumed by a resync.
    let resumed = h
        .engine
        .resync::<WorkerFields>(report.provider_missing[0])
        .await
        .unwrap();
    assert!(resumed.is_synced());
    assert_eq!(h.provider.total(ResourceFamily::Worker), 3);

    let again = h
        .engine
        .reconciler::<WorkerFields>()
        .sweep_unsynced(10)
        .await
        .unwrap();
    assert!(again.is_clean());
    assert!(again.repaired.is_empty());
}

#[tokio::test]
async fn provider_only_worker_is_materialized_once() {
    let h = Harness::new();
    let remote = h.provider.seed_worker(None, "remote@example.com");
    let provider_id = ProviderId::new(remote.worker_id.clone());
    let reconciler = h.engine.reconciler::<WorkerFields>();

    let first = reconciler
        .reconcile(ResourceKey::Provider(provider_id.clone()))
        .await
        .unwrap();

    assert_eq!(first.outcome, ReconcileOutcome::Materialized);
    assert!(first.record.is_synced());
    assert_eq!(first.record.provider_id(), Some(&provider_id));
    assert_eq!(first.record.body().profile().email, "remote@example.com");
    assert_eq!(first.record.body().status(), WorkerStatus::PendingOnboarding);
    assert_eq!(
        first.record.external_id(),
        &ExternalId::from_natural_key(
            ResourceFamily::Worker,
            &format!("provider:{}", remote.worker_id)
        )
    );

    let second = reconciler
        .reconcile(ResourceKey::Provider(provider_id))
        .await
        .unwrap();
    assert_eq!(second.outcome, ReconcileOutcome::Repaired);
    assert_eq!(second.record.local_id(), first.record.local_id());
    assert_eq!(h.store.count(ResourceFamily::Worker), 1);
}

#[tokio::test]
async fn provider_worker_keeps_its_carried_key() {
    let h = Harness::new();
    let key = ExternalId::from_natural_key(ResourceFamily::Worker, "hr-8812");
    let remote = h
        .provider
        .seed_worker(Some(key.as_str()), "carried@example.com");

    let done = h
        .engine
        .reconciler::<WorkerFields>()
        .reconcile(ResourceKey::Provider(ProviderId::new(remote.worker_id)))
        .await
        .unwrap();

    assert_eq!(done.record.external_id(), &key);
    let found = h.engine.workers().find_by_external_id(&key).await.unwrap();
    assert_eq!(found.map(|record| record.local_id()), Some(done.record.local_id()));
}

#[tokio::test]
async fn remote_delete_is_reported_not_repaired() {
    let h = Harness::new();
    let worker = h.engine.workers().create(new_worker("w-gone")).await.unwrap();
    let provider_id = worker.provider_id().unwrap().as_str().to_string();
    assert!(h.provider.remove_remote(ResourceFamily::Worker, &provider_id));

    let done = h
        .engine
        .reconciler::<WorkerFields>()
        .reconcile(ResourceKey::Local(worker.local_id()))
        .await
        .unwrap();

    assert_eq!(done.outcome, ReconcileOutcome::ProviderMissing);
    assert_eq!(done.record.local_id(), worker.local_id());
    assert_eq!(h.store.count(ResourceFamily::Worker), 1);
    assert_eq!(h.provider.total(ResourceFamily::Worker), 0);
}

#[tokio::test]
async fn unknown_everywhere_is_not_found() {
    let h = Harness::new();

    let err = h
        .engine
        .reconciler::<WorkerFields>()
        .reconcile(ResourceKey::Provider(ProviderId::new("999999")))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.store.count(ResourceFamily::Worker), 0);
}

#[tokio::test]
async fn missed_onboarding_webhook_is_recovered_by_adoption() {
    let h = Harness::new();
    let key = ExternalId::from_natural_key(ResourceFamily::Worker, "hr-77");
    let remote = h.provider.seed_worker(Some(key.as_str()), "late@example.com");

    // The event arrives for a worker we have never stored.
    h.deliver(&paysync_testing::onboarding_completed(
        "evt_adopt",
        &remote.worker_id,
        key.as_str(),
    ))
    .await
    .unwrap();

    let adopted = h
        .engine
        .workers()
        .find_by_external_id(&key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(adopted.body().status(), WorkerStatus::Active);
    assert!(adopted.is_synced());
}
