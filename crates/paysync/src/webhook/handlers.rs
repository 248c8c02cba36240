//! Event handlers: how each provider event changes local state.
//!
//! Deliveries can arrive out of order and more than once, so every handler
//! is a replay-safe upsert. A lifecycle fact that no longer fits the local
//! state (onboarding completed for a terminated worker) is logged and
//! dropped rather than failed, since retrying cannot make it fit.

use super::dispatch::EventHandler;
use super::event::{PayablesPaymentStatus, WebhookEnvelope, WebhookEvent, WorkerIds};
use crate::error::{Result, SyncError};
use crate::ids::{ExternalId, ProviderId};
use crate::payable::{PayableService, PaymentOutcome};
use crate::reconcile::{Reconciler, ResourceKey};
use crate::sync::Synchronizers;
use crate::worker::{Worker, WorkerAction, WorkerFields, WorkerService, WorkerStatus};
use async_trait::async_trait;
use tracing::{info, warn};

#[derive(Clone)]
pub struct PayrollEventHandler {
    workers: WorkerService,
    payables: PayableService,
    worker_reconciler: Reconciler<WorkerFields>,
}

impl PayrollEventHandler {
    pub fn new(all: &Synchronizers) -> Self {
        Self {
            workers: WorkerService::new(all),
            payables: PayableService::new(all),
            worker_reconciler: Reconciler::new(all.workers.clone()),
        }
    }

    async fn find_worker(&self, ids: &WorkerIds) -> Result<Worker> {
        self.workers
            .resolve_provider_worker(&ids.worker_id, ids.external_worker_id.as_deref())
            .await
    }

    /// Find the worker, adopting it from the provider when it is unknown
    /// locally.
    async fn find_or_adopt_worker(&self, ids: &WorkerIds) -> Result<Worker> {
        match self.find_worker(ids).await {
            Err(SyncError::NotFound { .. }) => Ok(self
                .worker_reconciler
                .reconcile(ResourceKey::Provider(ProviderId::new(ids.worker_id.clone())))
                .await?
                .record),
            other => other,
        }
    }

    async fn provider_action(&self, worker: &Worker, action: WorkerAction) -> Result<()> {
        match self
            .workers
            .apply_provider_action(worker.local_id(), action)
            .await
        {
            Ok(_) => Ok(()),
            Err(err @ SyncError::IllegalTransition { .. }) => {
                warn!(
                    external_id = %worker.external_id(),
                    error = %err,
                    "Provider lifecycle fact does not apply to local worker"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn payables_status_changed(
        &self,
        external_ids: &[String],
        status: PayablesPaymentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let outcome = match status {
            PayablesPaymentStatus::Paid => PaymentOutcome::Paid,
            PayablesPaymentStatus::Error => PaymentOutcome::Failed(
                error_message
                    .unwrap_or("payment failed without a reason")
                    .to_string(),
            ),
        };
        // Apply every payable before reporting; replays skip the ones done.
        let mut first_error = None;
        for raw in external_ids {
            let applied = match ExternalId::parse(raw.clone()) {
                Ok(key) => self.payables.record_payment_outcome(&key, outcome.clone()).await,
                Err(err) => Err(SyncError::validation("payable_external_ids", err.to_string())),
            };
            match applied {
                Ok(_) => {}
                Err(err @ SyncError::IllegalTransition { .. }) => {
                    warn!(external_id = %raw, error = %err, "Payment outcome does not apply to payable");
                }
                Err(err) => {
                    warn!(external_id = %raw, error = %err, "Failed to record payment outcome");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EventHandler for PayrollEventHandler {
    async fn handle(&self, envelope: &WebhookEnvelope, event: WebhookEvent) -> Result<()> {
        match event {
            WebhookEvent::OnboardingCompleted(ids) => {
                let worker = self.find_or_adopt_worker(&ids).await?;
                self.provider_action(&worker, WorkerAction::CompleteOnboarding)
                    .await?;
                self.workers
                    .update_projection(worker.local_id(), |projection| {
                        projection.onboarding_status = Some("COMPLETE".to_string());
                    })
                    .await?;
                info!(event_id = %envelope.id, external_id = %worker.external_id(), "Worker onboarding completed");
            }
            WebhookEvent::OnboardingLocked(locked) => {
                let worker = self.find_worker(&locked.worker).await?;
                self.provider_action(&worker, WorkerAction::LockOnboarding)
                    .await?;
                self.workers
                    .update_projection(worker.local_id(), |projection| {
                        projection.onboarding_locked_at = locked.onboarding_locked_at;
                    })
                    .await?;
            }
            WebhookEvent::WorkerCreated(ids) | WebhookEvent::WorkerProfileUpdated(ids) => {
                let done = self
                    .worker_reconciler
                    .reconcile(ResourceKey::Provider(ProviderId::new(ids.worker_id)))
                    .await?;
                info!(
                    event_id = %envelope.id,
                    external_id = %done.record.external_id(),
                    outcome = done.outcome.as_str(),
                    "Worker refreshed from provider"
                );
            }
            WebhookEvent::WorkerDeleted(ids) => {
                let worker = self.find_worker(&ids).await?;
                if worker.body().status() == WorkerStatus::Inactive {
                    return Ok(());
                }
                self.provider_action(&worker, WorkerAction::Deactivate).await?;
            }
            WebhookEvent::TinVerificationChanged(changed) => {
                let worker = self.find_worker(&changed.worker).await?;
                self.workers
                    .update_projection(worker.local_id(), |projection| {
                        projection.tin_verification = Some(changed.tin_verification_status);
                    })
                    .await?;
            }
            WebhookEvent::PaymentMethodUpdated(updated) => {
                let worker = self.find_worker(&updated.worker).await?;
                self.workers
                    .update_projection(worker.local_id(), |projection| {
                        projection.direct_deposit = Some(updated.direct_deposit);
                        projection.pay_card = Some(updated.pay_card);
                    })
                    .await?;
            }
            WebhookEvent::TaxFormsAvailable(ids) => {
                let worker = self.find_worker(&ids).await?;
                self.workers
                    .update_projection(worker.local_id(), |projection| {
                        projection.tax_forms_available = true;
                    })
                    .await?;
            }
            WebhookEvent::PaymentPaid(paid) => {
                let worker = self.find_worker(&paid.worker).await?;
                self.workers
                    .update_projection(worker.local_id(), |projection| {
                        projection.last_payment_id = Some(
                            projection
                                .last_payment_id
                                .map_or(paid.payment_id, |last| last.max(paid.payment_id)),
                        );
                    })
                    .await?;
                info!(
                    event_id = %envelope.id,
                    payment_id = paid.payment_id,
                    net = ?paid.net_amount.map(|money| money.to_string()),
                    "Payment paid"
                );
            }
            WebhookEvent::DepositReturned(returned) => {
                let worker = self.find_worker(&returned.worker).await?;
                warn!(
                    event_id = %envelope.id,
                    external_id = %worker.external_id(),
                    payment_id = returned.payment_id,
                    "Deposit returned"
                );
                self.workers
                    .update_projection(worker.local_id(), |projection| {
                        if !projection.returned_payment_ids.contains(&returned.payment_id) {
                            projection.returned_payment_ids.push(returned.payment_id);
                        }
                    })
                    .await?;
            }
            WebhookEvent::PayablesStatusChanged(changed) => {
                self.payables_status_changed(
                    &changed.payable_external_ids,
                    changed.payment_status,
                    changed.payment_error_message.as_deref(),
                )
                .await?;
            }
            WebhookEvent::Unrecognized { .. } => {}
        }
        Ok(())
    }
}
