//! Entry point wiring services, reconcilers and webhook plumbing over one
//! [`SyncContext`].

use crate::context::SyncContext;
use crate::error::Result;
use crate::ids::LocalId;
use crate::payable::PayableService;
use crate::reconcile::Reconciler;
use crate::record::Record;
use crate::shift::ShiftService;
use crate::store::EventQueue;
use crate::sync::{SyncFamily, Synchronizers};
use crate::webhook::{
    PayrollEventHandler, WebhookDispatcher, WebhookIntake, WebhookProcessor, WebhookVerifier,
};
use crate::work_location::WorkLocationService;
use crate::worker::WorkerService;
use std::sync::Arc;

#[derive(Clone)]
pub struct Engine {
    ctx: SyncContext,
    sync: Synchronizers,
}

impl Engine {
    pub fn new(ctx: SyncContext) -> Self {
        let sync = Synchronizers::new(&ctx);
        Self { ctx, sync }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn synchronizers(&self) -> &Synchronizers {
        &self.sync
    }

    pub fn workers(&self) -> WorkerService {
        WorkerService::new(&self.sync)
    }

    pub fn work_locations(&self) -> WorkLocationService {
        WorkLocationService::new(&self.sync)
    }

    pub fn shifts(&self) -> ShiftService {
        ShiftService::new(&self.sync)
    }

    pub fn payables(&self) -> PayableService {
        PayableService::new(&self.sync)
    }

    pub fn reconciler<F: SyncFamily>(&self) -> Reconciler<F> {
        Reconciler::new(self.sync.get::<F>().clone())
    }

    /// Resume or re-push one record of family `F`.
    pub async fn resync<F: SyncFamily>(&self, local_id: LocalId) -> Result<Record<F>> {
        self.sync.get::<F>().resync(local_id).await
    }

    pub fn dispatcher(&self) -> WebhookDispatcher {
        WebhookDispatcher::new(
            self.ctx.stores.processed_events.clone(),
            Arc::new(PayrollEventHandler::new(&self.sync)),
        )
    }

    pub fn intake(&self, verifier: WebhookVerifier, queue: Arc<dyn EventQueue>) -> WebhookIntake {
        WebhookIntake::new(verifier, queue).with_tolerance(self.ctx.settings.webhook_tolerance)
    }

    pub fn processor(&self, queue: Arc<dyn EventQueue>) -> WebhookProcessor {
        WebhookProcessor::new(
            queue,
            self.dispatcher(),
            self.ctx.stores.processed_events.clone(),
        )
        .with_retention(self.ctx.settings.processed_event_retention)
    }
}
