//! Wiring: the stores, provider gateways and settings the engine runs on.

use crate::gateway::{PayoutGateway, ProviderGateway};
use crate::payable::PayableFields;
use crate::settings::SyncSettings;
use crate::shift::ShiftFields;
use crate::store::{ProcessedEventStore, RecordStore};
use crate::work_location::WorkLocationFields;
use crate::worker::WorkerFields;
use std::sync::Arc;

#[derive(Clone)]
pub struct Stores {
    pub workers: Arc<dyn RecordStore<WorkerFields>>,
    pub work_locations: Arc<dyn RecordStore<WorkLocationFields>>,
    pub shifts: Arc<dyn RecordStore<ShiftFields>>,
    pub payables: Arc<dyn RecordStore<PayableFields>>,
    pub processed_events: Arc<dyn ProcessedEventStore>,
}

impl Stores {
    /// Back every store with one implementation (e.g. a single database).
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: RecordStore<WorkerFields>
            + RecordStore<WorkLocationFields>
            + RecordStore<ShiftFields>
            + RecordStore<PayableFields>
            + ProcessedEventStore
            + 'static,
    {
        Self {
            workers: store.clone(),
            work_locations: store.clone(),
            shifts: store.clone(),
            payables: store.clone(),
            processed_events: store,
        }
    }
}

#[derive(Clone)]
pub struct Gateways {
    pub workers: Arc<dyn ProviderGateway<WorkerFields>>,
    pub work_locations: Arc<dyn ProviderGateway<WorkLocationFields>>,
    pub shifts: Arc<dyn ProviderGateway<ShiftFields>>,
    pub payables: Arc<dyn ProviderGateway<PayableFields>>,
    pub payouts: Arc<dyn PayoutGateway>,
}

impl Gateways {
    /// Serve every family from one provider client.
    pub fn shared<P>(provider: Arc<P>) -> Self
    where
        P: ProviderGateway<WorkerFields>
            + ProviderGateway<WorkLocationFields>
            + ProviderGateway<ShiftFields>
            + ProviderGateway<PayableFields>
            + PayoutGateway
            + 'static,
    {
        Self {
            workers: provider.clone(),
            work_locations: provider.clone(),
            shifts: provider.clone(),
            payables: provider.clone(),
            payouts: provider,
        }
    }
}

#[derive(Clone)]
pub struct SyncContext {
    pub stores: Stores,
    pub gateways: Gateways,
    pub settings: SyncSettings,
}

impl SyncContext {
    pub fn new(stores: Stores, gateways: Gateways) -> Self {
        Self {
            stores,
            gateways,
            settings: SyncSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }
}
