//! An engine over in-memory stores and the fake provider, plus builders for
//! signed webhook deliveries.

use crate::provider::FakeProvider;
use crate::queue::InMemoryQueue;
use crate::store::InMemoryStore;
use chrono::{NaiveDate, Utc};
use paysync_core::webhook::{
    Dispatch, EventData, EventType, PayablesPaymentStatus, WebhookEnvelope, WebhookIntake,
    WebhookProcessor, WebhookRequest, WebhookVerifier,
};
use paysync_core::worker::{NewWorker, Worker, WorkerClassification, WorkerProfile};
use paysync_core::{
    Engine, EventId, Gateways, KeySource, Result, Stores, SyncContext, SyncError, SyncSettings,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub const SIGNING_KEY: &str = "whsec_paysync_test";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<FakeProvider>,
    pub queue: Arc<InMemoryQueue>,
    pub engine: Engine,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FakeProvider::new(), SyncSettings::default())
    }

    pub fn with_provider(provider: FakeProvider) -> Self {
        Self::build(provider, SyncSettings::default())
    }

    pub fn build(provider: FakeProvider, settings: SyncSettings) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(provider);
        let ctx = SyncContext::new(
            Stores::shared(store.clone()),
            Gateways::shared(provider.clone()),
        )
        .with_settings(settings);
        Self {
            store,
            provider,
            queue: Arc::new(InMemoryQueue::new()),
            engine: Engine::new(ctx),
        }
    }

    /// Replace the queue, e.g. with one that gives up sooner.
    pub fn with_queue(mut self, queue: InMemoryQueue) -> Self {
        self.queue = Arc::new(queue);
        self
    }

    pub fn verifier() -> WebhookVerifier {
        WebhookVerifier::with_key(SIGNING_KEY)
    }

    pub fn intake(&self) -> WebhookIntake {
        self.engine.intake(Self::verifier(), self.queue.clone())
    }

    pub fn processor(&self) -> WebhookProcessor {
        self.engine
            .processor(self.queue.clone())
            .with_worker_id("test-processor")
    }

    /// Hand an event straight to the dispatcher, skipping intake and queue.
    pub async fn deliver(&self, envelope: &WebhookEnvelope) -> Result<Dispatch> {
        self.engine.dispatcher().dispatch(envelope).await
    }

    /// Create a worker and drive it through provider onboarding to active.
    pub async fn onboarded_worker(&self, key: &str) -> Result<Worker> {
        let worker = self.engine.workers().create(new_worker(key)).await?;
        let provider_id = worker
            .provider_id()
            .ok_or_else(|| SyncError::validation("worker", format!("{key} did not sync")))?
            .to_string();
        self.provider.complete_onboarding(&provider_id);
        self.deliver(&onboarding_completed(
            &format!("evt_onboarded_{key}"),
            &provider_id,
            worker.external_id().as_str(),
        ))
        .await?;
        self.engine.workers().get(worker.local_id()).await
    }
}

pub fn new_worker(key: &str) -> NewWorker {
    NewWorker {
        key: KeySource::natural(key),
        classification: WorkerClassification::Contractor,
        profile: WorkerProfile {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: format!("{key}@example.com"),
            phone_number: None,
            hire_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap_or_default(),
        },
        work_location_id: None,
    }
}

// ============================================================================
// Envelopes
// ============================================================================

pub fn envelope(event_id: &str, event_type: EventType, object: Value) -> WebhookEnvelope {
    WebhookEnvelope {
        version: Some("1.0".to_string()),
        id: EventId::new(event_id),
        company_id: Some(1),
        event_type: event_type.as_str().to_string(),
        timestamp: Some(Utc::now().timestamp()),
        data: EventData { object },
    }
}

pub fn onboarding_completed(
    event_id: &str,
    worker_id: &str,
    external_worker_id: &str,
) -> WebhookEnvelope {
    envelope(
        event_id,
        EventType::OnboardingCompleted,
        json!({"workerId": worker_id, "externalWorkerId": external_worker_id}),
    )
}

pub fn payables_status_changed(
    event_id: &str,
    worker_id: &str,
    payable_external_ids: &[&str],
    status: PayablesPaymentStatus,
    error: Option<&str>,
) -> WebhookEnvelope {
    envelope(
        event_id,
        EventType::PayablesStatusChanged,
        json!({
            "workerId": worker_id,
            "paymentId": 9001,
            "payableExternalIds": payable_external_ids,
            "paymentStatus": status,
            "paymentErrorMessage": error,
        }),
    )
}

/// A delivery as the provider would send it: raw body plus signature headers.
#[derive(Debug, Clone)]
pub struct SignedDelivery {
    pub body: Vec<u8>,
    pub signature: String,
    pub timestamp: String,
}

impl SignedDelivery {
    pub fn new(envelope: &WebhookEnvelope) -> Self {
        let body = serde_json::to_vec(envelope).unwrap_or_default();
        Self::from_body(body, &Utc::now().timestamp().to_string())
    }

    pub fn from_body(body: Vec<u8>, timestamp: &str) -> Self {
        let signature = Harness::verifier()
            .sign(timestamp, &body)
            .unwrap_or_default();
        Self {
            body,
            signature,
            timestamp: timestamp.to_string(),
        }
    }

    pub fn request(&self) -> WebhookRequest<'_> {
        WebhookRequest {
            signature: Some(self.signature.as_str()),
            timestamp: Some(self.timestamp.as_str()),
            body: &self.body,
        }
    }
}
