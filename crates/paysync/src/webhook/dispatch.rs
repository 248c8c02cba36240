//! Dedup and routing of verified webhook events.
//!
//! ```text
//! envelope ──▶ record_if_absent(id) ──false──▶ Duplicate (no side effects)
//!                     │ true
//!                     ▼
//!               decode payload ──unknown type──▶ Ignored (warn, ack)
//!                     │
//!                     ▼
//!               handler.handle ──err──▶ release(id), error
//!                     │ ok
//!                     ▼
//!                  Handled
//! ```
//!
//! The processed mark is taken before the handler runs so concurrent
//! deliveries of one event cannot both execute it. A failed handler gives the
//! mark back, so the next delivery runs the handler again.

use super::event::{WebhookEnvelope, WebhookEvent};
use crate::error::{Result, SyncError};
use crate::store::ProcessedEventStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Applies one decoded event to local state.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &WebhookEnvelope, event: WebhookEvent) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// The event id was already processed.
    Duplicate,
    /// Unrecognized event type, acknowledged without action.
    Ignored,
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    events: Arc<dyn ProcessedEventStore>,
    handler: Arc<dyn EventHandler>,
}

impl WebhookDispatcher {
    pub fn new(events: Arc<dyn ProcessedEventStore>, handler: Arc<dyn EventHandler>) -> Self {
        Self { events, handler }
    }

    pub async fn dispatch(&self, envelope: &WebhookEnvelope) -> Result<Dispatch> {
        let event_id = &envelope.id;
        if !self.events.record_if_absent(event_id, Utc::now()).await? {
            warn!(
                event_id = %event_id,
                event_type = %envelope.event_type,
                "Duplicate webhook event, skipping"
            );
            return Ok(Dispatch::Duplicate);
        }

        let event = match WebhookEvent::from_envelope(envelope) {
            Ok(event) => event,
            Err(err) => {
                error!(
                    event_id = %event_id,
                    event_type = %envelope.event_type,
                    error = %err,
                    "Malformed webhook payload"
                );
                self.events.release(event_id).await?;
                return Err(SyncError::validation(
                    "data.object",
                    format!("malformed {} payload: {err}", envelope.event_type),
                ));
            }
        };

        if let WebhookEvent::Unrecognized { event_type } = &event {
            warn!(
                event_id = %event_id,
                event_type = %event_type,
                "Unrecognized webhook event type, acknowledging"
            );
            return Ok(Dispatch::Ignored);
        }

        match self.handler.handle(envelope, event).await {
            Ok(()) => {
                debug!(event_id = %event_id, event_type = %envelope.event_type, "Webhook event handled");
                Ok(Dispatch::Handled)
            }
            Err(err) => {
                error!(
                    event_id = %event_id,
                    event_type = %envelope.event_type,
                    kind = err.kind().as_str(),
                    error = %err,
                    "Webhook handler failed"
                );
                if let Err(release_err) = self.events.release(event_id).await {
                    error!(
                        event_id = %event_id,
                        error = %release_err,
                        "Failed to release processed mark, redelivery will be skipped"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EventId;
    use chrono::DateTime;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Seen(Mutex<HashSet<String>>);

    #[async_trait]
    impl ProcessedEventStore for Seen {
        async fn record_if_absent(
            &self,
            event_id: &EventId,
            _at: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            Ok(self.0.lock().unwrap().insert(event_id.to_string()))
        }

        async fn contains(&self, event_id: &EventId) -> anyhow::Result<bool> {
            Ok(self.0.lock().unwrap().contains(event_id.as_str()))
        }

        async fn release(&self, event_id: &EventId) -> anyhow::Result<()> {
            self.0.lock().unwrap().remove(event_id.as_str());
            Ok(())
        }

        async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    struct Counting {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _envelope: &WebhookEnvelope, _event: WebhookEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(SyncError::Store(anyhow::anyhow!("database unavailable")));
            }
            Ok(())
        }
    }

    fn envelope(id: &str, event_type: &str) -> WebhookEnvelope {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "type": event_type,
            "data": {"object": {"workerId": "1", "externalWorkerId": "W1"}}
        }))
        .unwrap()
    }

    fn dispatcher(fail_first: bool) -> (WebhookDispatcher, Arc<Seen>, Arc<Counting>) {
        let seen = Arc::new(Seen::default());
        let handler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first,
        });
        (
            WebhookDispatcher::new(seen.clone(), handler.clone()),
            seen,
            handler,
        )
    }

    #[tokio::test]
    async fn duplicates_run_the_handler_once() {
        let (dispatcher, _, handler) = dispatcher(false);
        let event = envelope("evt_1", "worker.created");
        assert_eq!(dispatcher.dispatch(&event).await.unwrap(), Dispatch::Handled);
        assert_eq!(dispatcher.dispatch(&event).await.unwrap(), Dispatch::Duplicate);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_handler_releases_the_mark() {
        let (dispatcher, seen, handler) = dispatcher(true);
        let event = envelope("evt_2", "worker.created");
        assert!(dispatcher.dispatch(&event).await.is_err());
        assert!(!seen.contains(&event.id).await.unwrap());
        assert_eq!(dispatcher.dispatch(&event).await.unwrap(), Dispatch::Handled);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_types_are_acknowledged() {
        let (dispatcher, _, handler) = dispatcher(false);
        let event = envelope("evt_3", "worker.teleported");
        assert_eq!(dispatcher.dispatch(&event).await.unwrap(), Dispatch::Ignored);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_validation_error() {
        let (dispatcher, seen, _) = dispatcher(false);
        let event = envelope("evt_4", "payment.paid");
        let err = dispatcher.dispatch(&event).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(!seen.contains(&event.id).await.unwrap());
    }
}
