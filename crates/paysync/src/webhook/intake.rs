//! Webhook receipt: authenticate, enqueue durably, acknowledge.
//!
//! Processing happens later on the [`WebhookProcessor`](super::WebhookProcessor),
//! so the provider never waits on a handler.

use super::event::WebhookEnvelope;
use super::verify::{check_freshness, WebhookVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::error::{Result, SyncError};
use crate::store::{Enqueued, EventQueue};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// The parts of an inbound webhook request intake looks at.
#[derive(Debug, Clone, Copy)]
pub struct WebhookRequest<'a> {
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub body: &'a [u8],
}

impl<'a> WebhookRequest<'a> {
    /// Pick the signature headers out of `headers`, matching names
    /// case-insensitively.
    pub fn from_headers<I>(headers: I, body: &'a [u8]) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut request = Self {
            signature: None,
            timestamp: None,
            body,
        };
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(SIGNATURE_HEADER) {
                request.signature = Some(value);
            } else if name.eq_ignore_ascii_case(TIMESTAMP_HEADER) {
                request.timestamp = Some(value);
            }
        }
        request
    }
}

/// Response body for an accepted delivery, duplicates included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    pub received: bool,
}

pub struct WebhookIntake {
    verifier: WebhookVerifier,
    queue: Arc<dyn EventQueue>,
    tolerance: Option<Duration>,
}

impl WebhookIntake {
    pub fn new(verifier: WebhookVerifier, queue: Arc<dyn EventQueue>) -> Self {
        Self {
            verifier,
            queue,
            tolerance: Some(Duration::minutes(5)),
        }
    }

    /// Maximum timestamp skew; `None` skips the freshness check.
    pub fn with_tolerance(mut self, tolerance: Option<Duration>) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Authenticate and enqueue one delivery.
    ///
    /// Fails with `Authentication` (401) when the signature does not verify
    /// and `Validation` (400) when the body is not an event envelope.
    pub async fn receive(&self, request: WebhookRequest<'_>) -> Result<Acknowledgement> {
        if let Err(err) = self
            .verifier
            .verify(request.signature, request.timestamp, request.body)
        {
            warn!(error = %err, body_len = request.body.len(), "Rejected webhook");
            return Err(SyncError::authentication(err.to_string()));
        }
        if let (Some(tolerance), Some(timestamp)) = (self.tolerance, request.timestamp) {
            if let Err(err) = check_freshness(timestamp, Utc::now(), tolerance) {
                warn!(error = %err, "Rejected stale webhook");
                return Err(SyncError::authentication(err.to_string()));
            }
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(request.body)
            .map_err(|err| SyncError::validation("body", format!("not a webhook envelope: {err}")))?;

        match self.queue.enqueue(&envelope).await? {
            Enqueued::New(id) => info!(
                queue_id = %id,
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                "Webhook enqueued"
            ),
            Enqueued::Duplicate => warn!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                "Webhook already enqueued"
            ),
        }
        Ok(Acknowledgement { received: true })
    }
}
