//! Webhook envelope and the closed set of events the engine understands.

use crate::ids::EventId;
use crate::money::Money;
use crate::worker::TinVerification;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ version, id, companyId, type, timestamp, data: { object } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub version: Option<String>,
    pub id: EventId,
    #[serde(default)]
    pub company_id: Option<i64>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    OnboardingCompleted,
    PaymentMethodUpdated,
    TaxFormsAvailable,
    PaymentPaid,
    PayablesStatusChanged,
    DepositReturned,
    WorkerCreated,
    WorkerProfileUpdated,
    WorkerDeleted,
    OnboardingLocked,
    TinVerificationChanged,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        Self::OnboardingCompleted,
        Self::PaymentMethodUpdated,
        Self::TaxFormsAvailable,
        Self::PaymentPaid,
        Self::PayablesStatusChanged,
        Self::DepositReturned,
        Self::WorkerCreated,
        Self::WorkerProfileUpdated,
        Self::WorkerDeleted,
        Self::OnboardingLocked,
        Self::TinVerificationChanged,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnboardingCompleted => "worker.onboarding-completed",
            Self::PaymentMethodUpdated => "payment.updated-payment-method",
            Self::TaxFormsAvailable => "worker.new-tax-forms-available",
            Self::PaymentPaid => "payment.paid",
            Self::PayablesStatusChanged => "payment-payables.status-changed",
            Self::DepositReturned => "payment.deposit-returned",
            Self::WorkerCreated => "worker.created",
            Self::WorkerProfileUpdated => "worker.profile-updated",
            Self::WorkerDeleted => "worker.deleted",
            Self::OnboardingLocked => "worker.onboarding-locked",
            Self::TinVerificationChanged => "worker.tin-verification-status-changed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Worker identity carried by every payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerIds {
    pub worker_id: String,
    #[serde(default)]
    pub external_worker_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodUpdated {
    #[serde(flatten)]
    pub worker: WorkerIds,
    #[serde(default)]
    pub direct_deposit: bool,
    #[serde(default)]
    pub pay_card: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPaid {
    #[serde(flatten)]
    pub worker: WorkerIds,
    pub payment_id: i64,
    #[serde(default)]
    pub earning_date: Option<String>,
    #[serde(default)]
    pub gross_amount: Option<Money>,
    #[serde(default)]
    pub net_amount: Option<Money>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayablesPaymentStatus {
    Paid,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayablesStatusChanged {
    #[serde(flatten)]
    pub worker: WorkerIds,
    #[serde(default)]
    pub payment_id: Option<i64>,
    #[serde(default)]
    pub earning_date: Option<String>,
    pub payable_external_ids: Vec<String>,
    pub payment_status: PayablesPaymentStatus,
    #[serde(default)]
    pub payment_error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositReturned {
    #[serde(flatten)]
    pub worker: WorkerIds,
    pub payment_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingLocked {
    #[serde(flatten)]
    pub worker: WorkerIds,
    #[serde(default)]
    pub onboarding_locked_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TinVerificationChanged {
    #[serde(flatten)]
    pub worker: WorkerIds,
    pub tin_verification_status: TinVerification,
}

/// A decoded webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    OnboardingCompleted(WorkerIds),
    PaymentMethodUpdated(PaymentMethodUpdated),
    TaxFormsAvailable(WorkerIds),
    PaymentPaid(PaymentPaid),
    PayablesStatusChanged(PayablesStatusChanged),
    DepositReturned(DepositReturned),
    WorkerCreated(WorkerIds),
    WorkerProfileUpdated(WorkerIds),
    WorkerDeleted(WorkerIds),
    OnboardingLocked(OnboardingLocked),
    TinVerificationChanged(TinVerificationChanged),
    /// A type this engine does not know. Acknowledged and ignored.
    Unrecognized { event_type: String },
}

impl WebhookEvent {
    /// Decode the payload for the envelope's type.
    pub fn from_envelope(envelope: &WebhookEnvelope) -> Result<Self, serde_json::Error> {
        let Some(kind) = EventType::parse(&envelope.event_type) else {
            return Ok(Self::Unrecognized {
                event_type: envelope.event_type.clone(),
            });
        };
        let object = &envelope.data.object;
        let event = match kind {
            EventType::OnboardingCompleted => Self::OnboardingCompleted(decode(object)?),
            EventType::PaymentMethodUpdated => Self::PaymentMethodUpdated(decode(object)?),
            EventType::TaxFormsAvailable => Self::TaxFormsAvailable(decode(object)?),
            EventType::PaymentPaid => Self::PaymentPaid(decode(object)?),
            EventType::PayablesStatusChanged => Self::PayablesStatusChanged(decode(object)?),
            EventType::DepositReturned => Self::DepositReturned(decode(object)?),
            EventType::WorkerCreated => Self::WorkerCreated(decode(object)?),
            EventType::WorkerProfileUpdated => Self::WorkerProfileUpdated(decode(object)?),
            EventType::WorkerDeleted => Self::WorkerDeleted(decode(object)?),
            EventType::OnboardingLocked => Self::OnboardingLocked(decode(object)?),
            EventType::TinVerificationChanged => Self::TinVerificationChanged(decode(object)?),
        };
        Ok(event)
    }

    pub fn event_type(&self) -> Option<EventType> {
        Some(match self {
            Self::OnboardingCompleted(_) => EventType::OnboardingCompleted,
            Self::PaymentMethodUpdated(_) => EventType::PaymentMethodUpdated,
            Self::TaxFormsAvailable(_) => EventType::TaxFormsAvailable,
            Self::PaymentPaid(_) => EventType::PaymentPaid,
            Self::PayablesStatusChanged(_) => EventType::PayablesStatusChanged,
            Self::DepositReturned(_) => EventType::DepositReturned,
            Self::WorkerCreated(_) => EventType::WorkerCreated,
            Self::WorkerProfileUpdated(_) => EventType::WorkerProfileUpdated,
            Self::WorkerDeleted(_) => EventType::WorkerDeleted,
            Self::OnboardingLocked(_) => EventType::OnboardingLocked,
            Self::TinVerificationChanged(_) => EventType::TinVerificationChanged,
            Self::Unrecognized { .. } => return None,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(object: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, object: Value) -> WebhookEnvelope {
        serde_json::from_value(json!({
            "version": "1",
            "id": "evt_1",
            "companyId": 12,
            "type": event_type,
            "timestamp": 1_714_953_600,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn every_type_round_trips_its_name() {
        for kind in EventType::ALL {
            assert_eq!(EventType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventType::parse("worker.teleported"), None);
    }

    #[test]
    fn decodes_payables_status_changed() {
        let event = WebhookEvent::from_envelope(&envelope(
            "payment-payables.status-changed",
            json!({
                "workerId": "991",
                "externalWorkerId": "W1",
                "paymentId": 5,
                "earningDate": "2024-05-06",
                "payableExternalIds": ["pay-1", "pay-2"],
                "paymentStatus": "ERROR",
                "paymentErrorMessage": "account closed"
            }),
        ))
        .unwrap();
        let WebhookEvent::PayablesStatusChanged(changed) = event else {
            panic!("unexpected event {event:?}");
        };
        assert_eq!(changed.worker.worker_id, "991");
        assert_eq!(changed.payable_external_ids, ["pay-1", "pay-2"]);
        assert_eq!(changed.payment_status, PayablesPaymentStatus::Error);
        assert_eq!(changed.payment_error_message.as_deref(), Some("account closed"));
    }

    #[test]
    fn decodes_tin_verification() {
        let event = WebhookEvent::from_envelope(&envelope(
            "worker.tin-verification-status-changed",
            json!({"workerId": "991", "externalWorkerId": "W1", "tinVerificationStatus": "VERIFICATION_FAILED"}),
        ))
        .unwrap();
        assert_eq!(
            event,
            WebhookEvent::TinVerificationChanged(TinVerificationChanged {
                worker: WorkerIds {
                    worker_id: "991".into(),
                    external_worker_id: Some("W1".into()),
                },
                tin_verification_status: TinVerification::Failed,
            })
        );
    }

    #[test]
    fn unknown_types_fall_back() {
        let event =
            WebhookEvent::from_envelope(&envelope("worker.teleported", json!({"x": 1}))).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Unrecognized {
                event_type: "worker.teleported".into()
            }
        );
        assert_eq!(event.event_type(), None);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let result =
            WebhookEvent::from_envelope(&envelope("payment.paid", json!({"workerId": "991"})));
        assert!(result.is_err());
    }
}
