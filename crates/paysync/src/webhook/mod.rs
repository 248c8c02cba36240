//! Provider webhooks.
//!
//! ```text
//! POST ──▶ WebhookIntake ──verify──▶ EventQueue ──▶ WebhookProcessor
//!             │ 401 / 400              (durable)          │
//!             ▼                                           ▼
//!         {"received": true}                      WebhookDispatcher
//!                                                  │ dedup by event id
//!                                                  ▼
//!                                          PayrollEventHandler
//! ```

mod dispatch;
mod event;
mod handlers;
mod intake;
mod processor;
mod verify;

pub use dispatch::{Dispatch, EventHandler, WebhookDispatcher};
pub use event::{
    DepositReturned, EventData, EventType, OnboardingLocked, PayablesPaymentStatus,
    PayablesStatusChanged, PaymentMethodUpdated, PaymentPaid, TinVerificationChanged,
    WebhookEnvelope, WebhookEvent, WorkerIds,
};
pub use handlers::PayrollEventHandler;
pub use intake::{Acknowledgement, WebhookIntake, WebhookRequest};
pub use processor::{failure_kind, BatchOutcome, WebhookProcessor};
pub use verify::{check_freshness, VerifyError, WebhookVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
