//! # Paysync
//!
//! Keeps local payroll records and a payroll provider consistent.
//!
//! Local records are created first and then mirrored to the provider under a
//! stable idempotency key, so a retry after a crash or timeout never creates a
//! second provider resource. Provider-side changes come back through signed
//! webhooks, which are queued durably, deduplicated by event id and applied
//! through the same lifecycle machines that guard local changes.
//!
//! ## Data flow
//!
//! ```text
//!  caller ──▶ WorkerService / ShiftService / PayableService
//!                         │ Machine::decide guards every transition
//!                         ▼
//!                   Synchronizer<F> ──persist draft──▶ RecordStore<F>
//!                         │                                 ▲
//!                         ▼ create(key) / update / delete   │ project
//!                  ProviderGateway<F> ─────────────────────┘
//!
//!  provider ──webhook──▶ WebhookIntake ──▶ EventQueue ──▶ WebhookProcessor
//!                                                            │
//!                                   ProcessedEventStore ◀── WebhookDispatcher
//!                                                            │
//!                                                  PayrollEventHandler
//!
//!  operator ──▶ Reconciler<F> ── provider get ──▶ project or materialize
//! ```
//!
//! ## Invariants
//!
//! 1. A record's external id never changes, and at most one local record
//!    exists per family and external id.
//! 2. A record is persisted before the provider is called.
//! 3. Only the synchronizer and reconciler write sync state and projections.
//! 4. Every status change goes through the family's [`Machine`].
//! 5. A webhook event's handler runs at most once per successful delivery.

pub mod context;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod lifecycle;
pub mod money;
pub mod payable;
pub mod reconcile;
pub mod record;
pub mod settings;
pub mod shift;
pub mod store;
pub mod sync;
pub mod webhook;
pub mod work_location;
pub mod worker;

pub use context::{Gateways, Stores, SyncContext};
pub use engine::Engine;
pub use error::{ErrorKind, Result, SyncError};
pub use gateway::{DeleteOptions, PayoutGateway, PayoutRequest, PayoutResponse, ProviderError, ProviderGateway};
pub use ids::{EventId, ExternalId, KeySource, LocalId, ProviderId, ResourceFamily};
pub use lifecycle::{Machine, TransitionError};
pub use money::{Currency, Money};
pub use reconcile::{ReconcileOutcome, Reconciler, Reconciliation, ResourceKey, SweepReport};
pub use record::{Record, Resource, SyncState};
pub use settings::{RetryPolicy, SyncSettings};
pub use store::{
    ClaimedEvent, DeadLetter, Enqueued, EventQueue, FailureKind, Inserted, ProcessedEventStore,
    QueueStats, RecordStore,
};
pub use sync::{SyncFamily, Synchronizer, Synchronizers};

pub use async_trait::async_trait;
