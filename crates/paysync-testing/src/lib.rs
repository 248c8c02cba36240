//! Test support for paysync: in-memory stores and queue, a scriptable fake
//! provider and a harness wiring them into an [`Engine`](paysync_core::Engine).

pub mod harness;
pub mod provider;
pub mod queue;
pub mod store;

pub use harness::{
    envelope, new_worker, onboarding_completed, payables_status_changed, Harness, SignedDelivery,
    SIGNING_KEY,
};
pub use provider::{timeout, unavailable, FakeProvider, Operation};
pub use queue::{EntryStatus, InMemoryQueue, QueueEntry};
pub use store::InMemoryStore;
