//! Pure lifecycle machines.
//!
//! Each lifecycle-bearing record (shift, payable, worker) carries a small
//! state machine. Decisions are pure: [`Machine::decide`] answers "where
//! would this action lead?" without touching state, I/O or the clock. The
//! concrete lifecycle types then apply an accepted decision and stamp the
//! audit fields that go with it.
//!
//! Status fields are only written by the owning machine, so a status can never
//! change without passing through `decide` first.

use std::fmt;
use thiserror::Error;

/// An action was refused by a lifecycle machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} from {from}: {reason}")]
pub struct TransitionError {
    pub from: &'static str,
    pub action: &'static str,
    pub reason: &'static str,
}

impl TransitionError {
    pub const fn new(from: &'static str, action: &'static str, reason: &'static str) -> Self {
        Self {
            from,
            action,
            reason,
        }
    }
}

/// A record lifecycle with a status and guarded transitions.
pub trait Machine {
    type Status: Copy + PartialEq + fmt::Debug;
    type Action: fmt::Debug;

    fn status(&self) -> Self::Status;

    /// The status `action` would lead to, or why it is refused.
    fn decide(&self, action: &Self::Action) -> Result<Self::Status, TransitionError>;

    /// Whether no further status change is possible.
    fn is_terminal(&self) -> bool;
}
