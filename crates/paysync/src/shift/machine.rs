//! Shift lifecycle.
//!
//! ```text
//! Draft ──submit──▶ Submitted ──approve──▶ Approved ──process──▶ Processed
//!                       │
//!                       └──reject(reason)──▶ Rejected
//! ```
//!
//! Orthogonal to the status, a shift's pay period can be finalized. From then
//! on the shift is frozen: edits and deletes are refused and any change must
//! be filed as a correction shift that references it.

use crate::lifecycle::{Machine, TransitionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Processed,
}

impl ShiftStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Processed => "processed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShiftAction {
    Submit,
    Approve { by: String },
    Reject { by: String, reason: String },
    Process,
    FinalizePayPeriod,
    Edit,
    Delete,
}

impl ShiftAction {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Process => "process",
            Self::FinalizePayPeriod => "finalize pay period",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftLifecycle {
    status: ShiftStatus,
    submitted_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<String>,
    rejected_at: Option<DateTime<Utc>>,
    rejected_by: Option<String>,
    rejection_reason: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    pay_period_finalized: bool,
    finalized_at: Option<DateTime<Utc>>,
}

impl Default for ShiftLifecycle {
    fn default() -> Self {
        Self {
            status: ShiftStatus::Draft,
            submitted_at: None,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            rejected_by: None,
            rejection_reason: None,
            processed_at: None,
            pay_period_finalized: false,
            finalized_at: None,
        }
    }
}

impl ShiftLifecycle {
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn approved_by(&self) -> Option<&str> {
        self.approved_by.as_deref()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn is_pay_period_finalized(&self) -> bool {
        self.pay_period_finalized
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    fn refuse(&self, action: &ShiftAction, reason: &'static str) -> TransitionError {
        TransitionError::new(self.status.as_str(), action.name(), reason)
    }

    /// Decide and apply `action`, stamping the matching audit fields.
    pub(crate) fn apply(
        &mut self,
        action: ShiftAction,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let next = self.decide(&action)?;
        match action {
            ShiftAction::Submit => self.submitted_at = Some(now),
            ShiftAction::Approve { by } => {
                self.approved_at = Some(now);
                self.approved_by = Some(by);
            }
            ShiftAction::Reject { by, reason } => {
                self.rejected_at = Some(now);
                self.rejected_by = Some(by);
                self.rejection_reason = Some(reason);
            }
            ShiftAction::Process => self.processed_at = Some(now),
            ShiftAction::FinalizePayPeriod => {
                if !self.pay_period_finalized {
                    self.pay_period_finalized = true;
                    self.finalized_at = Some(now);
                }
            }
            ShiftAction::Edit | ShiftAction::Delete => {}
        }
        self.status = next;
        Ok(())
    }
}

impl Machine for ShiftLifecycle {
    type Status = ShiftStatus;
    type Action = ShiftAction;

    fn status(&self) -> ShiftStatus {
        self.status
    }

    fn decide(&self, action: &ShiftAction) -> Result<ShiftStatus, TransitionError> {
        use ShiftStatus::*;

        match (action, self.status) {
            (ShiftAction::Edit | ShiftAction::Delete, _) if self.pay_period_finalized => Err(
                self.refuse(action, "pay period is finalized, file a correction instead"),
            ),
            (ShiftAction::Edit | ShiftAction::Delete, status) => Ok(status),

            (ShiftAction::Submit, Draft) => Ok(Submitted),
            (ShiftAction::Submit, _) => Err(self.refuse(action, "only drafts can be submitted")),

            (ShiftAction::Approve { .. }, Submitted) => Ok(Approved),
            (ShiftAction::Approve { .. }, _) => {
                Err(self.refuse(action, "only submitted shifts can be approved"))
            }

            (ShiftAction::Reject { reason, .. }, Submitted) => {
                if reason.trim().is_empty() {
                    Err(self.refuse(action, "a rejection reason is required"))
                } else {
                    Ok(Rejected)
                }
            }
            (ShiftAction::Reject { .. }, _) => {
                Err(self.refuse(action, "only submitted shifts can be rejected"))
            }

            (ShiftAction::Process, Approved) => Ok(Processed),
            (ShiftAction::Process, _) => {
                Err(self.refuse(action, "only approved shifts can be processed"))
            }

            (ShiftAction::FinalizePayPeriod, Draft) => {
                Err(self.refuse(action, "draft shifts were never reported"))
            }
            (ShiftAction::FinalizePayPeriod, status) => Ok(status),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.status, ShiftStatus::Rejected | ShiftStatus::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitted() -> ShiftLifecycle {
        let mut shift = ShiftLifecycle::default();
        shift.apply(ShiftAction::Submit, Utc::now()).unwrap();
        shift
    }

    #[test]
    fn happy_path_reaches_processed() {
        let mut shift = submitted();
        shift
            .apply(ShiftAction::Approve { by: "lead-7".into() }, Utc::now())
            .unwrap();
        assert_eq!(shift.approved_by(), Some("lead-7"));
        shift.apply(ShiftAction::Process, Utc::now()).unwrap();
        assert_eq!(shift.status(), ShiftStatus::Processed);
        assert!(shift.is_terminal());
    }

    #[test]
    fn rejection_requires_reason() {
        let shift = submitted();
        let refused = shift.decide(&ShiftAction::Reject {
            by: "lead-7".into(),
            reason: "  ".into(),
        });
        assert!(refused.is_err());
        let accepted = shift.decide(&ShiftAction::Reject {
            by: "lead-7".into(),
            reason: "clocked in from home".into(),
        });
        assert_eq!(accepted, Ok(ShiftStatus::Rejected));
    }

    #[test]
    fn approval_only_from_submitted() {
        let draft = ShiftLifecycle::default();
        let err = draft
            .decide(&ShiftAction::Approve { by: "lead".into() })
            .unwrap_err();
        assert_eq!(err.from, "draft");
        assert_eq!(err.action, "approve");
    }

    #[test]
    fn finalized_pay_period_freezes_the_shift() {
        let mut shift = submitted();
        assert!(shift.decide(&ShiftAction::Edit).is_ok());
        shift.apply(ShiftAction::FinalizePayPeriod, Utc::now()).unwrap();
        assert!(shift.is_pay_period_finalized());
        assert!(shift.decide(&ShiftAction::Edit).is_err());
        assert!(shift.decide(&ShiftAction::Delete).is_err());
        // Status changes reported by the provider still apply.
        assert_eq!(
            shift.decide(&ShiftAction::Approve { by: "lead".into() }),
            Ok(ShiftStatus::Approved)
        );
    }

    #[test]
    fn finalizing_twice_keeps_first_timestamp() {
        let mut shift = submitted();
        shift.apply(ShiftAction::FinalizePayPeriod, Utc::now()).unwrap();
        let first = shift.finalized_at();
        shift.apply(ShiftAction::FinalizePayPeriod, Utc::now()).unwrap();
        assert_eq!(shift.finalized_at(), first);
    }

    #[test]
    fn drafts_cannot_be_finalized() {
        assert!(ShiftLifecycle::default()
            .decide(&ShiftAction::FinalizePayPeriod)
            .is_err());
    }
}
