//! Payable lifecycle.
//!
//! ```text
//! PendingApproval ──approve──▶ Approved ──submit──▶ Processing ──▶ Paid
//!        │                                              │  ▲
//!        └──reject(reason)──▶ Rejected                  ▼  │ resubmit
//!                                                      Failed
//! ```
//!
//! A paid payable, or one the provider has started processing, can no longer
//! be edited or deleted.

use crate::lifecycle::{Machine, TransitionError};
use crate::settings::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayableStatus {
    PendingApproval,
    Approved,
    Rejected,
    Processing,
    Paid,
    Failed,
}

impl PayableStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayableAction {
    Approve { by: String },
    Reject { by: String, reason: String },
    SubmitForPayout,
    MarkPaid,
    MarkFailed { reason: String },
    Resubmit,
    Edit,
    Delete,
}

impl PayableAction {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::SubmitForPayout => "submit for payout",
            Self::MarkPaid => "mark paid",
            Self::MarkFailed { .. } => "mark failed",
            Self::Resubmit => "resubmit",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayableLifecycle {
    status: PayableStatus,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<String>,
    rejected_at: Option<DateTime<Utc>>,
    rejected_by: Option<String>,
    rejection_reason: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    retry_count: u32,
    last_retry_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
}

impl Default for PayableLifecycle {
    fn default() -> Self {
        Self {
            status: PayableStatus::PendingApproval,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            rejected_by: None,
            rejection_reason: None,
            processed_at: None,
            paid_at: None,
            retry_count: 0,
            last_retry_at: None,
            failure_reason: None,
        }
    }
}

impl PayableLifecycle {
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

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_retry_at(&self) -> Option<DateTime<Utc>> {
        self.last_retry_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Whether edits and deletes are still allowed.
    pub fn is_mutable(&self) -> bool {
        self.status != PayableStatus::Paid && self.processed_at.is_none()
    }

    /// Earliest time a failed payout may be resubmitted under `policy`.
    pub fn next_retry_at(&self, policy: &RetryPolicy) -> Option<DateTime<Utc>> {
        if self.status != PayableStatus::Failed {
            return None;
        }
        policy.next_attempt_at(self.retry_count, self.last_retry_at)
    }

    fn refuse(&self, action: &PayableAction, reason: &'static str) -> TransitionError {
        TransitionError::new(self.status.as_str(), action.name(), reason)
    }

    pub(crate) fn apply(
        &mut self,
        action: PayableAction,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let next = self.decide(&action)?;
        match action {
            PayableAction::Approve { by } => {
                self.approved_at = Some(now);
                self.approved_by = Some(by);
            }
            PayableAction::Reject { by, reason } => {
                self.rejected_at = Some(now);
                self.rejected_by = Some(by);
                self.rejection_reason = Some(reason);
            }
            PayableAction::SubmitForPayout | PayableAction::Resubmit => {
                self.processed_at.get_or_insert(now);
            }
            PayableAction::MarkPaid => {
                self.paid_at = Some(now);
                self.failure_reason = None;
            }
            PayableAction::MarkFailed { reason } => {
                self.retry_count += 1;
                self.last_retry_at = Some(now);
                self.failure_reason = Some(reason);
            }
            PayableAction::Edit | PayableAction::Delete => {}
        }
        self.status = next;
        Ok(())
    }

    /// Walk forward to `Paid` from wherever the payable stands. The provider
    /// reports payment as a single fact; intermediate steps may have been
    /// missed. Returns whether anything changed.
    pub(crate) fn settle_paid(&mut self, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        let mut changed = false;
        loop {
            let step = match self.status {
                PayableStatus::Paid => return Ok(changed),
                PayableStatus::PendingApproval => PayableAction::Approve {
                    by: "provider".to_string(),
                },
                PayableStatus::Approved => PayableAction::SubmitForPayout,
                PayableStatus::Failed => PayableAction::Resubmit,
                PayableStatus::Processing => PayableAction::MarkPaid,
                PayableStatus::Rejected => {
                    return Err(self.refuse(&PayableAction::MarkPaid, "rejected payables are never paid"))
                }
            };
            self.apply(step, now)?;
            changed = true;
        }
    }

    /// Record a failed payout, moving through processing if needed.
    pub(crate) fn settle_failed(
        &mut self,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        if self.status == PayableStatus::Failed && self.failure_reason.as_deref() == Some(&reason) {
            return Ok(false);
        }
        if self.status == PayableStatus::Approved {
            self.apply(PayableAction::SubmitForPayout, now)?;
        }
        self.apply(PayableAction::MarkFailed { reason }, now)?;
        Ok(true)
    }
}

impl Machine for PayableLifecycle {
    type Status = PayableStatus;
    type Action = PayableAction;

    fn status(&self) -> PayableStatus {
        self.status
    }

    fn decide(&self, action: &PayableAction) -> Result<PayableStatus, TransitionError> {
        use PayableStatus::*;

        match (action, self.status) {
            (PayableAction::Edit | PayableAction::Delete, Paid) => {
                Err(self.refuse(action, "paid payables are immutable"))
            }
            (PayableAction::Edit | PayableAction::Delete, _) if self.processed_at.is_some() => {
                Err(self.refuse(action, "payable is already with the provider for payout"))
            }
            (PayableAction::Edit | PayableAction::Delete, status) => Ok(status),

            (PayableAction::Approve { .. }, PendingApproval) => Ok(Approved),
            (PayableAction::Approve { .. }, _) => {
                Err(self.refuse(action, "only pending payables can be approved"))
            }

            (PayableAction::Reject { reason, .. }, PendingApproval) => {
                if reason.trim().is_empty() {
                    Err(self.refuse(action, "a rejection reason is required"))
                } else {
                    Ok(Rejected)
                }
            }
            (PayableAction::Reject { .. }, _) => {
                Err(self.refuse(action, "only pending payables can be rejected"))
            }

            (PayableAction::SubmitForPayout, Approved) => Ok(Processing),
            (PayableAction::SubmitForPayout, _) => {
                Err(self.refuse(action, "only approved payables can be paid out"))
            }

            (PayableAction::MarkPaid, Processing) => Ok(Paid),
            (PayableAction::MarkPaid, _) => {
                Err(self.refuse(action, "payable is not being processed"))
            }

            (PayableAction::MarkFailed { .. }, Processing) => Ok(Failed),
            (PayableAction::MarkFailed { .. }, _) => {
                Err(self.refuse(action, "payable is not being processed"))
            }

            (PayableAction::Resubmit, Failed) => Ok(Processing),
            (PayableAction::Resubmit, _) => {
                Err(self.refuse(action, "only failed payables can be resubmitted"))
            }
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.status, PayableStatus::Paid | PayableStatus::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approved() -> PayableLifecycle {
        let mut payable = PayableLifecycle::default();
        payable
            .apply(PayableAction::Approve { by: "ops".into() }, Utc::now())
            .unwrap();
        payable
    }

    #[test]
    fn payout_path() {
        let mut payable = approved();
        payable.apply(PayableAction::SubmitForPayout, Utc::now()).unwrap();
        assert!(payable.processed_at().is_some());
        assert!(!payable.is_mutable());
        payable.apply(PayableAction::MarkPaid, Utc::now()).unwrap();
        assert_eq!(payable.status(), PayableStatus::Paid);
        assert!(payable.is_terminal());
    }

    #[test]
    fn paid_payables_refuse_edits_and_deletes() {
        let mut payable = approved();
        payable.settle_paid(Utc::now()).unwrap();
        for action in [PayableAction::Edit, PayableAction::Delete] {
            let err = payable.decide(&action).unwrap_err();
            assert_eq!(err.from, "paid");
        }
    }

    #[test]
    fn approval_and_rejection_only_from_pending() {
        let payable = approved();
        assert!(payable
            .decide(&PayableAction::Approve { by: "ops".into() })
            .is_err());
        assert!(payable
            .decide(&PayableAction::Reject {
                by: "ops".into(),
                reason: "duplicate".into()
            })
            .is_err());
    }

    #[test]
    fn failures_count_retries() {
        let mut payable = approved();
        payable.apply(PayableAction::SubmitForPayout, Utc::now()).unwrap();
        payable
            .apply(
                PayableAction::MarkFailed {
                    reason: "account closed".into(),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(payable.status(), PayableStatus::Failed);
        assert_eq!(payable.retry_count(), 1);
        assert_eq!(payable.failure_reason(), Some("account closed"));
        assert!(payable.last_retry_at().is_some());

        payable.apply(PayableAction::Resubmit, Utc::now()).unwrap();
        assert_eq!(payable.status(), PayableStatus::Processing);
    }

    #[test]
    fn settle_paid_walks_from_pending() {
        let mut payable = PayableLifecycle::default();
        assert_eq!(payable.settle_paid(Utc::now()), Ok(true));
        assert_eq!(payable.status(), PayableStatus::Paid);
        assert_eq!(payable.approved_by(), Some("provider"));
        assert_eq!(payable.settle_paid(Utc::now()), Ok(false));
    }

    #[test]
    fn settle_paid_refuses_rejected() {
        let mut payable = PayableLifecycle::default();
        payable
            .apply(
                PayableAction::Reject {
                    by: "ops".into(),
                    reason: "duplicate".into(),
                },
                Utc::now(),
            )
            .unwrap();
        assert!(payable.settle_paid(Utc::now()).is_err());
    }

    #[test]
    fn settle_failed_is_idempotent_per_reason() {
        let mut payable = approved();
        assert_eq!(payable.settle_failed("no account".into(), Utc::now()), Ok(true));
        assert_eq!(payable.settle_failed("no account".into(), Utc::now()), Ok(false));
        assert_eq!(payable.retry_count(), 1);
    }

    #[test]
    fn next_retry_respects_policy() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let mut payable = approved();
        assert_eq!(payable.next_retry_at(&policy), None);
        payable.settle_failed("bounced".into(), Utc::now()).unwrap();
        assert_eq!(payable.next_retry_at(&policy), None);

        let generous = RetryPolicy::default();
        let failed_at = payable.last_retry_at().unwrap();
        assert_eq!(
            payable.next_retry_at(&generous),
            Some(failed_at + generous.base_delay)
        );
    }
}
