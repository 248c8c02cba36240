//! Shifts: worked time reported to the provider for payroll.

mod machine;
mod service;

pub use machine::{ShiftAction, ShiftLifecycle, ShiftStatus};
pub use service::{NewCorrection, NewShift, ShiftService};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::gateway::ProviderGateway;
use crate::ids::{ExternalId, LocalId, ProviderId, ResourceFamily};
use crate::lifecycle::Machine;
use crate::money::Money;
use crate::record::{Record, Resource};
use crate::store::RecordStore;
use crate::sync::{SyncFamily, Synchronizer, Synchronizers};
use crate::work_location::{provider_external_id, LocationRef};
use crate::worker::WorkerRef;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Closed interval of worked time, `end >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(SyncError::validation(
                "time_window",
                format!("end {end} is before start {start}"),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftBreak {
    pub window: TimeWindow,
    pub paid: bool,
}

/// The editable part of a shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDetails {
    pub window: TimeWindow,
    pub breaks: Vec<ShiftBreak>,
    pub hourly_rate: Option<Money>,
    pub workers_comp_class_code: Option<String>,
    pub note: Option<String>,
}

impl ShiftDetails {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            breaks: Vec::new(),
            hourly_rate: None,
            workers_comp_class_code: None,
            note: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(rate) = &self.hourly_rate {
            if !rate.is_positive() {
                return Err(SyncError::validation(
                    "hourly_rate",
                    format!("{rate} is not a positive rate"),
                ));
            }
        }
        if let Some(outside) = self.breaks.iter().find(|b| !self.window.contains(&b.window)) {
            return Err(SyncError::validation(
                "breaks",
                format!(
                    "break {}..{} lies outside the shift",
                    outside.window.start, outside.window.end
                ),
            ));
        }
        Ok(())
    }
}

/// When the provider pays out a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionTimeframe {
    NextPayrollPayment,
    Immediately,
    ExternallyPaid,
}

/// Marks a shift as a correction of a finalized one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub original_shift_id: LocalId,
    pub original_provider_id: Option<ProviderId>,
    /// Recorded as given at creation; unauthorized corrections are refused.
    pub correction_authorized: bool,
    pub notes: String,
    pub timeframe: CorrectionTimeframe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftFields {
    worker: WorkerRef,
    work_location: Option<LocationRef>,
    details: ShiftDetails,
    correction: Option<Correction>,
    #[serde(default)]
    lifecycle: ShiftLifecycle,
}

impl ShiftFields {
    pub fn worker(&self) -> &WorkerRef {
        &self.worker
    }

    pub fn work_location(&self) -> Option<&LocationRef> {
        self.work_location.as_ref()
    }

    pub fn details(&self) -> &ShiftDetails {
        &self.details
    }

    pub fn correction(&self) -> Option<&Correction> {
        self.correction.as_ref()
    }

    pub fn is_correction(&self) -> bool {
        self.correction.is_some()
    }

    pub fn lifecycle(&self) -> &ShiftLifecycle {
        &self.lifecycle
    }

    pub fn status(&self) -> ShiftStatus {
        self.lifecycle.status()
    }
}

/// Hours and pay the provider classified for a shift.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftProjection {
    pub legal_work_time_zone: Option<String>,
    pub verified_at: Option<String>,
    pub effective_pay_rate: Option<Money>,
    pub pay_rate_overridden: bool,
    pub total_payable: Option<Money>,
    pub paid: bool,
    pub durations: Option<ShiftDurations>,
}

impl Resource for ShiftFields {
    const FAMILY: ResourceFamily = ResourceFamily::Shift;
    type Projection = ShiftProjection;
}

pub type Shift = Record<ShiftFields>;

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakRequest {
    pub break_start_epoch_seconds: i64,
    pub break_end_epoch_seconds: i64,
    pub paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShiftRequest {
    /// Sent as a query flag, required for corrections in finalized periods.
    #[serde(skip)]
    pub correction_authorized: bool,
    pub external_id: String,
    pub external_worker_id: String,
    pub shift_start_epoch_seconds: i64,
    pub shift_end_epoch_seconds: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub create_breaks: Vec<BreakRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_hourly_pay_rate: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_location_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers_comp_class_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction_payment_timeframe: Option<CorrectionTimeframe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShiftRequest {
    pub shift_start_epoch_seconds: i64,
    pub shift_end_epoch_seconds: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub create_breaks: Vec<BreakRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_hourly_pay_rate: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers_comp_class_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunchTime {
    pub effective_punch_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedTime {
    /// ISO-8601 duration, e.g. `PT8H`.
    pub total_duration: String,
    pub total_payable_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftDurations {
    pub shift_duration: String,
    pub paid_break_duration: String,
    pub unpaid_break_duration: String,
    pub regular_time_worked: ClassifiedTime,
    pub overtime_worked: ClassifiedTime,
    pub double_time_worked: ClassifiedTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayableDetails {
    pub total_payable_amount: Money,
    #[serde(default)]
    pub paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftResponse {
    pub worked_shift_id: i64,
    pub worker_id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub shift_start_at: Option<PunchTime>,
    #[serde(default)]
    pub shift_end_at: Option<PunchTime>,
    #[serde(default)]
    pub legal_work_time_zone: Option<String>,
    #[serde(default)]
    pub verified_at: Option<String>,
    #[serde(default)]
    pub effective_pay_rate: Option<Money>,
    #[serde(default)]
    pub pay_rate_overridden: bool,
    #[serde(default)]
    pub payable_details: Option<PayableDetails>,
    #[serde(default)]
    pub shift_durations: Option<ShiftDurations>,
}

fn break_requests(details: &ShiftDetails) -> Vec<BreakRequest> {
    details
        .breaks
        .iter()
        .map(|b| BreakRequest {
            break_start_epoch_seconds: b.window.start.timestamp(),
            break_end_epoch_seconds: b.window.end.timestamp(),
            paid: b.paid,
        })
        .collect()
}

#[async_trait]
impl SyncFamily for ShiftFields {
    type CreateRequest = CreateShiftRequest;
    type UpdateRequest = UpdateShiftRequest;
    type Response = ShiftResponse;

    fn store(ctx: &SyncContext) -> &Arc<dyn RecordStore<Self>> {
        &ctx.stores.shifts
    }

    fn gateway(ctx: &SyncContext) -> &Arc<dyn ProviderGateway<Self>> {
        &ctx.gateways.shifts
    }

    fn synchronizer(all: &Synchronizers) -> &Synchronizer<Self> {
        &all.shifts
    }

    fn create_request(record: &Record<Self>) -> CreateShiftRequest {
        let body = record.body();
        let details = &body.details;
        CreateShiftRequest {
            correction_authorized: body
                .correction
                .as_ref()
                .is_some_and(|correction| correction.correction_authorized),
            external_id: record.external_id().to_string(),
            external_worker_id: body.worker.external_id.to_string(),
            shift_start_epoch_seconds: details.window.start.timestamp(),
            shift_end_epoch_seconds: details.window.end.timestamp(),
            create_breaks: break_requests(details),
            effective_hourly_pay_rate: details.hourly_rate,
            work_location_id: body
                .work_location
                .as_ref()
                .and_then(|location| location.provider_id.as_str().parse().ok()),
            workers_comp_class_code: details.workers_comp_class_code.clone(),
            correction_payment_timeframe: body.correction.as_ref().map(|c| c.timeframe),
            note: match &body.correction {
                Some(correction) => Some(correction.notes.clone()),
                None => details.note.clone(),
            },
        }
    }

    fn update_request(record: &Record<Self>) -> Option<UpdateShiftRequest> {
        let details = &record.body().details;
        Some(UpdateShiftRequest {
            shift_start_epoch_seconds: details.window.start.timestamp(),
            shift_end_epoch_seconds: details.window.end.timestamp(),
            create_breaks: break_requests(details),
            effective_hourly_pay_rate: details.hourly_rate,
            workers_comp_class_code: details.workers_comp_class_code.clone(),
            note: details.note.clone(),
        })
    }

    fn provider_id(response: &ShiftResponse) -> ProviderId {
        ProviderId::new(response.worked_shift_id.to_string())
    }

    fn merge_projection(projection: &mut ShiftProjection, response: &ShiftResponse) {
        projection.legal_work_time_zone = response.legal_work_time_zone.clone();
        projection.verified_at = response.verified_at.clone();
        projection.effective_pay_rate = response.effective_pay_rate;
        projection.pay_rate_overridden = response.pay_rate_overridden;
        if let Some(payable) = &response.payable_details {
            projection.total_payable = Some(payable.total_payable_amount);
            projection.paid = payable.paid;
        }
        if response.shift_durations.is_some() {
            projection.durations = response.shift_durations.clone();
        }
    }

    fn observe(record: &mut Record<Self>, response: &ShiftResponse, now: DateTime<Utc>) {
        let external_id = record.external_id().clone();
        let lifecycle = &mut record.body_mut().lifecycle;

        let mut actions = Vec::new();
        if lifecycle.status() == ShiftStatus::Draft {
            actions.push(ShiftAction::Submit);
        }
        if response.verified_at.is_some()
            && matches!(lifecycle.status(), ShiftStatus::Draft | ShiftStatus::Submitted)
        {
            actions.push(ShiftAction::Approve {
                by: "provider".to_string(),
            });
        }
        let paid = response.payable_details.as_ref().is_some_and(|p| p.paid);
        if paid && lifecycle.status() != ShiftStatus::Processed {
            actions.push(ShiftAction::Process);
        }

        for action in actions {
            let before = lifecycle.status();
            match lifecycle.apply(action, now) {
                Ok(()) => info!(
                    external_id = %external_id,
                    from = before.as_str(),
                    to = lifecycle.status().as_str(),
                    "Shift status advanced from provider state"
                ),
                Err(err) => warn!(
                    external_id = %external_id,
                    error = %err,
                    "Provider shift state does not fit local lifecycle, keeping local status"
                ),
            }
        }
    }

    async fn materialize(ctx: &SyncContext, response: &ShiftResponse) -> Result<(ExternalId, Self)> {
        let worker = ctx
            .stores
            .workers
            .find_by_provider_id(&ProviderId::new(response.worker_id.clone()))
            .await?
            .ok_or_else(|| SyncError::not_found(ResourceFamily::Worker, &response.worker_id))?;
        let (Some(start), Some(end)) = (&response.shift_start_at, &response.shift_end_at) else {
            return Err(SyncError::validation(
                "shift",
                format!("provider shift {} has no punch times", response.worked_shift_id),
            ));
        };
        let external_id = provider_external_id(
            ResourceFamily::Shift,
            response.external_id.as_deref(),
            &response.worked_shift_id.to_string(),
        );
        let mut details = ShiftDetails::new(TimeWindow::new(
            start.effective_punch_at,
            end.effective_punch_at,
        )?);
        details.hourly_rate = response.effective_pay_rate;
        let body = ShiftFields {
            worker: WorkerRef {
                local_id: worker.local_id(),
                external_id: worker.external_id().clone(),
            },
            work_location: None,
            details,
            correction: None,
            lifecycle: ShiftLifecycle::default(),
        };
        Ok((external_id, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, hour, 0, 0).unwrap()
    }

    #[test]
    fn window_rejects_inverted_ranges() {
        assert!(TimeWindow::new(at(9), at(17)).is_ok());
        assert!(TimeWindow::new(at(9), at(9)).is_ok());
        assert!(TimeWindow::new(at(17), at(9)).is_err());
        assert_eq!(
            TimeWindow::new(at(9), at(17)).unwrap().duration(),
            Duration::hours(8)
        );
    }

    #[test]
    fn breaks_must_fall_inside_the_shift() {
        let mut details = ShiftDetails::new(TimeWindow::new(at(9), at(17)).unwrap());
        details.breaks.push(ShiftBreak {
            window: TimeWindow::new(at(12), at(13)).unwrap(),
            paid: false,
        });
        assert!(details.validate().is_ok());
        details.breaks.push(ShiftBreak {
            window: TimeWindow::new(at(17), at(18)).unwrap(),
            paid: false,
        });
        assert!(details.validate().is_err());
    }

    #[test]
    fn rates_must_be_positive() {
        let mut details = ShiftDetails::new(TimeWindow::new(at(9), at(17)).unwrap());
        details.hourly_rate = Some(Money::usd(Decimal::ZERO));
        assert!(details.validate().is_err());
    }

    #[test]
    fn response_parses_provider_shape() {
        let response: ShiftResponse = serde_json::from_value(serde_json::json!({
            "workerId": "w-9",
            "workedShiftId": 1234,
            "legalWorkTimeZone": "America/Chicago",
            "shiftStartAt": {"effectivePunchAt": "2024-05-06T09:00:00Z"},
            "shiftEndAt": {"effectivePunchAt": "2024-05-06T17:00:00Z"},
            "effectivePayRate": {"amount": "22.50", "currency": "USD"},
            "payRateOverridden": false,
            "payableDetails": {"totalPayableAmount": {"amount": "180.00", "currency": "USD"}, "paid": false}
        }))
        .unwrap();
        assert_eq!(ShiftFields::provider_id(&response).as_str(), "1234");
        let mut projection = ShiftProjection::default();
        ShiftFields::merge_projection(&mut projection, &response);
        assert_eq!(
            projection.total_payable,
            Some(Money::usd(Decimal::new(18000, 2)))
        );
        assert!(!projection.paid);
    }

    #[test]
    fn correction_request_carries_the_recorded_authorization() {
        let body = ShiftFields {
            worker: WorkerRef {
                local_id: LocalId::new(),
                external_id: ExternalId::parse("W1").unwrap(),
            },
            work_location: None,
            details: ShiftDetails::new(TimeWindow::new(at(9), at(18)).unwrap()),
            correction: Some(Correction {
                original_shift_id: LocalId::new(),
                original_provider_id: Some(ProviderId::new("1234")),
                correction_authorized: true,
                notes: "Late clock-out".into(),
                timeframe: CorrectionTimeframe::Immediately,
            }),
            lifecycle: ShiftLifecycle::default(),
        };
        let record = Record::new(ExternalId::parse("shift-fix").unwrap(), body, Utc::now()).unwrap();

        let request = ShiftFields::create_request(&record);
        assert!(request.correction_authorized);
        assert_eq!(request.note.as_deref(), Some("Late clock-out"));
        assert_eq!(
            request.correction_payment_timeframe,
            Some(CorrectionTimeframe::Immediately)
        );

        let stored = serde_json::to_value(record.body()).unwrap();
        assert_eq!(stored["correction"]["correction_authorized"], true);
    }

    #[test]
    fn correction_timeframe_uses_provider_names() {
        let json = serde_json::to_value(CorrectionTimeframe::NextPayrollPayment).unwrap();
        assert_eq!(json, "NEXT_PAYROLL_PAYMENT");
    }
}
