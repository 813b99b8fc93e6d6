//! Per-day attendance classification.
//!
//! Rules, first match wins:
//! 1. approved full-day leave → `OnLeave`
//! 2. rest-day holiday without punches → `Normal`, 0 minutes
//! 3. no policy → `Abnormal` (unconfigured)
//! 4. punches against the policy thresholds → `Absent` / `Late` /
//!    `EarlyLeave` / `Abnormal` (both) / `Normal` (or `Makeup`, `OutsideWork`
//!    by punch source)
//!
//! Thresholds are inclusive: a punch exactly on the cutoff is on time.

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::engine::holiday_calendar::HolidayLookup;
use crate::engine::resolver::Resolution;
use crate::model::attendance::{Anomaly, AttendanceStatus, DailyAttendanceRecord};
use crate::model::clock_event::{ClockEvent, ClockKind, ClockSource};
use crate::model::leave_request::LeaveInfo;
use crate::model::policy::WorkTimePolicy;

/// Everything the classifier looks at for one (employee, day).
#[derive(Debug, Clone, Copy)]
pub struct ClassifyInput<'a> {
    pub employee_id: u64,
    pub date: NaiveDate,
    pub resolution: Option<&'a Resolution>,
    pub holiday: HolidayLookup,
    pub leave: Option<&'a LeaveInfo>,
    pub events: &'a [ClockEvent],
}

pub fn classify(input: &ClassifyInput<'_>) -> DailyAttendanceRecord {
    let day_events: Vec<&ClockEvent> = input
        .events
        .iter()
        .filter(|e| e.employee_id == input.employee_id && e.timestamp.date() == input.date)
        .collect();

    let first_in = day_events
        .iter()
        .filter(|e| e.kind == ClockKind::ClockIn)
        .min_by_key(|e| e.timestamp)
        .copied();
    let last_out = day_events
        .iter()
        .filter(|e| e.kind == ClockKind::ClockOut)
        .max_by_key(|e| e.timestamp)
        .copied();

    let mut record = DailyAttendanceRecord {
        employee_id: input.employee_id,
        date: input.date,
        status: AttendanceStatus::Absent,
        worked_minutes: 0,
        first_clock_in: first_in.map(|e| e.timestamp),
        last_clock_out: last_out.map(|e| e.timestamp),
        policy_id_used: input.resolution.map(|r| r.policy.id),
        holiday_type: input.holiday.holiday_type,
        anomalies: Vec::new(),
    };

    if input.holiday.degraded {
        record.anomalies.push(Anomaly::HolidayDataDegraded);
    }
    if let Some(conflict) = input.resolution.and_then(|r| r.conflict.as_ref()) {
        record.anomalies.push(Anomaly::PolicyConflict {
            chosen_assignment: conflict.chosen,
        });
    }

    if input.leave.is_some_and(|l| l.covers_full_day(input.date)) {
        record.status = AttendanceStatus::OnLeave;
        return record;
    }

    let rest_day = input.holiday.is_rest_day();
    if rest_day && day_events.is_empty() {
        record.status = AttendanceStatus::Normal;
        return record;
    }

    let Some(resolution) = input.resolution else {
        record.status = AttendanceStatus::Abnormal;
        record.anomalies.push(Anomaly::Unconfigured);
        return record;
    };
    let policy = &resolution.policy;

    let (clock_in, clock_out) = match (first_in, last_out) {
        (None, None) => {
            record.status = AttendanceStatus::Absent;
            return record;
        }
        (Some(_), None) => {
            record.status = rest_or(rest_day, AttendanceStatus::Abnormal);
            record.anomalies.push(Anomaly::MissingClockOut);
            return record;
        }
        (None, Some(_)) => {
            record.status = rest_or(rest_day, AttendanceStatus::Abnormal);
            record.anomalies.push(Anomaly::MissingClockIn);
            return record;
        }
        (Some(i), Some(o)) => (i, o),
    };

    if clock_out.timestamp < clock_in.timestamp {
        record.status = rest_or(rest_day, AttendanceStatus::Abnormal);
        record.anomalies.push(Anomaly::ClockOutBeforeClockIn);
        return record;
    }

    record.worked_minutes = worked_minutes(policy, clock_in.timestamp, clock_out.timestamp);

    // Work on a day off is never late or early.
    if rest_day {
        record.status = AttendanceStatus::Normal;
        return record;
    }

    let late = minutes_late(policy, clock_in.timestamp);
    let early = minutes_early(policy, clock_out.timestamp);
    if let Some(minutes) = late {
        record.anomalies.push(Anomaly::LateArrival { minutes });
    }
    if let Some(minutes) = early {
        record.anomalies.push(Anomaly::EarlyDeparture { minutes });
    }

    record.status = match (late, early) {
        (Some(_), Some(_)) => AttendanceStatus::Abnormal,
        (Some(_), None) => AttendanceStatus::Late,
        (None, Some(_)) => AttendanceStatus::EarlyLeave,
        (None, None) => status_by_source(&[clock_in, clock_out]),
    };

    if matches!(
        record.status,
        AttendanceStatus::Normal | AttendanceStatus::Makeup | AttendanceStatus::OutsideWork
    ) && record.worked_minutes < policy.min_work_minutes
    {
        record.anomalies.push(Anomaly::ShortDay {
            minutes: record.worked_minutes,
        });
    }

    record
}

fn rest_or(rest_day: bool, status: AttendanceStatus) -> AttendanceStatus {
    if rest_day { AttendanceStatus::Normal } else { status }
}

fn status_by_source(counted: &[&ClockEvent]) -> AttendanceStatus {
    if counted.iter().any(|e| e.source == ClockSource::Makeup) {
        AttendanceStatus::Makeup
    } else if counted.iter().any(|e| e.source == ClockSource::OutsideWork) {
        AttendanceStatus::OutsideWork
    } else {
        AttendanceStatus::Normal
    }
}

fn seconds_of_day(at: NaiveDateTime) -> i64 {
    i64::from(at.time().num_seconds_from_midnight())
}

fn whole_minutes(seconds: i64) -> u32 {
    u32::try_from(seconds.max(0) / 60).unwrap_or(u32::MAX)
}

// Partial minutes past the cutoff round up, so 09:30:01 is one minute late.
fn minutes_over(seconds: i64) -> u32 {
    u32::try_from((seconds + 59) / 60).unwrap_or(u32::MAX)
}

/// Minutes past the late cutoff, `None` when on time.
pub fn minutes_late(policy: &WorkTimePolicy, clock_in: NaiveDateTime) -> Option<u32> {
    let cutoff = i64::from(policy.latest_clock_in.num_seconds_from_midnight())
        + policy.flexible_seconds();
    let over = seconds_of_day(clock_in) - cutoff;
    (over > 0).then(|| minutes_over(over))
}

/// Minutes before the early-leave cutoff, `None` when on time.
pub fn minutes_early(policy: &WorkTimePolicy, clock_out: NaiveDateTime) -> Option<u32> {
    let cutoff = i64::from(policy.earliest_clock_out.num_seconds_from_midnight())
        - policy.flexible_seconds();
    let short = cutoff - seconds_of_day(clock_out);
    (short > 0).then(|| minutes_over(short))
}

/// Minutes between the punches, less the part that falls inside the lunch window.
///
/// A shift that covers only part of the window loses only that part; the full
/// lunch duration is deducted only when the shift spans the whole window.
pub fn worked_minutes(policy: &WorkTimePolicy, clock_in: NaiveDateTime, clock_out: NaiveDateTime) -> u32 {
    let mut seconds = (clock_out - clock_in).num_seconds();

    if let Some((lunch_start, lunch_end)) = policy.lunch_window() {
        let lunch_start = clock_in.date().and_time(lunch_start);
        let lunch_end = clock_in.date().and_time(lunch_end);
        let overlap = (clock_out.min(lunch_end) - clock_in.max(lunch_start)).num_seconds();
        if overlap > 0 {
            seconds -= overlap;
        }
    }

    whole_minutes(seconds)
}
