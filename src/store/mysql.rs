//! MySQL-backed collaborators.
//!
//! Expected tables (all lifecycle stamps are maintained here, never by the
//! engine):
//!
//! ```sql
//! work_time_policy   (id, name, work_start, work_end, lunch_start, lunch_end,
//!                     enable_lunch_time, standard_work_minutes, min_work_minutes,
//!                     max_work_minutes, flexible_minutes, latest_clock_in,
//!                     earliest_clock_out, active, is_default)
//! policy_assignment  (id, employee_id, policy_id, effective_start, effective_end,
//!                     is_current, active, created_at, updated_at)
//! holiday            (id, date, holiday_type, year, month, day, name, active, updated_at)
//! clock_event        (id, employee_id, punched_at, kind, source)
//! leave_requests     (id, employee_id, start_date, end_date, leave_type, status, full_day)
//! employees          (id, status, ...)
//! attendance_daily   (employee_id, date, status, worked_minutes, first_clock_in,
//!                     last_clock_out, policy_id_used, holiday_type, anomalies,
//!                     updated_at, PRIMARY KEY (employee_id, date))
//! attendance_monthly (employee_id, year_month, ..., updated_at,
//!                     PRIMARY KEY (employee_id, year_month))
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use sqlx::{FromRow, MySqlPool};
use tracing::{debug, warn};

use crate::model::attendance::{AttendanceStatus, DailyAttendanceRecord};
use crate::model::clock_event::{ClockEvent, ClockKind, ClockSource};
use crate::model::holiday::{HolidayEntry, HolidayType};
use crate::model::leave_request::{LeaveInfo, LeaveType};
use crate::model::policy::{PolicyAssignment, WorkTimePolicy};
use crate::model::summary::{MonthlyAttendanceSummary, YearMonth};
use crate::store::{
    ClockEventStore, EmployeeDirectory, HolidayStore, LeaveStore, PolicyStore, StoreError,
    SummaryStore,
};

#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn decode<T: FromStr>(entity: &'static str, raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::Decode {
        entity,
        reason: format!("unknown value {raw:?}"),
    })
}

#[derive(FromRow)]
struct PolicyRow {
    id: u64,
    name: String,
    work_start: NaiveTime,
    work_end: NaiveTime,
    lunch_start: Option<NaiveTime>,
    lunch_end: Option<NaiveTime>,
    enable_lunch_time: bool,
    standard_work_minutes: u32,
    min_work_minutes: u32,
    max_work_minutes: u32,
    flexible_minutes: Option<u32>,
    latest_clock_in: NaiveTime,
    earliest_clock_out: NaiveTime,
    active: bool,
    is_default: bool,
}

impl From<PolicyRow> for WorkTimePolicy {
    fn from(row: PolicyRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            work_start: row.work_start,
            work_end: row.work_end,
            lunch_start: row.lunch_start,
            lunch_end: row.lunch_end,
            enable_lunch_time: row.enable_lunch_time,
            standard_work_minutes: row.standard_work_minutes,
            min_work_minutes: row.min_work_minutes,
            max_work_minutes: row.max_work_minutes,
            flexible_minutes: row.flexible_minutes,
            latest_clock_in: row.latest_clock_in,
            earliest_clock_out: row.earliest_clock_out,
            active: row.active,
            is_default: row.is_default,
        }
    }
}

const POLICY_COLUMNS: &str = r#"
    id, name, work_start, work_end, lunch_start, lunch_end, enable_lunch_time,
    standard_work_minutes, min_work_minutes, max_work_minutes, flexible_minutes,
    latest_clock_in, earliest_clock_out, active, is_default
"#;

#[derive(FromRow)]
struct AssignmentRow {
    id: u64,
    employee_id: u64,
    policy_id: u64,
    effective_start: NaiveDate,
    effective_end: Option<NaiveDate>,
    is_current: bool,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<AssignmentRow> for PolicyAssignment {
    fn from(row: AssignmentRow) -> Self {
        Self {
            id: row.id,
            employee_id: row.employee_id,
            policy_id: row.policy_id,
            effective_start: row.effective_start,
            effective_end: row.effective_end,
            is_current: row.is_current,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct HolidayRow {
    date: NaiveDate,
    holiday_type: String,
    name: Option<String>,
}

impl TryFrom<HolidayRow> for HolidayEntry {
    type Error = StoreError;

    fn try_from(row: HolidayRow) -> Result<Self, Self::Error> {
        let holiday_type: HolidayType = decode("holiday", &row.holiday_type)?;
        Ok(HolidayEntry::new(row.date, holiday_type, row.name))
    }
}

#[derive(FromRow)]
struct ClockEventRow {
    employee_id: u64,
    punched_at: NaiveDateTime,
    kind: String,
    source: String,
}

impl TryFrom<ClockEventRow> for ClockEvent {
    type Error = StoreError;

    fn try_from(row: ClockEventRow) -> Result<Self, Self::Error> {
        Ok(ClockEvent {
            employee_id: row.employee_id,
            timestamp: row.punched_at,
            kind: decode::<ClockKind>("clock_event", &row.kind)?,
            source: decode::<ClockSource>("clock_event", &row.source)?,
        })
    }
}

#[derive(FromRow)]
struct LeaveRow {
    employee_id: u64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    leave_type: String,
    full_day: bool,
}

impl TryFrom<LeaveRow> for LeaveInfo {
    type Error = StoreError;

    fn try_from(row: LeaveRow) -> Result<Self, Self::Error> {
        Ok(LeaveInfo {
            employee_id: row.employee_id,
            leave_type: decode::<LeaveType>("leave_request", &row.leave_type)?,
            start_date: row.start_date,
            end_date: row.end_date,
            full_day: row.full_day,
        })
    }
}

#[derive(FromRow)]
struct DailyRow {
    employee_id: u64,
    date: NaiveDate,
    status: String,
    worked_minutes: u32,
    first_clock_in: Option<NaiveDateTime>,
    last_clock_out: Option<NaiveDateTime>,
    policy_id_used: Option<u64>,
    holiday_type: Option<String>,
    anomalies: String,
}

impl TryFrom<DailyRow> for DailyAttendanceRecord {
    type Error = StoreError;

    fn try_from(row: DailyRow) -> Result<Self, Self::Error> {
        let holiday_type = row
            .holiday_type
            .as_deref()
            .map(|raw| decode::<HolidayType>("attendance_daily", raw))
            .transpose()?;
        let anomalies = serde_json::from_str(&row.anomalies).map_err(|e| StoreError::Decode {
            entity: "attendance_daily",
            reason: e.to_string(),
        })?;
        Ok(DailyAttendanceRecord {
            employee_id: row.employee_id,
            date: row.date,
            status: decode::<AttendanceStatus>("attendance_daily", &row.status)?,
            worked_minutes: row.worked_minutes,
            first_clock_in: row.first_clock_in,
            last_clock_out: row.last_clock_out,
            policy_id_used: row.policy_id_used,
            holiday_type,
            anomalies,
        })
    }
}

#[async_trait]
impl PolicyStore for MySqlStore {
    async fn list_active_assignments(
        &self,
        employee_id: u64,
    ) -> Result<Vec<PolicyAssignment>, StoreError> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT id, employee_id, policy_id, effective_start, effective_end,
                   is_current, active, created_at
            FROM policy_assignment
            WHERE employee_id = ? AND active = 1
            ORDER BY effective_start, id
            "#,
        )
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PolicyAssignment::from).collect())
    }

    async fn get_policy(&self, policy_id: u64) -> Result<WorkTimePolicy, StoreError> {
        let sql = format!("SELECT {POLICY_COLUMNS} FROM work_time_policy WHERE id = ?");
        sqlx::query_as::<_, PolicyRow>(&sql)
            .bind(policy_id)
            .fetch_optional(&self.pool)
            .await?
            .map(WorkTimePolicy::from)
            .ok_or_else(|| StoreError::NotFound {
                entity: "work_time_policy",
                id: policy_id.to_string(),
            })
    }

    async fn default_policy(&self) -> Result<Option<WorkTimePolicy>, StoreError> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM work_time_policy \
             WHERE is_default = 1 AND active = 1 ORDER BY id LIMIT 1"
        );
        let row = sqlx::query_as::<_, PolicyRow>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(WorkTimePolicy::from))
    }

    async fn save_assignments(&self, assignments: &[PolicyAssignment]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for a in assignments {
            if a.id == 0 {
                sqlx::query(
                    r#"
                    INSERT INTO policy_assignment
                    (employee_id, policy_id, effective_start, effective_end,
                     is_current, active, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, UTC_TIMESTAMP(6), UTC_TIMESTAMP(6))
                    "#,
                )
                .bind(a.employee_id)
                .bind(a.policy_id)
                .bind(a.effective_start)
                .bind(a.effective_end)
                .bind(a.is_current)
                .bind(a.active)
                .execute(&mut *tx)
                .await?;
            } else {
                sqlx::query(
                    r#"
                    UPDATE policy_assignment
                    SET effective_end = ?, is_current = ?, active = ?,
                        updated_at = UTC_TIMESTAMP(6)
                    WHERE id = ?
                    "#,
                )
                .bind(a.effective_end)
                .bind(a.is_current)
                .bind(a.active)
                .bind(a.id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!(count = assignments.len(), "Policy assignments saved");
        Ok(())
    }
}

#[async_trait]
impl HolidayStore for MySqlStore {
    async fn list_active_holidays(&self, year: i32) -> Result<Vec<HolidayEntry>, StoreError> {
        let mut stream = sqlx::query_as::<_, HolidayRow>(
            r#"
            SELECT date, holiday_type, name
            FROM holiday
            WHERE year = ? AND active = 1
            ORDER BY date
            "#,
        )
        .bind(year)
        .fetch(&self.pool);

        let mut entries = Vec::new();
        while let Some(row) = stream.next().await {
            // A row we cannot read fails the whole year, so callers fall back
            // to their degraded path instead of treating the date as a workday.
            let entry = HolidayEntry::try_from(row?)
                .inspect_err(|e| warn!(error = %e, year, "Undecodable holiday row"))?;
            entries.push(entry);
        }

        Ok(entries)
    }

    async fn upsert_holiday(&self, entry: &HolidayEntry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE holiday SET active = 0, updated_at = UTC_TIMESTAMP(6) WHERE date = ? AND active = 1",
        )
        .bind(entry.date())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO holiday (date, holiday_type, year, month, day, name, active, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, UTC_TIMESTAMP(6))
            "#,
        )
        .bind(entry.date())
        .bind(entry.holiday_type().to_string())
        .bind(entry.year())
        .bind(entry.month())
        .bind(entry.day())
        .bind(entry.name())
        .bind(entry.is_active())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LeaveStore for MySqlStore {
    async fn get_approved_leave(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<Option<LeaveInfo>, StoreError> {
        let row = sqlx::query_as::<_, LeaveRow>(
            r#"
            SELECT employee_id, start_date, end_date, leave_type, full_day
            FROM leave_requests
            WHERE employee_id = ? AND status = 'approved'
            AND start_date <= ? AND end_date >= ?
            ORDER BY full_day DESC, id
            LIMIT 1
            "#,
        )
        .bind(employee_id)
        .bind(date)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LeaveInfo::try_from).transpose()
    }
}

#[async_trait]
impl ClockEventStore for MySqlStore {
    async fn list_events(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<Vec<ClockEvent>, StoreError> {
        let day_start = date.and_time(NaiveTime::MIN);
        let next_day = date
            .succ_opt()
            .map(|d| d.and_time(NaiveTime::MIN))
            .unwrap_or(NaiveDateTime::MAX);

        let rows = sqlx::query_as::<_, ClockEventRow>(
            r#"
            SELECT employee_id, punched_at, kind, source
            FROM clock_event
            WHERE employee_id = ? AND punched_at >= ? AND punched_at < ?
            ORDER BY punched_at, id
            "#,
        )
        .bind(employee_id)
        .bind(day_start)
        .bind(next_day)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ClockEvent::try_from).collect()
    }
}

#[async_trait]
impl SummaryStore for MySqlStore {
    async fn upsert_daily(&self, record: &DailyAttendanceRecord) -> Result<(), StoreError> {
        let anomalies = serde_json::to_string(&record.anomalies).map_err(|e| StoreError::Decode {
            entity: "attendance_daily",
            reason: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO attendance_daily
            (employee_id, date, status, worked_minutes, first_clock_in, last_clock_out,
             policy_id_used, holiday_type, anomalies, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, UTC_TIMESTAMP(6))
            ON DUPLICATE KEY UPDATE
                status = VALUES(status),
                worked_minutes = VALUES(worked_minutes),
                first_clock_in = VALUES(first_clock_in),
                last_clock_out = VALUES(last_clock_out),
                policy_id_used = VALUES(policy_id_used),
                holiday_type = VALUES(holiday_type),
                anomalies = VALUES(anomalies),
                updated_at = VALUES(updated_at)
            "#,
        )
        .bind(record.employee_id)
        .bind(record.date)
        .bind(record.status.as_ref())
        .bind(record.worked_minutes)
        .bind(record.first_clock_in)
        .bind(record.last_clock_out)
        .bind(record.policy_id_used)
        .bind(record.holiday_type.map(|t| t.to_string()))
        .bind(anomalies)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_monthly(&self, summary: &MonthlyAttendanceSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO attendance_monthly
            (employee_id, `year_month`, normal_days, late_days, early_leave_days, absent_days,
             leave_days, abnormal_days, makeup_days, outside_work_days, scheduled_workdays,
             total_worked_minutes, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, UTC_TIMESTAMP(6))
            ON DUPLICATE KEY UPDATE
                normal_days = VALUES(normal_days),
                late_days = VALUES(late_days),
                early_leave_days = VALUES(early_leave_days),
                absent_days = VALUES(absent_days),
                leave_days = VALUES(leave_days),
                abnormal_days = VALUES(abnormal_days),
                makeup_days = VALUES(makeup_days),
                outside_work_days = VALUES(outside_work_days),
                scheduled_workdays = VALUES(scheduled_workdays),
                total_worked_minutes = VALUES(total_worked_minutes),
                updated_at = VALUES(updated_at)
            "#,
        )
        .bind(summary.employee_id)
        .bind(summary.year_month.to_string())
        .bind(summary.normal_days)
        .bind(summary.late_days)
        .bind(summary.early_leave_days)
        .bind(summary.absent_days)
        .bind(summary.leave_days)
        .bind(summary.abnormal_days)
        .bind(summary.makeup_days)
        .bind(summary.outside_work_days)
        .bind(summary.scheduled_workdays)
        .bind(summary.total_worked_minutes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_daily(
        &self,
        employee_id: u64,
        year_month: YearMonth,
    ) -> Result<Vec<DailyAttendanceRecord>, StoreError> {
        let rows = sqlx::query_as::<_, DailyRow>(
            r#"
            SELECT employee_id, date, status, worked_minutes, first_clock_in, last_clock_out,
                   policy_id_used, holiday_type, anomalies
            FROM attendance_daily
            WHERE employee_id = ? AND date BETWEEN ? AND ?
            ORDER BY date
            "#,
        )
        .bind(employee_id)
        .bind(year_month.first_day())
        .bind(year_month.last_day())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DailyAttendanceRecord::try_from).collect()
    }
}

#[async_trait]
impl EmployeeDirectory for MySqlStore {
    async fn list_active_employees(&self) -> Result<Vec<u64>, StoreError> {
        let rows = sqlx::query_as::<_, (u64,)>(
            "SELECT id FROM employees WHERE status = 'active' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_holiday_type_is_a_decode_error() {
        let row = HolidayRow {
            date: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            holiday_type: "weekend".to_string(),
            name: None,
        };
        let err = HolidayEntry::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Decode { entity: "holiday", .. }));
    }

    #[test]
    fn test_known_holiday_type_decodes() {
        let row = HolidayRow {
            date: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            holiday_type: HolidayType::Statutory.to_string(),
            name: Some("National Day".to_string()),
        };
        let entry = HolidayEntry::try_from(row).unwrap();
        assert_eq!(entry.holiday_type(), HolidayType::Statutory);
    }
}
