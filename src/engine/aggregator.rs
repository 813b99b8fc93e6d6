//! Daily and monthly recomputation.
//!
//! Every write is a full replace of the derived row, so re-running any of
//! these operations with unchanged inputs leaves the stores unchanged. Work
//! for one (employee, date) is serialized; different keys may run in
//! parallel. Batches never stop on an item failure and check for
//! cancellation between items.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::classifier::{ClassifyInput, classify};
use crate::engine::holiday_calendar::HolidayCalendar;
use crate::engine::resolver::{PolicyConflict, WorkTimeConfigResolver};
use crate::error::{AttendanceError, ErrorKind};
use crate::model::attendance::{Anomaly, AttendanceStatus, DailyAttendanceRecord};
use crate::model::summary::{MonthlyAttendanceSummary, YearMonth};
use crate::store::Stores;

type DayKey = (u64, NaiveDate);

/// Per-(employee, date) async locks, dropped once nobody holds them.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<DayKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    fn handle(&self, key: DayKey) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        map.entry(key).or_default().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub employee_id: u64,
    pub date: NaiveDate,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of a batch of day recomputations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub written: usize,
    pub failures: Vec<ItemFailure>,
    pub conflicts: Vec<PolicyConflict>,
    /// Days classified without any policy.
    pub unconfigured: Vec<DayKey>,
    /// Days classified while holiday data was unavailable.
    pub degraded: Vec<DayKey>,
    /// Stopped early on request; counts above cover the items done so far.
    pub cancelled: bool,
}

impl BatchReport {
    fn absorb(&mut self, batch: &EmployeeBatch) {
        self.written += batch.records.len();
        self.failures.extend(batch.failures.iter().cloned());
        self.conflicts.extend(batch.conflicts.iter().cloned());
        self.unconfigured.extend(
            batch
                .records
                .iter()
                .filter(|r| r.has_anomaly(&Anomaly::Unconfigured))
                .map(|r| (r.employee_id, r.date)),
        );
        self.degraded.extend(batch.degraded_days());
        self.cancelled |= batch.cancelled;
    }

    fn sort(&mut self) {
        self.failures.sort_by_key(|f| (f.employee_id, f.date));
        self.conflicts.sort_by_key(|c| (c.employee_id, c.date));
        self.unconfigured.sort_unstable();
        self.degraded.sort_unstable();
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.degraded.is_empty() && !self.cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyFailure {
    pub employee_id: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthReport {
    pub year_month: YearMonth,
    pub days: BatchReport,
    pub monthly_written: usize,
    /// Employees whose monthly row was left untouched.
    pub monthly_failures: Vec<MonthlyFailure>,
}

/// One employee's share of a batch.
struct EmployeeBatch {
    employee_id: u64,
    records: Vec<DailyAttendanceRecord>,
    failures: Vec<ItemFailure>,
    conflicts: Vec<PolicyConflict>,
    cancelled: bool,
}

impl EmployeeBatch {
    fn degraded_days(&self) -> impl Iterator<Item = DayKey> + '_ {
        self.records
            .iter()
            .filter(|r| r.has_anomaly(&Anomaly::HolidayDataDegraded))
            .map(|r| (r.employee_id, r.date))
    }

    /// Why this employee's month cannot be folded, if it cannot.
    fn incomplete_reason(&self) -> Option<String> {
        if self.cancelled {
            return Some("cancelled before the month was complete".to_string());
        }
        if !self.failures.is_empty() {
            return Some(format!("{} day(s) failed", self.failures.len()));
        }
        let degraded = self.degraded_days().count();
        if degraded > 0 {
            return Some(format!("{degraded} day(s) classified without holiday data"));
        }
        None
    }
}

/// One computed day plus the conflict signal raised while resolving it.
struct DayResult {
    record: DailyAttendanceRecord,
    conflict: Option<PolicyConflict>,
}

pub struct SummaryAggregator {
    resolver: WorkTimeConfigResolver,
    calendar: Arc<HolidayCalendar>,
    stores: Stores,
    locks: KeyLocks,
    concurrency: usize,
}

impl SummaryAggregator {
    pub fn new(stores: Stores, calendar: Arc<HolidayCalendar>, concurrency: usize) -> Self {
        Self {
            resolver: WorkTimeConfigResolver::new(stores.policies.clone()),
            calendar,
            stores,
            locks: KeyLocks::default(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn resolver(&self) -> &WorkTimeConfigResolver {
        &self.resolver
    }

    pub fn calendar(&self) -> &Arc<HolidayCalendar> {
        &self.calendar
    }

    /// Employee universe for full batches.
    pub async fn active_employees(&self) -> Result<Vec<u64>, AttendanceError> {
        self.stores
            .employees
            .list_active_employees()
            .await
            .map_err(AttendanceError::Enumeration)
    }

    /// Stored daily records of one employee for a month, ordered by date.
    pub async fn daily_records(
        &self,
        employee_id: u64,
        year_month: YearMonth,
    ) -> Result<Vec<DailyAttendanceRecord>, AttendanceError> {
        let mut records = self.stores.summaries.list_daily(employee_id, year_month).await?;
        records.sort_by_key(|r| r.date);
        Ok(records)
    }

    async fn compute_day(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<DayResult, AttendanceError> {
        let resolution = match self.resolver.resolve(employee_id, date).await {
            Ok(resolution) => Some(resolution),
            Err(AttendanceError::ConfigNotFound { .. }) => {
                debug!(employee_id, %date, "No policy configured for day");
                None
            }
            Err(e) => return Err(e),
        };

        let holiday = self.calendar.is_holiday(date).await;
        let leave = self
            .stores
            .leave
            .get_approved_leave(employee_id, date)
            .await?;
        let events = self.stores.clock_events.list_events(employee_id, date).await?;

        let record = classify(&ClassifyInput {
            employee_id,
            date,
            resolution: resolution.as_ref(),
            holiday,
            leave: leave.as_ref(),
            events: &events,
        });
        let conflict = resolution.and_then(|r| r.conflict);
        Ok(DayResult { record, conflict })
    }

    async fn recompute_day_inner(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<DayResult, AttendanceError> {
        let lock = self.locks.handle((employee_id, date));
        let _guard = lock.lock().await;

        let result = self.compute_day(employee_id, date).await?;
        self.stores.summaries.upsert_daily(&result.record).await?;
        Ok(result)
    }

    /// Classifies one day and replaces its stored record.
    pub async fn recompute_day(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<DailyAttendanceRecord, AttendanceError> {
        self.recompute_day_inner(employee_id, date)
            .await
            .map(|result| result.record)
    }

    async fn recompute_employee(
        &self,
        employee_id: u64,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> EmployeeBatch {
        let mut batch = EmployeeBatch {
            employee_id,
            records: Vec::new(),
            failures: Vec::new(),
            conflicts: Vec::new(),
            cancelled: false,
        };

        for date in start.iter_days().take_while(|d| *d <= end) {
            if cancel.is_cancelled() {
                batch.cancelled = true;
                break;
            }
            match self.recompute_day_inner(employee_id, date).await {
                Ok(result) => {
                    batch.conflicts.extend(result.conflict);
                    batch.records.push(result.record);
                }
                Err(e) => {
                    warn!(employee_id, %date, error = %e, "Day recomputation failed");
                    batch.failures.push(ItemFailure {
                        employee_id,
                        date,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        batch
    }

    async fn run_batches(
        &self,
        employee_ids: &[u64],
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Vec<EmployeeBatch> {
        stream::iter(employee_ids.iter().copied())
            .map(|employee_id| self.recompute_employee(employee_id, start, end, cancel))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Recomputes each employee × each date of the inclusive range.
    ///
    /// Only an inverted range is an error; item failures are collected in
    /// the report.
    pub async fn recompute_range(
        &self,
        employee_ids: &[u64],
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, AttendanceError> {
        if start > end {
            return Err(AttendanceError::InvalidRange { start, end });
        }

        let mut report = BatchReport::default();
        for batch in self.run_batches(employee_ids, start, end, cancel).await {
            report.absorb(&batch);
        }
        report.sort();

        info!(
            employees = employee_ids.len(),
            %start,
            %end,
            written = report.written,
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "Range recomputed"
        );
        Ok(report)
    }

    /// Recomputes every day of the month for all active employees, then
    /// overwrites each employee's monthly summary.
    ///
    /// An employee with a failed, skipped or degraded day keeps the previous
    /// monthly row.
    pub async fn recompute_month(
        &self,
        year_month: YearMonth,
        cancel: &CancellationToken,
    ) -> Result<MonthReport, AttendanceError> {
        let employees = self.active_employees().await?;

        let batches = self
            .run_batches(&employees, year_month.first_day(), year_month.last_day(), cancel)
            .await;

        let mut days = BatchReport::default();
        let mut monthly_written = 0;
        let mut monthly_failures = Vec::new();

        for batch in &batches {
            days.absorb(batch);

            if let Some(reason) = batch.incomplete_reason() {
                warn!(employee_id = batch.employee_id, %year_month, %reason, "Keeping previous monthly summary");
                monthly_failures.push(MonthlyFailure {
                    employee_id: batch.employee_id,
                    reason,
                });
                continue;
            }

            let summary = fold_month(batch.employee_id, year_month, &batch.records);
            match self.stores.summaries.upsert_monthly(&summary).await {
                Ok(()) => monthly_written += 1,
                Err(e) => {
                    error!(employee_id = batch.employee_id, %year_month, error = %e, "Monthly upsert failed");
                    monthly_failures.push(MonthlyFailure {
                        employee_id: batch.employee_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        days.sort();
        monthly_failures.sort_by_key(|f| f.employee_id);

        info!(
            %year_month,
            employees = employees.len(),
            days_written = days.written,
            monthly_written,
            monthly_failed = monthly_failures.len(),
            "Month recomputed"
        );

        Ok(MonthReport {
            year_month,
            days,
            monthly_written,
            monthly_failures,
        })
    }
}

/// Folds one employee's daily records into a fresh monthly summary.
///
/// Rest days are taken from the records' own holiday type, so
/// `scheduled_workdays` agrees with the days that were classified.
pub fn fold_month(
    employee_id: u64,
    year_month: YearMonth,
    records: &[DailyAttendanceRecord],
) -> MonthlyAttendanceSummary {
    let records: Vec<&DailyAttendanceRecord> = records
        .iter()
        .filter(|r| r.employee_id == employee_id && YearMonth::of(r.date) == year_month)
        .collect();
    let rest_days = records.iter().filter(|r| r.is_rest_day()).count() as u32;

    let mut summary = MonthlyAttendanceSummary {
        employee_id,
        year_month,
        normal_days: 0,
        late_days: 0,
        early_leave_days: 0,
        absent_days: 0,
        leave_days: 0,
        abnormal_days: 0,
        makeup_days: 0,
        outside_work_days: 0,
        scheduled_workdays: year_month.day_count().saturating_sub(rest_days),
        total_worked_minutes: 0,
    };

    for record in records {
        summary.total_worked_minutes += u64::from(record.worked_minutes);

        let day_off = record.is_rest_day() && record.first_clock_in.is_none();
        match record.status {
            AttendanceStatus::Normal if day_off => {}
            AttendanceStatus::Normal => summary.normal_days += 1,
            AttendanceStatus::Late => summary.late_days += 1,
            AttendanceStatus::EarlyLeave => summary.early_leave_days += 1,
            AttendanceStatus::Absent => summary.absent_days += 1,
            AttendanceStatus::OnLeave => summary.leave_days += 1,
            AttendanceStatus::Abnormal => summary.abnormal_days += 1,
            AttendanceStatus::Makeup => summary.makeup_days += 1,
            AttendanceStatus::OutsideWork => summary.outside_work_days += 1,
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::clock_event::{ClockEvent, ClockKind, ClockSource};
    use crate::model::holiday::{HolidayEntry, HolidayType};
    use crate::model::leave_request::{LeaveInfo, LeaveType};
    use crate::model::policy::{PolicyAssignment, WorkTimePolicy};
    use crate::store::memory::{Fault, MemoryStore};
    use crate::store::{ClockEventStore, StoreError, SummaryStore};
    use async_trait::async_trait;
    use chrono::{NaiveDateTime, NaiveTime};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn policy() -> WorkTimePolicy {
        WorkTimePolicy {
            id: 1,
            name: "office".into(),
            work_start: t(9, 0),
            work_end: t(18, 0),
            lunch_start: None,
            lunch_end: None,
            enable_lunch_time: false,
            standard_work_minutes: 480,
            min_work_minutes: 240,
            max_work_minutes: 720,
            flexible_minutes: None,
            latest_clock_in: t(9, 30),
            earliest_clock_out: t(17, 30),
            active: true,
            is_default: false,
        }
    }

    fn punch(employee_id: u64, kind: ClockKind, at: NaiveDateTime) -> ClockEvent {
        ClockEvent {
            employee_id,
            timestamp: at,
            kind,
            source: ClockSource::Device,
        }
    }

    fn worked_day(store: &MemoryStore, employee_id: u64, date: NaiveDate, start: NaiveTime, end: NaiveTime) {
        store.add_event(punch(employee_id, ClockKind::ClockIn, date.and_time(start)));
        store.add_event(punch(employee_id, ClockKind::ClockOut, date.and_time(end)));
    }

    fn seeded(employees: &[u64]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_policy(policy());
        for &employee_id in employees {
            store.add_employee(employee_id);
            store.add_assignment(PolicyAssignment::open(employee_id, 1, d(2024, 1, 1)));
        }
        store
    }

    fn aggregator_over(stores: Stores) -> SummaryAggregator {
        let calendar = Arc::new(HolidayCalendar::new(
            stores.holidays.clone(),
            8,
            Duration::from_secs(3600),
        ));
        SummaryAggregator::new(stores, calendar, 4)
    }

    fn setup(employees: &[u64]) -> (Arc<MemoryStore>, SummaryAggregator) {
        let store = seeded(employees);
        let aggregator = aggregator_over(Stores::from_backend(store.clone()));
        (store, aggregator)
    }

    /// Daily writes that take a while and record how many overlap per key.
    struct SlowSummaries {
        inner: Arc<MemoryStore>,
        in_flight: Mutex<HashMap<DayKey, usize>>,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl SummaryStore for SlowSummaries {
        async fn upsert_daily(&self, record: &DailyAttendanceRecord) -> Result<(), StoreError> {
            let key = (record.employee_id, record.date);
            let now = {
                let mut in_flight = self.in_flight.lock().unwrap();
                let count = in_flight.entry(key).or_default();
                *count += 1;
                *count
            };
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = self.inner.upsert_daily(record).await;
            *self.in_flight.lock().unwrap().get_mut(&key).unwrap() -= 1;
            result
        }

        async fn upsert_monthly(&self, summary: &MonthlyAttendanceSummary) -> Result<(), StoreError> {
            self.inner.upsert_monthly(summary).await
        }

        async fn list_daily(
            &self,
            employee_id: u64,
            year_month: YearMonth,
        ) -> Result<Vec<DailyAttendanceRecord>, StoreError> {
            self.inner.list_daily(employee_id, year_month).await
        }
    }

    /// Cancels the token while serving the `nth` clock-event read.
    struct CancellingEvents {
        inner: Arc<MemoryStore>,
        reads: AtomicUsize,
        nth: usize,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ClockEventStore for CancellingEvents {
        async fn list_events(
            &self,
            employee_id: u64,
            date: NaiveDate,
        ) -> Result<Vec<ClockEvent>, StoreError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
                self.cancel.cancel();
            }
            self.inner.list_events(employee_id, date).await
        }
    }

    fn cancelling_after(store: &Arc<MemoryStore>, nth: usize, cancel: &CancellationToken) -> SummaryAggregator {
        let mut stores = Stores::from_backend(store.clone());
        stores.clock_events = Arc::new(CancellingEvents {
            inner: store.clone(),
            reads: AtomicUsize::new(0),
            nth,
            cancel: cancel.clone(),
        });
        aggregator_over(stores)
    }

    #[tokio::test]
    async fn test_recompute_day_is_idempotent() {
        let (store, aggregator) = setup(&[1]);
        worked_day(&store, 1, d(2024, 3, 4), t(9, 45), t(18, 0));

        let first = aggregator.recompute_day(1, d(2024, 3, 4)).await.unwrap();
        let first_bytes = serde_json::to_vec(&store.daily(1, d(2024, 3, 4)).unwrap()).unwrap();
        let second = aggregator.recompute_day(1, d(2024, 3, 4)).await.unwrap();
        let second_bytes = serde_json::to_vec(&store.daily(1, d(2024, 3, 4)).unwrap()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_bytes, second_bytes);
        assert_eq!(first.status, AttendanceStatus::Late);
        assert_eq!(first.worked_minutes, 495);
        assert_eq!(store.daily_count(), 1);
    }

    #[tokio::test]
    async fn test_recompute_day_picks_up_late_corrections() {
        let (store, aggregator) = setup(&[1]);
        let date = d(2024, 3, 5);
        store.add_event(punch(1, ClockKind::ClockIn, date.and_time(t(9, 0))));

        let before = aggregator.recompute_day(1, date).await.unwrap();
        assert_eq!(before.status, AttendanceStatus::Abnormal);

        store.add_event(punch(1, ClockKind::ClockOut, date.and_time(t(18, 0))));
        let after = aggregator.recompute_day(1, date).await.unwrap();
        assert_eq!(after.status, AttendanceStatus::Normal);
        assert_eq!(store.daily(1, date), Some(after));
    }

    #[tokio::test]
    async fn test_statutory_holiday_day_is_normal() {
        let (store, aggregator) = setup(&[1]);
        store.add_holiday(HolidayEntry::new(d(2024, 5, 1), HolidayType::Statutory, None));

        let record = aggregator.recompute_day(1, d(2024, 5, 1)).await.unwrap();
        assert_eq!(record.status, AttendanceStatus::Normal);
        assert_eq!(record.worked_minutes, 0);
    }

    #[tokio::test]
    async fn test_approved_leave_overrides_punches() {
        let (store, aggregator) = setup(&[1]);
        store.add_leave(LeaveInfo {
            employee_id: 1,
            leave_type: LeaveType::Annual,
            start_date: d(2024, 3, 4),
            end_date: d(2024, 3, 6),
            full_day: true,
        });
        worked_day(&store, 1, d(2024, 3, 5), t(10, 0), t(12, 0));

        let record = aggregator.recompute_day(1, d(2024, 3, 5)).await.unwrap();
        assert_eq!(record.status, AttendanceStatus::OnLeave);
        assert_eq!(record.worked_minutes, 0);

        let after = aggregator.recompute_day(1, d(2024, 3, 7)).await.unwrap();
        assert_eq!(after.status, AttendanceStatus::Absent);
    }

    #[tokio::test]
    async fn test_missing_assignment_is_abnormal_and_reported() {
        let (store, aggregator) = setup(&[]);
        store.add_employee(9);

        let cancel = CancellationToken::new();
        let report = aggregator
            .recompute_range(&[9], d(2024, 3, 4), d(2024, 3, 4), &cancel)
            .await
            .unwrap();

        assert_eq!(report.written, 1);
        assert_eq!(report.unconfigured, vec![(9, d(2024, 3, 4))]);
        let record = store.daily(9, d(2024, 3, 4)).unwrap();
        assert_eq!(record.status, AttendanceStatus::Abnormal);
        assert!(record.has_anomaly(&Anomaly::Unconfigured));
    }

    #[tokio::test]
    async fn test_overlapping_assignments_report_conflict() {
        let (store, aggregator) = setup(&[1]);
        let mut second = policy();
        second.id = 2;
        second.latest_clock_in = t(10, 0);
        store.add_policy(second);
        let newer = store.add_assignment(PolicyAssignment::open(1, 2, d(2024, 3, 1)));

        let cancel = CancellationToken::new();
        let report = aggregator
            .recompute_range(&[1], d(2024, 3, 4), d(2024, 3, 4), &cancel)
            .await
            .unwrap();

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].chosen, newer.id);
        let record = store.daily(1, d(2024, 3, 4)).unwrap();
        assert_eq!(record.policy_id_used, Some(2));
    }

    #[tokio::test]
    async fn test_range_continues_past_a_failing_day() {
        let (store, aggregator) = setup(&[1]);
        let dates: Vec<NaiveDate> = (4..=8).map(|day| d(2024, 3, day)).collect();
        for &date in &dates {
            worked_day(&store, 1, date, t(9, 0), t(18, 0));
        }
        store.fail_events_on(1, dates[2]);

        let cancel = CancellationToken::new();
        let report = aggregator
            .recompute_range(&[1], dates[0], dates[4], &cancel)
            .await
            .unwrap();

        assert_eq!(report.written, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].date, dates[2]);
        assert_eq!(report.failures[0].kind, ErrorKind::StoreUnavailable);
        assert!(store.daily(1, dates[3]).is_some());
        assert!(store.daily(1, dates[4]).is_some());
        assert!(store.daily(1, dates[2]).is_none());
    }

    #[tokio::test]
    async fn test_failure_does_not_corrupt_committed_record() {
        let (store, aggregator) = setup(&[1]);
        let date = d(2024, 3, 4);
        worked_day(&store, 1, date, t(9, 0), t(18, 0));
        let committed = aggregator.recompute_day(1, date).await.unwrap();

        store.fail_events_on(1, date);
        assert!(aggregator.recompute_day(1, date).await.is_err());
        assert_eq!(store.daily(1, date), Some(committed));
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected() {
        let (_store, aggregator) = setup(&[1]);
        let cancel = CancellationToken::new();
        let err = aggregator
            .recompute_range(&[1], d(2024, 3, 8), d(2024, 3, 4), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let (store, aggregator) = setup(&[1, 2]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = aggregator
            .recompute_range(&[1, 2], d(2024, 3, 1), d(2024, 3, 31), &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.written, 0);
        assert_eq!(store.daily_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_range_reports_partial_result() {
        let store = seeded(&[1]);
        let cancel = CancellationToken::new();
        let aggregator = cancelling_after(&store, 3, &cancel);

        let report = aggregator
            .recompute_range(&[1], d(2024, 3, 1), d(2024, 3, 10), &cancel)
            .await
            .unwrap();

        // The day in progress finishes; the next one is never started.
        assert!(report.cancelled);
        assert!(!report.is_clean());
        assert_eq!(report.written, 3);
        assert_eq!(store.daily_count(), 3);
        assert!(store.daily(1, d(2024, 3, 3)).is_some());
        assert!(store.daily(1, d(2024, 3, 4)).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_month_keeps_previous_summary() {
        let store = seeded(&[1]);
        let march = YearMonth::new(2024, 3).unwrap();
        let plain = aggregator_over(Stores::from_backend(store.clone()));
        plain
            .recompute_month(march, &CancellationToken::new())
            .await
            .unwrap();
        let before = store.monthly(1, march).unwrap();

        worked_day(&store, 1, d(2024, 3, 4), t(9, 0), t(18, 0));
        let cancel = CancellationToken::new();
        let aggregator = cancelling_after(&store, 5, &cancel);
        let report = aggregator.recompute_month(march, &cancel).await.unwrap();

        assert!(report.days.cancelled);
        assert!(report.days.written > 0 && report.days.written < 31);
        assert_eq!(report.monthly_written, 0);
        assert_eq!(report.monthly_failures[0].employee_id, 1);
        assert_eq!(store.monthly(1, march), Some(before));
    }

    #[tokio::test]
    async fn test_recompute_month_twice_is_stable() {
        let (store, aggregator) = setup(&[1, 2]);
        let march = YearMonth::new(2024, 3).unwrap();
        store.add_holiday(HolidayEntry::new(d(2024, 3, 2), HolidayType::Other, None));
        store.add_holiday(HolidayEntry::new(d(2024, 3, 3), HolidayType::Other, None));
        worked_day(&store, 1, d(2024, 3, 4), t(9, 0), t(18, 0));
        worked_day(&store, 1, d(2024, 3, 5), t(9, 45), t(18, 0));
        worked_day(&store, 2, d(2024, 3, 4), t(9, 0), t(17, 0));

        let cancel = CancellationToken::new();
        let first = aggregator.recompute_month(march, &cancel).await.unwrap();
        let summary_1 = store.monthly(1, march).unwrap();
        let summary_2 = store.monthly(2, march).unwrap();

        let second = aggregator.recompute_month(march, &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.monthly(1, march), Some(summary_1.clone()));
        assert_eq!(store.monthly(2, march), Some(summary_2.clone()));
        assert_eq!(store.monthly_count(), 2);
        assert_eq!(aggregator.daily_records(1, march).await.unwrap().len(), 31);

        assert_eq!(first.days.written, 62);
        assert_eq!(first.monthly_written, 2);
        assert_eq!(summary_1.normal_days, 1);
        assert_eq!(summary_1.late_days, 1);
        assert_eq!(summary_1.absent_days, 27);
        assert_eq!(summary_1.scheduled_workdays, 29);
        assert_eq!(summary_1.total_worked_minutes, 540 + 495);
        assert_eq!(summary_2.early_leave_days, 1);
        assert_eq!(summary_2.total_worked_minutes, 480);
    }

    #[tokio::test]
    async fn test_month_keeps_previous_summary_when_days_fail() {
        let (store, aggregator) = setup(&[1]);
        let march = YearMonth::new(2024, 3).unwrap();
        let cancel = CancellationToken::new();
        aggregator.recompute_month(march, &cancel).await.unwrap();
        let before = store.monthly(1, march).unwrap();

        worked_day(&store, 1, d(2024, 3, 4), t(9, 0), t(18, 0));
        store.fail_events_on(1, d(2024, 3, 10));
        let report = aggregator.recompute_month(march, &cancel).await.unwrap();

        assert_eq!(report.days.failures.len(), 1);
        assert_eq!(report.monthly_written, 0);
        assert_eq!(report.monthly_failures[0].employee_id, 1);
        assert_eq!(store.monthly(1, march), Some(before));
    }

    #[tokio::test]
    async fn test_holiday_outage_keeps_previous_summary() {
        let (store, aggregator) = setup(&[1]);
        let march = YearMonth::new(2024, 3).unwrap();
        store.add_holiday(HolidayEntry::new(d(2024, 3, 2), HolidayType::Statutory, None));
        let cancel = CancellationToken::new();

        let good = aggregator.recompute_month(march, &cancel).await.unwrap();
        assert!(good.days.is_clean());
        let before = store.monthly(1, march).unwrap();
        assert_eq!(before.scheduled_workdays, 30);
        assert_eq!(before.absent_days, 30);

        store.set_fault(Fault::Holidays, true);
        aggregator.calendar().invalidate(2024).await;
        let report = aggregator.recompute_month(march, &cancel).await.unwrap();

        assert_eq!(report.days.degraded.len(), 31);
        assert!(report.days.failures.is_empty());
        assert!(!report.days.is_clean());
        assert_eq!(report.monthly_written, 0);
        assert_eq!(report.monthly_failures.len(), 1);
        assert_eq!(report.monthly_failures[0].employee_id, 1);
        assert_eq!(store.monthly(1, march), Some(before));
    }

    #[tokio::test]
    async fn test_month_fails_to_start_without_employee_list() {
        let (store, aggregator) = setup(&[1]);
        store.set_fault(Fault::Employees, true);
        let cancel = CancellationToken::new();
        let err = aggregator
            .recompute_month(YearMonth::new(2024, 3).unwrap(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::Enumeration(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_recomputations_serialize() {
        let store = seeded(&[1]);
        let summaries = Arc::new(SlowSummaries {
            inner: store.clone(),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: AtomicUsize::new(0),
        });
        let mut stores = Stores::from_backend(store.clone());
        stores.summaries = summaries.clone();
        let aggregator = Arc::new(aggregator_over(stores));
        worked_day(&store, 1, d(2024, 3, 4), t(9, 0), t(18, 0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move { aggregator.recompute_day(1, d(2024, 3, 4)).await })
            })
            .collect();
        let mut records = Vec::new();
        for task in tasks {
            records.push(task.await.unwrap().unwrap());
        }

        assert!(records.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(summaries.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(store.daily_writes(), 8);
        assert_eq!(store.daily_count(), 1);
    }

    #[test]
    fn test_fold_skips_rest_days_and_overwrites() {
        let march = YearMonth::new(2024, 3).unwrap();
        let base = DailyAttendanceRecord {
            employee_id: 1,
            date: d(2024, 3, 1),
            status: AttendanceStatus::Normal,
            worked_minutes: 0,
            first_clock_in: None,
            last_clock_out: None,
            policy_id_used: Some(1),
            holiday_type: Some(HolidayType::Statutory),
            anomalies: Vec::new(),
        };
        let leave = DailyAttendanceRecord {
            date: d(2024, 3, 2),
            status: AttendanceStatus::OnLeave,
            holiday_type: None,
            ..base.clone()
        };
        let summary = fold_month(1, march, &[base, leave]);
        assert_eq!(summary.normal_days, 0);
        assert_eq!(summary.leave_days, 1);
        assert_eq!(summary.scheduled_workdays, 30);
    }
}
