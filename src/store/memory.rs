//! In-process store with fault injection.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::model::attendance::DailyAttendanceRecord;
use crate::model::clock_event::ClockEvent;
use crate::model::holiday::HolidayEntry;
use crate::model::leave_request::LeaveInfo;
use crate::model::policy::{PolicyAssignment, WorkTimePolicy};
use crate::model::summary::{MonthlyAttendanceSummary, YearMonth};
use crate::store::{
    ClockEventStore, EmployeeDirectory, HolidayStore, LeaveStore, PolicyStore, StoreError,
    SummaryStore,
};

/// Collaborator that can be switched off to simulate an outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Policies,
    Holidays,
    Leave,
    ClockEvents,
    Summaries,
    Employees,
}

#[derive(Default)]
struct Tables {
    policies: BTreeMap<u64, WorkTimePolicy>,
    assignments: BTreeMap<u64, PolicyAssignment>,
    holidays: Vec<HolidayEntry>,
    leave: Vec<LeaveInfo>,
    events: Vec<ClockEvent>,
    employees: Vec<u64>,
    daily: BTreeMap<(u64, NaiveDate), DailyAttendanceRecord>,
    monthly: BTreeMap<(u64, YearMonth), MonthlyAttendanceSummary>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    faults: RwLock<HashSet<Fault>>,
    failing_event_days: RwLock<HashSet<(u64, NaiveDate)>>,
    next_id: AtomicU64,
    holiday_loads: AtomicUsize,
    daily_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, fault: Fault) -> Result<(), StoreError> {
        let faults = self.faults.read().unwrap_or_else(PoisonError::into_inner);
        if faults.contains(&fault) {
            return Err(StoreError::Unavailable(format!("{fault:?} store is down")));
        }
        Ok(())
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_fault(&self, fault: Fault, down: bool) {
        let mut faults = self.faults.write().unwrap_or_else(PoisonError::into_inner);
        if down {
            faults.insert(fault);
        } else {
            faults.remove(&fault);
        }
    }

    /// Makes `list_events` fail for one (employee, date).
    pub fn fail_events_on(&self, employee_id: u64, date: NaiveDate) {
        self.failing_event_days
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((employee_id, date));
    }

    pub fn add_policy(&self, policy: WorkTimePolicy) {
        self.write().policies.insert(policy.id, policy);
    }

    /// Stores the assignment as-is, stamping id and creation time when unsaved.
    pub fn add_assignment(&self, mut assignment: PolicyAssignment) -> PolicyAssignment {
        if assignment.id == 0 {
            assignment.id = self.allocate_id();
            assignment.created_at = Utc::now();
        }
        self.write()
            .assignments
            .insert(assignment.id, assignment.clone());
        assignment
    }

    pub fn assignments_of(&self, employee_id: u64) -> Vec<PolicyAssignment> {
        self.read()
            .assignments
            .values()
            .filter(|a| a.employee_id == employee_id)
            .cloned()
            .collect()
    }

    pub fn add_holiday(&self, entry: HolidayEntry) {
        let mut tables = self.write();
        upsert_holiday_row(&mut tables.holidays, entry);
    }

    pub fn add_leave(&self, leave: LeaveInfo) {
        self.write().leave.push(leave);
    }

    pub fn add_event(&self, event: ClockEvent) {
        self.write().events.push(event);
    }

    pub fn add_employee(&self, employee_id: u64) {
        let mut tables = self.write();
        if !tables.employees.contains(&employee_id) {
            tables.employees.push(employee_id);
        }
    }

    pub fn daily(&self, employee_id: u64, date: NaiveDate) -> Option<DailyAttendanceRecord> {
        self.read().daily.get(&(employee_id, date)).cloned()
    }

    pub fn daily_count(&self) -> usize {
        self.read().daily.len()
    }

    pub fn monthly(&self, employee_id: u64, year_month: YearMonth) -> Option<MonthlyAttendanceSummary> {
        self.read().monthly.get(&(employee_id, year_month)).cloned()
    }

    pub fn monthly_count(&self) -> usize {
        self.read().monthly.len()
    }

    /// How many times a year of holidays was read from this store.
    pub fn holiday_loads(&self) -> usize {
        self.holiday_loads.load(Ordering::SeqCst)
    }

    pub fn daily_writes(&self) -> usize {
        self.daily_writes.load(Ordering::SeqCst)
    }
}

fn upsert_holiday_row(rows: &mut Vec<HolidayEntry>, entry: HolidayEntry) {
    for row in rows.iter_mut() {
        if row.date() == entry.date() && row.is_active() {
            *row = row.clone().retired();
        }
    }
    rows.push(entry);
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn list_active_assignments(
        &self,
        employee_id: u64,
    ) -> Result<Vec<PolicyAssignment>, StoreError> {
        self.check(Fault::Policies)?;
        let mut rows: Vec<PolicyAssignment> = self
            .read()
            .assignments
            .values()
            .filter(|a| a.employee_id == employee_id && a.active)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.effective_start, a.id));
        Ok(rows)
    }

    async fn get_policy(&self, policy_id: u64) -> Result<WorkTimePolicy, StoreError> {
        self.check(Fault::Policies)?;
        self.read()
            .policies
            .get(&policy_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "work_time_policy",
                id: policy_id.to_string(),
            })
    }

    async fn default_policy(&self) -> Result<Option<WorkTimePolicy>, StoreError> {
        self.check(Fault::Policies)?;
        Ok(self
            .read()
            .policies
            .values()
            .find(|p| p.is_default && p.active)
            .cloned())
    }

    async fn save_assignments(&self, assignments: &[PolicyAssignment]) -> Result<(), StoreError> {
        self.check(Fault::Policies)?;
        for assignment in assignments {
            self.add_assignment(assignment.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl HolidayStore for MemoryStore {
    async fn list_active_holidays(&self, year: i32) -> Result<Vec<HolidayEntry>, StoreError> {
        self.check(Fault::Holidays)?;
        self.holiday_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .read()
            .holidays
            .iter()
            .filter(|h| h.is_active() && h.year() == year)
            .cloned()
            .collect())
    }

    async fn upsert_holiday(&self, entry: &HolidayEntry) -> Result<(), StoreError> {
        self.check(Fault::Holidays)?;
        self.add_holiday(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl LeaveStore for MemoryStore {
    async fn get_approved_leave(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<Option<LeaveInfo>, StoreError> {
        self.check(Fault::Leave)?;
        Ok(self
            .read()
            .leave
            .iter()
            .filter(|l| l.employee_id == employee_id && l.covers(date))
            // Full-day leave first, then the earliest row.
            .min_by_key(|l| !l.full_day)
            .cloned())
    }
}

#[async_trait]
impl ClockEventStore for MemoryStore {
    async fn list_events(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<Vec<ClockEvent>, StoreError> {
        self.check(Fault::ClockEvents)?;
        let failing = self
            .failing_event_days
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(employee_id, date));
        if failing {
            return Err(StoreError::Unavailable(format!(
                "clock events for employee {employee_id} on {date} unreadable"
            )));
        }
        let mut events: Vec<ClockEvent> = self
            .read()
            .events
            .iter()
            .filter(|e| e.employee_id == employee_id && e.timestamp.date() == date)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn upsert_daily(&self, record: &DailyAttendanceRecord) -> Result<(), StoreError> {
        self.check(Fault::Summaries)?;
        self.write()
            .daily
            .insert((record.employee_id, record.date), record.clone());
        self.daily_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_monthly(&self, summary: &MonthlyAttendanceSummary) -> Result<(), StoreError> {
        self.check(Fault::Summaries)?;
        self.write()
            .monthly
            .insert((summary.employee_id, summary.year_month), summary.clone());
        Ok(())
    }

    async fn list_daily(
        &self,
        employee_id: u64,
        year_month: YearMonth,
    ) -> Result<Vec<DailyAttendanceRecord>, StoreError> {
        self.check(Fault::Summaries)?;
        Ok(self
            .read()
            .daily
            .range((employee_id, year_month.first_day())..=(employee_id, year_month.last_day()))
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[async_trait]
impl EmployeeDirectory for MemoryStore {
    async fn list_active_employees(&self) -> Result<Vec<u64>, StoreError> {
        self.check(Fault::Employees)?;
        let mut employees = self.read().employees.clone();
        employees.sort_unstable();
        Ok(employees)
    }
}
