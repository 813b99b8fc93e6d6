//! Collaborator interfaces the engine reads from and writes to.
//!
//! The engine only ever talks to these traits. `mysql` is the production
//! backing, `memory` an in-process one used by tests and local runs.

pub mod memory;
pub mod mysql;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::model::attendance::DailyAttendanceRecord;
use crate::model::clock_event::ClockEvent;
use crate::model::holiday::HolidayEntry;
use crate::model::leave_request::LeaveInfo;
use crate::model::policy::{PolicyAssignment, WorkTimePolicy};
use crate::model::summary::{MonthlyAttendanceSummary, YearMonth};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot decode {entity}: {reason}")]
    Decode { entity: &'static str, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Active assignments of one employee, ordered by effective start.
    async fn list_active_assignments(
        &self,
        employee_id: u64,
    ) -> Result<Vec<PolicyAssignment>, StoreError>;

    async fn get_policy(&self, policy_id: u64) -> Result<WorkTimePolicy, StoreError>;

    /// The active policy flagged as default, if any.
    async fn default_policy(&self) -> Result<Option<WorkTimePolicy>, StoreError>;

    /// Inserts rows with `id == 0` and updates the rest, atomically.
    async fn save_assignments(&self, assignments: &[PolicyAssignment]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait HolidayStore: Send + Sync {
    async fn list_active_holidays(&self, year: i32) -> Result<Vec<HolidayEntry>, StoreError>;

    /// Makes `entry` the only active entry for its date.
    async fn upsert_holiday(&self, entry: &HolidayEntry) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LeaveStore: Send + Sync {
    async fn get_approved_leave(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<Option<LeaveInfo>, StoreError>;
}

#[async_trait]
pub trait ClockEventStore: Send + Sync {
    /// Events of one calendar day, ordered by timestamp.
    async fn list_events(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<Vec<ClockEvent>, StoreError>;
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Full replace keyed by (employee, date).
    async fn upsert_daily(&self, record: &DailyAttendanceRecord) -> Result<(), StoreError>;

    /// Full replace keyed by (employee, month).
    async fn upsert_monthly(&self, summary: &MonthlyAttendanceSummary) -> Result<(), StoreError>;

    async fn list_daily(
        &self,
        employee_id: u64,
        year_month: YearMonth,
    ) -> Result<Vec<DailyAttendanceRecord>, StoreError>;
}

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn list_active_employees(&self) -> Result<Vec<u64>, StoreError>;
}

/// Every collaborator the engine needs, shared behind `Arc`s.
#[derive(Clone)]
pub struct Stores {
    pub policies: Arc<dyn PolicyStore>,
    pub holidays: Arc<dyn HolidayStore>,
    pub leave: Arc<dyn LeaveStore>,
    pub clock_events: Arc<dyn ClockEventStore>,
    pub summaries: Arc<dyn SummaryStore>,
    pub employees: Arc<dyn EmployeeDirectory>,
}

impl Stores {
    /// All six roles served by one backing object.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: PolicyStore
            + HolidayStore
            + LeaveStore
            + ClockEventStore
            + SummaryStore
            + EmployeeDirectory
            + 'static,
    {
        Self {
            policies: backend.clone(),
            holidays: backend.clone(),
            leave: backend.clone(),
            clock_events: backend.clone(),
            summaries: backend.clone(),
            employees: backend,
        }
    }
}
