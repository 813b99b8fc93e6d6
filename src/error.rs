//! Error types for the attendance engine.

use chrono::NaiveDate;
use serde::Serialize;
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AttendanceError {
    /// No assignment covers the day and no default policy exists.
    #[error("no work-time policy for employee {employee_id} on {date}")]
    ConfigNotFound { employee_id: u64, date: NaiveDate },

    /// A collaborator call failed.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// The employee universe could not be listed, so a batch cannot start.
    #[error("cannot enumerate employees: {0}")]
    Enumeration(StoreError),

    #[error("invalid policy assignment: {0}")]
    InvalidAssignment(String),

    #[error("invalid work-time policy {policy_id}: {reason}")]
    InvalidPolicy { policy_id: u64, reason: String },

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

/// Coarse category of an error, as reported in batch results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    ConfigNotFound,
    StoreUnavailable,
    Enumeration,
    InvalidAssignment,
    InvalidPolicy,
    InvalidRange,
}

impl AttendanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AttendanceError::ConfigNotFound { .. } => ErrorKind::ConfigNotFound,
            AttendanceError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            AttendanceError::Enumeration(_) => ErrorKind::Enumeration,
            AttendanceError::InvalidAssignment(_) => ErrorKind::InvalidAssignment,
            AttendanceError::InvalidPolicy { .. } => ErrorKind::InvalidPolicy,
            AttendanceError::InvalidRange { .. } => ErrorKind::InvalidRange,
        }
    }
}
