//! Effective work-time policy resolution.
//!
//! Active assignments of one employee must not overlap. The invariant is
//! checked when assignments are written ([`check_assignment`],
//! [`plan_reassignment`]) and checked again on every read: if two
//! assignments still cover the same day, the most recently created one wins
//! and a [`PolicyConflict`] is raised for manual repair.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::AttendanceError;
use crate::model::policy::{PolicyAssignment, WorkTimePolicy};
use crate::store::PolicyStore;

/// Several active assignments cover the same day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error(
    "employee {employee_id} has overlapping active assignments on {date}: \
     chose {chosen}, discarded {discarded:?}"
)]
pub struct PolicyConflict {
    pub employee_id: u64,
    pub date: NaiveDate,
    pub chosen: u64,
    pub discarded: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Assigned,
    Default,
}

/// The single policy in force for an (employee, date).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub policy: WorkTimePolicy,
    /// `None` when the default policy was used.
    pub assignment: Option<PolicyAssignment>,
    pub source: PolicySource,
    pub conflict: Option<PolicyConflict>,
}

/// Picks the assignment covering `date`.
///
/// Independent of input order: ties are broken by creation time, then id.
pub fn select_assignment(
    employee_id: u64,
    date: NaiveDate,
    assignments: &[PolicyAssignment],
) -> Option<(PolicyAssignment, Option<PolicyConflict>)> {
    let mut covering: Vec<&PolicyAssignment> = assignments
        .iter()
        .filter(|a| a.active && a.employee_id == employee_id && a.contains(date))
        .collect();
    covering.sort_by_key(|a| (a.created_at, a.id));

    let chosen = (*covering.last()?).clone();
    let conflict = (covering.len() > 1).then(|| PolicyConflict {
        employee_id,
        date,
        chosen: chosen.id,
        discarded: covering[..covering.len() - 1].iter().map(|a| a.id).collect(),
    });
    Some((chosen, conflict))
}

/// Rejects a candidate that overlaps another active assignment of the same employee.
pub fn check_assignment(
    existing: &[PolicyAssignment],
    candidate: &PolicyAssignment,
) -> Result<(), AttendanceError> {
    if let Some(end) = candidate.effective_end {
        if end < candidate.effective_start {
            return Err(AttendanceError::InvalidAssignment(format!(
                "assignment ends {end} before it starts {}",
                candidate.effective_start
            )));
        }
    }
    if !candidate.active {
        return Ok(());
    }

    let clashes: Vec<u64> = existing
        .iter()
        .filter(|a| {
            a.active
                && a.employee_id == candidate.employee_id
                && (candidate.id == 0 || a.id != candidate.id)
                && a.overlaps(candidate)
        })
        .map(|a| a.id)
        .collect();

    if clashes.is_empty() {
        Ok(())
    } else {
        Err(AttendanceError::InvalidAssignment(format!(
            "employee {} interval starting {} overlaps assignments {clashes:?}",
            candidate.employee_id, candidate.effective_start
        )))
    }
}

/// Recomputes `is_current` for one employee's assignments.
///
/// The current one is the active assignment containing `today`, or failing
/// that the open-ended one that started most recently.
pub fn mark_current(assignments: &mut [PolicyAssignment], today: NaiveDate) {
    let by_today = assignments
        .iter()
        .filter(|a| a.active && a.contains(today))
        .max_by_key(|a| (a.created_at, a.id))
        .map(|a| a.id_key());
    let current = by_today.or_else(|| {
        assignments
            .iter()
            .filter(|a| a.active && a.effective_end.is_none())
            .max_by_key(|a| (a.effective_start, a.created_at, a.id))
            .map(|a| a.id_key())
    });

    for a in assignments.iter_mut() {
        a.is_current = current == Some(a.id_key());
    }
}

impl PolicyAssignment {
    // Unsaved rows all have id 0; the start date tells them apart.
    fn id_key(&self) -> (u64, NaiveDate) {
        (self.id, self.effective_start)
    }
}

/// Closes whatever is open at `start` and opens a new assignment from `start`.
///
/// Returns only the rows that must be written: closed rows and the new one.
pub fn plan_reassignment(
    existing: &[PolicyAssignment],
    employee_id: u64,
    policy_id: u64,
    start: NaiveDate,
    today: NaiveDate,
) -> Result<Vec<PolicyAssignment>, AttendanceError> {
    let day_before = start
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| AttendanceError::InvalidAssignment(format!("no day before {start}")))?;

    let mut all: Vec<PolicyAssignment> = existing
        .iter()
        .filter(|a| a.employee_id == employee_id)
        .cloned()
        .collect();
    let mut touched = Vec::new();

    for a in all.iter_mut().filter(|a| a.active) {
        let reaches_start = a.effective_end.is_none_or(|end| end >= start);
        if !reaches_start {
            continue;
        }
        if a.effective_start >= start {
            return Err(AttendanceError::InvalidAssignment(format!(
                "assignment {} already starts on {}, cannot open a new one from {start}",
                a.id, a.effective_start
            )));
        }
        a.effective_end = Some(day_before);
        touched.push(a.id);
    }

    let opened = PolicyAssignment::open(employee_id, policy_id, start);
    check_assignment(&all, &opened)?;
    all.push(opened);
    mark_current(&mut all, today);

    let previously_current: Vec<u64> = existing
        .iter()
        .filter(|a| a.employee_id == employee_id && a.is_current)
        .map(|a| a.id)
        .collect();

    Ok(all
        .into_iter()
        .filter(|a| {
            a.id == 0
                || touched.contains(&a.id)
                || a.is_current != previously_current.contains(&a.id)
        })
        .collect())
}

pub struct WorkTimeConfigResolver {
    store: Arc<dyn PolicyStore>,
}

impl WorkTimeConfigResolver {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// The policy in force for `employee_id` on `date`.
    ///
    /// Falls back to the default policy when no assignment covers the day,
    /// and returns `ConfigNotFound` when there is no default either.
    pub async fn resolve(
        &self,
        employee_id: u64,
        date: NaiveDate,
    ) -> Result<Resolution, AttendanceError> {
        let assignments = self.store.list_active_assignments(employee_id).await?;

        let Some((assignment, conflict)) = select_assignment(employee_id, date, &assignments)
        else {
            return match self.store.default_policy().await? {
                Some(policy) => {
                    debug!(employee_id, %date, policy_id = policy.id, "Using default policy");
                    Ok(Resolution {
                        policy,
                        assignment: None,
                        source: PolicySource::Default,
                        conflict: None,
                    })
                }
                None => Err(AttendanceError::ConfigNotFound { employee_id, date }),
            };
        };

        if let Some(conflict) = &conflict {
            warn!(
                employee_id,
                %date,
                chosen = conflict.chosen,
                discarded = ?conflict.discarded,
                "Policy assignment conflict, needs manual repair"
            );
        }

        let policy = self.store.get_policy(assignment.policy_id).await?;
        Ok(Resolution {
            policy,
            assignment: Some(assignment),
            source: PolicySource::Assigned,
            conflict,
        })
    }

    /// Moves an employee onto `policy_id` from `start`, closing the open interval.
    pub async fn assign_policy(
        &self,
        employee_id: u64,
        policy_id: u64,
        start: NaiveDate,
        today: NaiveDate,
    ) -> Result<Vec<PolicyAssignment>, AttendanceError> {
        let policy = self.store.get_policy(policy_id).await?;
        policy
            .validate()
            .map_err(|reason| AttendanceError::InvalidPolicy { policy_id, reason })?;

        let existing = self.store.list_active_assignments(employee_id).await?;
        let changes = plan_reassignment(&existing, employee_id, policy_id, start, today)?;
        self.store.save_assignments(&changes).await?;

        info!(employee_id, policy_id, %start, rows = changes.len(), "Policy assigned");
        Ok(changes)
    }
}
