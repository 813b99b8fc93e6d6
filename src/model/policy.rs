use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A named set of work-hour thresholds.
///
/// All times are wall-clock times in the policy's local zone. A policy is
/// never edited once an assignment points at it; a change means a new policy
/// and a new assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkTimePolicy {
    pub id: u64,
    pub name: String,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub lunch_start: Option<NaiveTime>,
    pub lunch_end: Option<NaiveTime>,
    pub enable_lunch_time: bool,
    pub standard_work_minutes: u32,
    pub min_work_minutes: u32,
    pub max_work_minutes: u32,
    /// Grace applied to both the late and the early-leave cutoffs.
    pub flexible_minutes: Option<u32>,
    pub latest_clock_in: NaiveTime,
    pub earliest_clock_out: NaiveTime,
    pub active: bool,
    pub is_default: bool,
}

impl WorkTimePolicy {
    /// Lunch window, only when lunch deduction is enabled and both ends are set.
    pub fn lunch_window(&self) -> Option<(NaiveTime, NaiveTime)> {
        if !self.enable_lunch_time {
            return None;
        }
        match (self.lunch_start, self.lunch_end) {
            (Some(start), Some(end)) if start < end => Some((start, end)),
            _ => None,
        }
    }

    pub fn flexible_seconds(&self) -> i64 {
        i64::from(self.flexible_minutes.unwrap_or(0)) * 60
    }

    /// Checks the internal consistency of the thresholds.
    pub fn validate(&self) -> Result<(), String> {
        if self.work_end <= self.work_start {
            return Err(format!(
                "work end {} is not after work start {}",
                self.work_end, self.work_start
            ));
        }
        if self.enable_lunch_time {
            let (Some(start), Some(end)) = (self.lunch_start, self.lunch_end) else {
                return Err("lunch time enabled without a lunch window".to_string());
            };
            if end <= start {
                return Err(format!("lunch end {end} is not after lunch start {start}"));
            }
            if start < self.work_start || end > self.work_end {
                return Err("lunch window lies outside the work window".to_string());
            }
        }
        if self.min_work_minutes > self.standard_work_minutes
            || self.standard_work_minutes > self.max_work_minutes
        {
            return Err(format!(
                "expected min <= standard <= max work minutes, got {} / {} / {}",
                self.min_work_minutes, self.standard_work_minutes, self.max_work_minutes
            ));
        }
        Ok(())
    }
}

/// A time-bounded link from an employee to a policy.
///
/// `effective_end` is inclusive; `None` means the interval is open-ended.
/// An `id` of 0 marks a row the store has not persisted yet; the store also
/// stamps `created_at` on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAssignment {
    pub id: u64,
    pub employee_id: u64,
    pub policy_id: u64,
    pub effective_start: NaiveDate,
    pub effective_end: Option<NaiveDate>,
    pub is_current: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl PolicyAssignment {
    pub fn open(employee_id: u64, policy_id: u64, effective_start: NaiveDate) -> Self {
        Self {
            id: 0,
            employee_id,
            policy_id,
            effective_start,
            effective_end: None,
            is_current: false,
            active: true,
            created_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.effective_start && self.effective_end.is_none_or(|end| date <= end)
    }

    pub fn overlaps(&self, other: &PolicyAssignment) -> bool {
        let starts_before_other_ends = other
            .effective_end
            .is_none_or(|end| self.effective_start <= end);
        let other_starts_before_self_ends = self
            .effective_end
            .is_none_or(|end| other.effective_start <= end);
        starts_before_other_ends && other_starts_before_self_ends
    }
}
