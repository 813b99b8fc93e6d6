//! Run-state tracking for attendance jobs.
//!
//! Each job is Idle or Running. Starting a run goes through
//! [`JobRegistry::try_begin`], which refuses while the job is Running; the
//! returned [`RunGuard`] puts the job back to Idle when it is finished or
//! dropped.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tracing::warn;
use uuid::Uuid;

use crate::scheduler::JobKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
}

/// Result of the last firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum JobResult {
    Succeeded,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job: JobKind,
    /// Cron schedule, when the job runs on one.
    pub cron_expr: Option<String>,
    pub state: JobState,
    pub last_run_id: Option<Uuid>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub error_count: u64,
    pub skip_count: u64,
}

impl JobStatus {
    fn new(job: JobKind) -> Self {
        Self {
            job,
            cron_expr: None,
            state: JobState::Idle,
            last_run_id: None,
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            skip_count: 0,
        }
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobKind, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobKind, JobStatus>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobKind, JobStatus>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a job in the Idle state; an existing entry keeps its history.
    pub fn register(&self, job: JobKind) {
        self.write().entry(job).or_insert_with(|| JobStatus::new(job));
    }

    pub fn set_schedule(&self, job: JobKind, cron_expr: &str) {
        if let Some(status) = self.write().get_mut(&job) {
            status.cron_expr = Some(cron_expr.to_string());
        }
    }

    pub fn is_registered(&self, job: JobKind) -> bool {
        self.read().contains_key(&job)
    }

    pub fn is_running(&self, job: JobKind) -> bool {
        self.read()
            .get(&job)
            .is_some_and(|s| s.state == JobState::Running)
    }

    pub fn any_running(&self) -> bool {
        self.read().values().any(|s| s.state == JobState::Running)
    }

    pub fn get_status(&self, job: JobKind) -> Option<JobStatus> {
        self.read().get(&job).cloned()
    }

    /// All jobs, ordered by kind.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.read().values().cloned().collect();
        all.sort_by_key(|s| s.job);
        all
    }

    /// Moves the job to Running, or records a skip when it already is.
    pub fn try_begin(&self, job: JobKind) -> Option<RunGuard<'_>> {
        let mut jobs = self.write();
        let status = jobs.get_mut(&job)?;

        if status.state == JobState::Running {
            status.skip_count += 1;
            status.last_result = Some(JobResult::Skipped("previous run still active".into()));
            return None;
        }

        let run_id = Uuid::new_v4();
        status.state = JobState::Running;
        status.last_run_id = Some(run_id);
        status.last_run = Some(Utc::now());

        Some(RunGuard {
            registry: self,
            job,
            run_id,
            started: Instant::now(),
            finished: false,
        })
    }

    fn complete(&self, job: JobKind, result: JobResult, duration_ms: u64) {
        if let Some(status) = self.write().get_mut(&job) {
            status.state = JobState::Idle;
            status.last_duration_ms = Some(duration_ms);
            status.run_count += 1;
            if matches!(result, JobResult::Failed(_)) {
                status.error_count += 1;
            }
            status.last_result = Some(result);
        }
    }
}

/// Marks one run as in flight; returns the job to Idle when dropped.
pub struct RunGuard<'a> {
    registry: &'a JobRegistry,
    job: JobKind,
    run_id: Uuid,
    started: Instant,
    finished: bool,
}

impl RunGuard<'_> {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn finish(mut self, result: JobResult) {
        self.record(result);
    }

    fn record(&mut self, result: JobResult) {
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.registry.complete(self.job, result, duration_ms);
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(job = %self.job, run_id = %self.run_id, "Job run ended without a result");
            self.record(JobResult::Failed("run aborted".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_finish() {
        let registry = JobRegistry::new();
        registry.register(JobKind::DailySummary);

        let guard = registry.try_begin(JobKind::DailySummary).unwrap();
        assert!(registry.is_running(JobKind::DailySummary));
        let run_id = guard.run_id();
        guard.finish(JobResult::Succeeded);

        let status = registry.get_status(JobKind::DailySummary).unwrap();
        assert_eq!(status.state, JobState::Idle);
        assert_eq!(status.run_count, 1);
        assert_eq!(status.last_run_id, Some(run_id));
        assert_eq!(status.last_result, Some(JobResult::Succeeded));
    }

    #[test]
    fn test_overlapping_run_is_skipped() {
        let registry = JobRegistry::new();
        registry.register(JobKind::MonthlySummary);

        let guard = registry.try_begin(JobKind::MonthlySummary).unwrap();
        assert!(registry.try_begin(JobKind::MonthlySummary).is_none());

        let status = registry.get_status(JobKind::MonthlySummary).unwrap();
        assert_eq!(status.skip_count, 1);
        assert!(matches!(status.last_result, Some(JobResult::Skipped(_))));

        guard.finish(JobResult::Failed("store down".into()));
        let status = registry.get_status(JobKind::MonthlySummary).unwrap();
        assert_eq!(status.state, JobState::Idle);
        assert_eq!(status.error_count, 1);

        // Failed goes back to Idle, so the next firing runs.
        assert!(registry.try_begin(JobKind::MonthlySummary).is_some());
    }

    #[test]
    fn test_dropped_guard_records_failure() {
        let registry = JobRegistry::new();
        registry.register(JobKind::CacheRefresh);
        drop(registry.try_begin(JobKind::CacheRefresh));

        let status = registry.get_status(JobKind::CacheRefresh).unwrap();
        assert_eq!(status.state, JobState::Idle);
        assert_eq!(status.last_result, Some(JobResult::Failed("run aborted".into())));
    }

    #[test]
    fn test_unregistered_job() {
        let registry = JobRegistry::new();
        assert!(registry.try_begin(JobKind::HolidaySync).is_none());
        assert!(!registry.is_registered(JobKind::HolidaySync));
        assert!(registry.get_all_status().is_empty());
    }

    #[test]
    fn test_register_keeps_history() {
        let registry = JobRegistry::new();
        registry.register(JobKind::DailySummary);
        registry.set_schedule(JobKind::DailySummary, "0 0 2 * * *");
        registry
            .try_begin(JobKind::DailySummary)
            .unwrap()
            .finish(JobResult::Succeeded);
        registry.register(JobKind::DailySummary);

        let status = registry.get_status(JobKind::DailySummary).unwrap();
        assert_eq!(status.run_count, 1);
        assert_eq!(status.cron_expr.as_deref(), Some("0 0 2 * * *"));
    }
}
