//! Periodic and manual execution of attendance jobs.
//!
//! A job is an [`AttendanceJob`] ("what") registered under a [`JobKind`];
//! cron expressions ("when") are attached at [`Scheduler::start`]. Cron
//! firings and manual [`Scheduler::trigger`] calls take the same path, so a
//! firing that finds the job Running is skipped whichever way it came in.

pub mod jobs;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::aggregator::{BatchReport, MonthReport};
use crate::error::AttendanceError;
use crate::model::summary::YearMonth;
use crate::store::StoreError;

use self::registry::{JobRegistry, JobResult};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JobKind {
    DailySummary,
    MonthlySummary,
    HolidaySync,
    CacheRefresh,
}

impl JobKind {
    /// Six-field cron expression used when none is configured.
    pub fn default_cron(self) -> &'static str {
        match self {
            JobKind::DailySummary => "0 0 2 * * *",
            JobKind::MonthlySummary => "0 0 3 1 * *",
            JobKind::HolidaySync => "0 0 4 1 * *",
            JobKind::CacheRefresh => "0 30 1 * * *",
        }
    }
}

/// What a single run should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobRequest {
    /// The job's own default period, relative to today.
    Scheduled,
    Date { date: NaiveDate },
    Range { start: NaiveDate, end: NaiveDate },
    Month { year_month: YearMonth },
    Year { year: i32 },
}

pub struct JobContext {
    /// Current date in the scheduler timezone.
    pub today: NaiveDate,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearRefresh {
    pub year: i32,
    pub holidays: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "report", rename_all = "snake_case")]
pub enum JobReport {
    Days(BatchReport),
    Month(MonthReport),
    Holidays(Vec<YearRefresh>),
}

impl JobReport {
    pub fn is_clean(&self) -> bool {
        match self {
            JobReport::Days(report) => report.is_clean(),
            JobReport::Month(report) => {
                report.days.is_clean() && report.monthly_failures.is_empty()
            }
            JobReport::Holidays(_) => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{job} does not accept a {request} request")]
    Unsupported { job: JobKind, request: String },

    #[error(transparent)]
    Attendance(#[from] AttendanceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    /// The request itself was wrong, as opposed to the run failing.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            JobError::Unsupported { .. }
                | JobError::Attendance(AttendanceError::InvalidRange { .. })
        )
    }

    pub(crate) fn unsupported(job: JobKind, request: &JobRequest) -> Self {
        let request = match request {
            JobRequest::Scheduled => "scheduled",
            JobRequest::Date { .. } => "date",
            JobRequest::Range { .. } => "range",
            JobRequest::Month { .. } => "month",
            JobRequest::Year { .. } => "year",
        };
        JobError::Unsupported {
            job,
            request: request.to_string(),
        }
    }
}

#[async_trait]
pub trait AttendanceJob: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn run(&self, request: &JobRequest, ctx: &JobContext) -> Result<JobReport, JobError>;
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("{job} failed: {source}")]
    JobFailed {
        job: JobKind,
        run_id: Uuid,
        #[source]
        source: JobError,
    },
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { run_id: Uuid, report: JobReport },
    Skipped { reason: String },
}

pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(format!("'{expr}': {e}")))
}

pub fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    name.parse()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

pub struct Scheduler {
    jobs: HashMap<JobKind, Arc<dyn AttendanceJob>>,
    registry: JobRegistry,
    timezone: Tz,
    shutdown: CancellationToken,
    cron: Mutex<Option<JobScheduler>>,
}

impl Scheduler {
    pub fn new(timezone: Tz) -> Self {
        Self {
            jobs: HashMap::new(),
            registry: JobRegistry::new(),
            timezone,
            shutdown: CancellationToken::new(),
            cron: Mutex::new(None),
        }
    }

    pub fn register(&mut self, job: Arc<dyn AttendanceJob>) {
        let kind = job.kind();
        self.registry.register(kind);
        self.jobs.insert(kind, job);
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Runs a job now, relative to today in the scheduler timezone.
    pub async fn trigger(
        &self,
        kind: JobKind,
        request: JobRequest,
    ) -> Result<JobOutcome, SchedulerError> {
        self.run_as_of(kind, request, self.today()).await
    }

    /// Runs a job on its own task. Dropping the handle leaves the run going,
    /// so it still reaches the registry with a complete or partial report.
    pub fn spawn_trigger(
        self: &Arc<Self>,
        kind: JobKind,
        request: JobRequest,
    ) -> JoinHandle<Result<JobOutcome, SchedulerError>> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.trigger(kind, request).await })
    }

    /// Runs a job as if today were `today`.
    pub async fn run_as_of(
        &self,
        kind: JobKind,
        request: JobRequest,
        today: NaiveDate,
    ) -> Result<JobOutcome, SchedulerError> {
        let job = self
            .jobs
            .get(&kind)
            .ok_or_else(|| SchedulerError::JobNotFound(kind.to_string()))?;

        let Some(guard) = self.registry.try_begin(kind) else {
            warn!(job = %kind, ?request, "Previous run still active, skipping");
            return Ok(JobOutcome::Skipped {
                reason: format!("{kind} is already running"),
            });
        };
        let run_id = guard.run_id();
        info!(job = %kind, %run_id, ?request, "Job started");

        let ctx = JobContext {
            today,
            cancel: self.shutdown.child_token(),
        };
        match job.run(&request, &ctx).await {
            Ok(report) => {
                if report.is_clean() {
                    info!(job = %kind, %run_id, "Job succeeded");
                } else {
                    warn!(job = %kind, %run_id, "Job finished with item failures");
                }
                guard.finish(JobResult::Succeeded);
                Ok(JobOutcome::Completed { run_id, report })
            }
            Err(e) => {
                error!(job = %kind, %run_id, error = %e, "Job failed");
                guard.finish(JobResult::Failed(e.to_string()));
                Err(SchedulerError::JobFailed {
                    job: kind,
                    run_id,
                    source: e,
                })
            }
        }
    }

    /// Attaches a cron schedule to each listed job and starts firing.
    pub async fn start(
        self: &Arc<Self>,
        schedules: &[(JobKind, String)],
    ) -> Result<(), SchedulerError> {
        let mut cron = self.cron.lock().await;
        if cron.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let sched = JobScheduler::new().await?;
        for (kind, expr) in schedules {
            let kind = *kind;
            if !self.jobs.contains_key(&kind) {
                return Err(SchedulerError::JobNotFound(kind.to_string()));
            }
            validate_cron_expression(expr)?;

            let scheduler = Arc::downgrade(self);
            let job = Job::new_async_tz(expr.as_str(), self.timezone, move |_uuid, _lock| {
                let scheduler = scheduler.clone();
                Box::pin(async move {
                    let Some(scheduler) = scheduler.upgrade() else {
                        return;
                    };
                    match scheduler.trigger(kind, JobRequest::Scheduled).await {
                        Ok(JobOutcome::Completed { .. }) => {}
                        Ok(JobOutcome::Skipped { reason }) => {
                            info!(job = %kind, %reason, "Scheduled firing dropped");
                        }
                        // Already logged; the next firing is the retry.
                        Err(_) => {}
                    }
                })
            })
            .map_err(|e| SchedulerError::InvalidCron(format!("'{expr}': {e}")))?;

            let uuid = sched.add(job).await?;
            self.registry.set_schedule(kind, expr);
            info!(job = %kind, %uuid, cron = %expr, timezone = %self.timezone.name(), "Job scheduled");
        }

        sched.start().await?;
        *cron = Some(sched);
        info!("Scheduler started");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops cron firings, cancels in-flight runs and waits up to `timeout`
    /// for them to report.
    pub async fn shutdown(&self, timeout: Duration) {
        info!("Initiating scheduler shutdown");
        self.shutdown.cancel();

        if let Some(mut sched) = self.cron.lock().await.take() {
            if let Err(e) = sched.shutdown().await {
                warn!(error = %e, "Error during scheduler shutdown");
            }
        }

        let drained = tokio::time::timeout(timeout, async {
            while self.registry.any_running() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Jobs still running at shutdown timeout");
        }
        info!("Scheduler shutdown complete");
    }
}
