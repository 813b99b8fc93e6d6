//! The attendance jobs run by the scheduler.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Days};
use tracing::info;

use crate::engine::aggregator::SummaryAggregator;
use crate::engine::holiday_calendar::HolidayCalendar;
use crate::model::summary::YearMonth;
use crate::scheduler::{AttendanceJob, JobContext, JobError, JobKind, JobReport, JobRequest, YearRefresh};

/// Recomputes daily records. Scheduled runs cover yesterday.
pub struct DailySummaryJob {
    aggregator: Arc<SummaryAggregator>,
}

impl DailySummaryJob {
    pub fn new(aggregator: Arc<SummaryAggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl AttendanceJob for DailySummaryJob {
    fn kind(&self) -> JobKind {
        JobKind::DailySummary
    }

    async fn run(&self, request: &JobRequest, ctx: &JobContext) -> Result<JobReport, JobError> {
        let (start, end) = match request {
            JobRequest::Scheduled => {
                let yesterday = ctx.today - Days::new(1);
                (yesterday, yesterday)
            }
            JobRequest::Date { date } => (*date, *date),
            JobRequest::Range { start, end } => (*start, *end),
            JobRequest::Month { year_month } => (year_month.first_day(), year_month.last_day()),
            JobRequest::Year { .. } => return Err(JobError::unsupported(self.kind(), request)),
        };

        let employees = self.aggregator.active_employees().await?;
        let report = self
            .aggregator
            .recompute_range(&employees, start, end, &ctx.cancel)
            .await?;
        Ok(JobReport::Days(report))
    }
}

/// Recomputes one month and its summaries. Scheduled runs cover the
/// previous month.
pub struct MonthlySummaryJob {
    aggregator: Arc<SummaryAggregator>,
}

impl MonthlySummaryJob {
    pub fn new(aggregator: Arc<SummaryAggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl AttendanceJob for MonthlySummaryJob {
    fn kind(&self) -> JobKind {
        JobKind::MonthlySummary
    }

    async fn run(&self, request: &JobRequest, ctx: &JobContext) -> Result<JobReport, JobError> {
        let year_month = match request {
            JobRequest::Scheduled => YearMonth::of(ctx.today).previous(),
            JobRequest::Month { year_month } => *year_month,
            JobRequest::Date { date } => YearMonth::of(*date),
            JobRequest::Range { .. } | JobRequest::Year { .. } => {
                return Err(JobError::unsupported(self.kind(), request));
            }
        };

        let report = self
            .aggregator
            .recompute_month(year_month, &ctx.cancel)
            .await?;
        Ok(JobReport::Month(report))
    }
}

async fn refresh_years(
    calendar: &HolidayCalendar,
    years: impl IntoIterator<Item = i32>,
    ctx: &JobContext,
) -> Result<JobReport, JobError> {
    let mut refreshed = Vec::new();
    for year in years {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let snapshot = calendar.refresh_cache(year).await?;
        refreshed.push(YearRefresh {
            year,
            holidays: snapshot.len(),
        });
    }
    Ok(JobReport::Holidays(refreshed))
}

/// Reloads holiday data from the store. Scheduled runs load the current
/// and the next year, so a newly published calendar is picked up.
pub struct HolidaySyncJob {
    calendar: Arc<HolidayCalendar>,
}

impl HolidaySyncJob {
    pub fn new(calendar: Arc<HolidayCalendar>) -> Self {
        Self { calendar }
    }
}

#[async_trait]
impl AttendanceJob for HolidaySyncJob {
    fn kind(&self) -> JobKind {
        JobKind::HolidaySync
    }

    async fn run(&self, request: &JobRequest, ctx: &JobContext) -> Result<JobReport, JobError> {
        let years = match request {
            JobRequest::Scheduled => vec![ctx.today.year(), ctx.today.year() + 1],
            JobRequest::Year { year } => vec![*year],
            _ => return Err(JobError::unsupported(self.kind(), request)),
        };
        refresh_years(&self.calendar, years, ctx).await
    }
}

/// Re-reads every cached year plus the current one.
pub struct CacheRefreshJob {
    calendar: Arc<HolidayCalendar>,
}

impl CacheRefreshJob {
    pub fn new(calendar: Arc<HolidayCalendar>) -> Self {
        Self { calendar }
    }
}

#[async_trait]
impl AttendanceJob for CacheRefreshJob {
    fn kind(&self) -> JobKind {
        JobKind::CacheRefresh
    }

    async fn run(&self, request: &JobRequest, ctx: &JobContext) -> Result<JobReport, JobError> {
        if *request != JobRequest::Scheduled {
            return Err(JobError::unsupported(self.kind(), request));
        }

        let mut years: BTreeSet<i32> = self.calendar.cached_years().into_iter().collect();
        years.insert(ctx.today.year());
        info!(years = ?years, "Refreshing cached holiday years");
        refresh_years(&self.calendar, years, ctx).await
    }
}

/// The four standard jobs over one aggregator.
pub fn attendance_jobs(aggregator: &Arc<SummaryAggregator>) -> Vec<Arc<dyn AttendanceJob>> {
    let calendar = aggregator.calendar().clone();
    vec![
        Arc::new(DailySummaryJob::new(aggregator.clone())),
        Arc::new(MonthlySummaryJob::new(aggregator.clone())),
        Arc::new(HolidaySyncJob::new(calendar.clone())),
        Arc::new(CacheRefreshJob::new(calendar)),
    ]
}
