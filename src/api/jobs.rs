use std::str::FromStr;

use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::model::summary::YearMonth;
use crate::scheduler::{JobKind, JobOutcome, JobRequest, Scheduler, SchedulerError};

/// Body of a manual run. Leave it empty (or `{}`) for the job's default period.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RunJobBody {
    #[schema(value_type = Option<String>, format = Date, example = "2024-03-04")]
    pub date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub start_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub end_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, example = "2024-03")]
    pub year_month: Option<YearMonth>,
    pub year: Option<i32>,
}

impl TryFrom<RunJobBody> for JobRequest {
    type Error = &'static str;

    fn try_from(body: RunJobBody) -> Result<Self, Self::Error> {
        match body {
            RunJobBody {
                date: None,
                start_date: None,
                end_date: None,
                year_month: None,
                year: None,
            } => Ok(JobRequest::Scheduled),
            RunJobBody {
                date: Some(date),
                start_date: None,
                end_date: None,
                year_month: None,
                year: None,
            } => Ok(JobRequest::Date { date }),
            RunJobBody {
                date: None,
                start_date: Some(start),
                end_date: Some(end),
                year_month: None,
                year: None,
            } => Ok(JobRequest::Range { start, end }),
            RunJobBody {
                date: None,
                start_date: None,
                end_date: None,
                year_month: Some(year_month),
                year: None,
            } => Ok(JobRequest::Month { year_month }),
            RunJobBody {
                date: None,
                start_date: None,
                end_date: None,
                year_month: None,
                year: Some(year),
            } => Ok(JobRequest::Year { year }),
            _ => Err("give one of: date, start_date with end_date, year_month, year"),
        }
    }
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "message": message.into() }))
}

/// Run a job now
#[utoipa::path(
    post,
    path = "/api/jobs/{job}/run",
    params(
        ("job" = String, Path, description = "daily-summary, monthly-summary, holiday-sync or cache-refresh")
    ),
    request_body(
        content = RunJobBody,
        description = "Period to cover; empty for the job's default",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Job ran; the report lists per-item failures", body = Object, example = json!({
            "outcome": "completed",
            "run_id": "6f1c1f7e-8d0e-4b7e-9a43-0c4f0f4c1a52",
            "report": { "kind": "days", "report": { "written": 120, "failures": [], "conflicts": [], "unconfigured": [], "degraded": [], "cancelled": false } }
        })),
        (status = 400, description = "Bad request", body = Object, example = json!({
            "message": "invalid date range: 2024-03-08 is after 2024-03-04"
        })),
        (status = 404, description = "Unknown job"),
        (status = 409, description = "Job is already running", body = Object, example = json!({
            "outcome": "skipped",
            "reason": "daily-summary is already running"
        })),
        (status = 500, description = "Job could not start")
    ),
    tag = "Jobs"
)]
pub async fn run_job(
    scheduler: web::Data<Scheduler>,
    path: web::Path<String>,
    body: web::Bytes,
) -> actix_web::Result<impl Responder> {
    let Ok(kind) = JobKind::from_str(&path.into_inner()) else {
        return Ok(HttpResponse::NotFound().json(serde_json::json!({
            "message": "Unknown job"
        })));
    };

    let body: RunJobBody = if body.iter().all(u8::is_ascii_whitespace) {
        RunJobBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => return Ok(bad_request(e.to_string())),
        }
    };
    let request = match JobRequest::try_from(body) {
        Ok(request) => request,
        Err(message) => return Ok(bad_request(message)),
    };

    // Detached from the request, so a dropped connection does not abort the run.
    let run = match scheduler.into_inner().spawn_trigger(kind, request).await {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(job = %kind, error = %e, "Manual job run panicked");
            return Ok(HttpResponse::InternalServerError().json(serde_json::json!({
                "message": "Job run aborted"
            })));
        }
    };

    match run {
        Ok(outcome @ JobOutcome::Completed { .. }) => Ok(HttpResponse::Ok().json(outcome)),
        Ok(outcome @ JobOutcome::Skipped { .. }) => Ok(HttpResponse::Conflict().json(outcome)),
        Err(SchedulerError::JobFailed { source, .. }) if source.is_bad_request() => {
            Ok(bad_request(source.to_string()))
        }
        Err(SchedulerError::JobNotFound(_)) => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "message": "Unknown job"
        }))),
        Err(e) => {
            tracing::error!(job = %kind, error = %e, "Manual job run failed");
            Ok(HttpResponse::InternalServerError().json(serde_json::json!({
                "message": e.to_string()
            })))
        }
    }
}

/// Job registry snapshot
#[utoipa::path(
    get,
    path = "/api/jobs",
    responses(
        (status = 200, description = "State, schedule and last result of every job", body = Object, example = json!([{
            "job": "daily-summary",
            "cron_expr": "0 0 2 * * *",
            "state": "idle",
            "last_run_id": null,
            "last_run": null,
            "last_duration_ms": null,
            "last_result": null,
            "run_count": 0,
            "error_count": 0,
            "skip_count": 0
        }]))
    ),
    tag = "Jobs"
)]
pub async fn list_jobs(scheduler: web::Data<Scheduler>) -> impl Responder {
    HttpResponse::Ok().json(scheduler.registry().get_all_status())
}
