use crate::api::assignment::AssignPolicy;
use crate::api::holiday::UpsertHoliday;
use crate::api::jobs::RunJobBody;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HRM Attendance API",
        version = "1.0.0",
        description = r#"
## Attendance computation

Operator API of the attendance engine. Daily records are derived from clock
events, the employee's work-time policy, the holiday calendar and approved
leave; monthly summaries fold the daily records.

### Jobs
- **daily-summary**: recompute daily records (default: yesterday)
- **monthly-summary**: recompute a month and overwrite its summaries (default: previous month)
- **holiday-sync**: reload holiday data for the current and next year
- **cache-refresh**: reload every cached holiday year

Recomputation is idempotent, so any job can be re-run manually with the same
inputs without double counting. A run requested while the job is already
running is skipped with `409`.

---
Built with **Rust**, **Actix Web**, **SQLx**, **tokio-cron-scheduler** and **Utoipa**.
"#,
    ),
    paths(
        crate::api::jobs::run_job,
        crate::api::jobs::list_jobs,

        crate::api::holiday::holiday_count,
        crate::api::holiday::holidays_in_month,
        crate::api::holiday::upsert_holiday,

        crate::api::assignment::assign_policy,

        crate::api::attendance::recompute_day,
        crate::api::attendance::month_records
    ),
    components(
        schemas(
            RunJobBody,
            UpsertHoliday,
            AssignPolicy
        )
    ),
    tags(
        (name = "Jobs", description = "Scheduled job status and manual runs"),
        (name = "Holidays", description = "Holiday calendar"),
        (name = "Assignments", description = "Work-time policy assignment"),
        (name = "Attendance", description = "Daily attendance records"),
    )
)]
pub struct ApiDoc;
