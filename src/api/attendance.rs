use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDate;

use crate::engine::aggregator::SummaryAggregator;
use crate::error::AttendanceError;
use crate::model::summary::YearMonth;

/// Recompute one employee-day
#[utoipa::path(
    post,
    path = "/api/attendance/{employee_id}/{date}/recompute",
    params(
        ("employee_id" = u64, Path, description = "Employee ID"),
        ("date" = String, Path, description = "Day to recompute, YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Stored record after recomputation", body = Object, example = json!({
            "employee_id": 7,
            "date": "2024-03-04",
            "status": "late",
            "worked_minutes": 495,
            "first_clock_in": "2024-03-04T09:45:00",
            "last_clock_out": "2024-03-04T18:00:00",
            "policy_id_used": 1,
            "holiday_type": null,
            "anomalies": [{ "kind": "late_arrival", "minutes": 15 }]
        })),
        (status = 503, description = "A backing store is unavailable")
    ),
    tag = "Attendance"
)]
pub async fn recompute_day(
    aggregator: web::Data<SummaryAggregator>,
    path: web::Path<(u64, NaiveDate)>,
) -> impl Responder {
    let (employee_id, date) = path.into_inner();

    match aggregator.recompute_day(employee_id, date).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(e @ AttendanceError::StoreUnavailable(_)) => {
            tracing::warn!(error = %e, employee_id, %date, "Recompute failed");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "message": e.to_string()
            }))
        }
        Err(e) => {
            tracing::error!(error = %e, employee_id, %date, "Recompute failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "message": "Internal Server Error"
            }))
        }
    }
}

/// Daily records of a month
#[utoipa::path(
    get,
    path = "/api/attendance/{employee_id}/{year_month}",
    params(
        ("employee_id" = u64, Path, description = "Employee ID"),
        ("year_month" = String, Path, description = "Month, YYYY-MM")
    ),
    responses(
        (status = 200, description = "Stored daily records ordered by date", body = Object),
        (status = 503, description = "Summary store unavailable")
    ),
    tag = "Attendance"
)]
pub async fn month_records(
    aggregator: web::Data<SummaryAggregator>,
    path: web::Path<(u64, YearMonth)>,
) -> impl Responder {
    let (employee_id, year_month) = path.into_inner();

    match aggregator.daily_records(employee_id, year_month).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            tracing::error!(error = %e, employee_id, %year_month, "Listing daily records failed");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "message": "Summary data unavailable"
            }))
        }
    }
}
