use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::engine::holiday_calendar::HolidayCalendar;
use crate::model::holiday::{HolidayEntry, HolidayType};
use crate::model::summary::YearMonth;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertHoliday {
    #[schema(value_type = String, format = Date, example = "2024-10-01")]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "statutory")]
    pub holiday_type: HolidayType,
    pub name: Option<String>,
}

fn month_of(year: i32, month: u32) -> Result<YearMonth, HttpResponse> {
    YearMonth::new(year, month).ok_or_else(|| {
        HttpResponse::BadRequest().json(serde_json::json!({
            "message": "month must be between 1 and 12"
        }))
    })
}

fn unavailable(e: impl std::fmt::Display, year_month: YearMonth) -> HttpResponse {
    tracing::error!(error = %e, %year_month, "Holiday lookup failed");
    HttpResponse::ServiceUnavailable().json(serde_json::json!({
        "message": "Holiday data unavailable"
    }))
}

/// Holiday count for a month
#[utoipa::path(
    get,
    path = "/api/holidays/{year}/{month}/count",
    params(
        ("year" = i32, Path, description = "Calendar year"),
        ("month" = u32, Path, description = "Month, 1-12")
    ),
    responses(
        (status = 200, description = "Rest days and special workdays in the month", body = Object, example = json!({
            "rest_days": 3,
            "special_workdays": 1
        })),
        (status = 400, description = "Invalid month"),
        (status = 503, description = "Holiday store unavailable")
    ),
    tag = "Holidays"
)]
pub async fn holiday_count(
    calendar: web::Data<HolidayCalendar>,
    path: web::Path<(i32, u32)>,
) -> impl Responder {
    let (year, month) = path.into_inner();
    let year_month = match month_of(year, month) {
        Ok(year_month) => year_month,
        Err(response) => return response,
    };

    match calendar.count_holidays(year, month).await {
        Ok(count) => HttpResponse::Ok().json(count),
        Err(e) => unavailable(e, year_month),
    }
}

/// Holidays of a month
#[utoipa::path(
    get,
    path = "/api/holidays/{year}/{month}",
    params(
        ("year" = i32, Path, description = "Calendar year"),
        ("month" = u32, Path, description = "Month, 1-12")
    ),
    responses(
        (status = 200, description = "Active holidays ordered by date", body = Object, example = json!([{
            "date": "2024-10-01",
            "holiday_type": "statutory",
            "year": 2024,
            "month": 10,
            "day": 1,
            "active": true,
            "name": "National Day"
        }])),
        (status = 400, description = "Invalid month"),
        (status = 503, description = "Holiday store unavailable")
    ),
    tag = "Holidays"
)]
pub async fn holidays_in_month(
    calendar: web::Data<HolidayCalendar>,
    path: web::Path<(i32, u32)>,
) -> impl Responder {
    let (year, month) = path.into_inner();
    let year_month = match month_of(year, month) {
        Ok(year_month) => year_month,
        Err(response) => return response,
    };

    match calendar.holidays_in_month(year, month).await {
        Ok(holidays) => HttpResponse::Ok().json(holidays),
        Err(e) => unavailable(e, year_month),
    }
}

/// Create or replace the holiday on a date
#[utoipa::path(
    put,
    path = "/api/holidays",
    request_body(
        content = UpsertHoliday,
        description = "statutory, company, special_workday or other",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Holiday stored and its year reloaded", body = Object, example = json!({
            "message": "Holiday saved"
        })),
        (status = 503, description = "Holiday store unavailable")
    ),
    tag = "Holidays"
)]
pub async fn upsert_holiday(
    calendar: web::Data<HolidayCalendar>,
    payload: web::Json<UpsertHoliday>,
) -> impl Responder {
    let UpsertHoliday {
        date,
        holiday_type,
        name,
    } = payload.into_inner();

    match calendar
        .upsert_holiday(HolidayEntry::new(date, holiday_type, name))
        .await
    {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "message": "Holiday saved" })),
        Err(e) => unavailable(e, YearMonth::of(date)),
    }
}
