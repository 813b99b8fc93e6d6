use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::engine::aggregator::SummaryAggregator;
use crate::error::AttendanceError;
use crate::scheduler::Scheduler;
use crate::store::StoreError;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPolicy {
    pub employee_id: u64,
    pub policy_id: u64,
    #[schema(value_type = String, format = Date, example = "2024-04-01")]
    pub effective_start: NaiveDate,
}

/// Assign a work-time policy
#[utoipa::path(
    post,
    path = "/api/assignments",
    request_body(
        content = AssignPolicy,
        description = "Employee, policy and first effective day",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Assignment rows written", body = Object, example = json!({
            "message": "Policy assigned",
            "assignments": [{
                "id": 12,
                "employee_id": 7,
                "policy_id": 2,
                "effective_start": "2024-04-01",
                "effective_end": null,
                "is_current": true,
                "active": true,
                "created_at": "2024-03-28T09:12:44Z"
            }]
        })),
        (status = 400, description = "Overlapping interval or invalid policy", body = Object, example = json!({
            "message": "invalid policy assignment: employee 7 interval starting 2024-01-01 overlaps assignments [12]"
        })),
        (status = 404, description = "Policy not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Assignments"
)]
pub async fn assign_policy(
    aggregator: web::Data<SummaryAggregator>,
    scheduler: web::Data<Scheduler>,
    payload: web::Json<AssignPolicy>,
) -> impl Responder {
    let AssignPolicy {
        employee_id,
        policy_id,
        effective_start,
    } = payload.into_inner();

    let result = aggregator
        .resolver()
        .assign_policy(employee_id, policy_id, effective_start, scheduler.today())
        .await;

    match result {
        Ok(assignments) => HttpResponse::Ok().json(serde_json::json!({
            "message": "Policy assigned",
            "assignments": assignments
        })),
        Err(e @ (AttendanceError::InvalidAssignment(_) | AttendanceError::InvalidPolicy { .. })) => {
            HttpResponse::BadRequest().json(serde_json::json!({ "message": e.to_string() }))
        }
        Err(AttendanceError::StoreUnavailable(StoreError::NotFound { .. })) => {
            HttpResponse::NotFound().json(serde_json::json!({ "message": "Policy not found" }))
        }
        Err(e) => {
            tracing::error!(error = %e, employee_id, policy_id, "Policy assignment failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "message": "Internal Server Error"
            }))
        }
    }
}
