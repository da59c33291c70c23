// libs/schedule-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::pagination;

use crate::models::{
    AssignSchedulesRequest, CreateScheduleRequest, MyScheduleQuery, ScheduleError,
    ScheduleListQuery,
};
use crate::services::{DoctorScheduleService, ScheduleService};

fn map_schedule_error(e: ScheduleError) -> AppError {
    match e {
        ScheduleError::NotFound => AppError::NotFound("Schedule not found".to_string()),
        ScheduleError::DoctorNotFound => {
            AppError::NotFound("Doctor profile not found for this account".to_string())
        }
        ScheduleError::InvalidScheduleIds => {
            AppError::BadRequest("One or more schedule ids are invalid".to_string())
        }
        ScheduleError::SlotUnavailable => {
            AppError::Conflict("Slot is not available".to_string())
        }
        ScheduleError::InvalidTimeWindow(msg) => AppError::BadRequest(msg),
        ScheduleError::StillAssigned => {
            AppError::Conflict("Schedule is assigned to a doctor".to_string())
        }
        ScheduleError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Admin-only slot generation over a date range and daily time window.
#[axum::debug_handler]
pub async fn create_schedules(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only admins can create schedules".to_string()));
    }

    let service = ScheduleService::new(&state);
    let created = service.generate(request).await.map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "count": created.len(),
        "data": created,
    })))
}

/// Schedules the calling doctor has not opted into yet.
#[axum::debug_handler]
pub async fn list_schedules(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<ScheduleListQuery>,
) -> Result<Json<Value>, AppError> {
    let email = user
        .email
        .clone()
        .ok_or_else(|| AppError::Auth("Missing user email".to_string()))?;

    if !user.is_doctor() && !user.is_admin() {
        return Err(AppError::Forbidden("Only doctors can list schedules".to_string()));
    }

    let paging = pagination::calculate(&query.pagination());
    let service = ScheduleService::new(&state);
    let data = service
        .list_available_for_doctor(&email, &query, &paging, auth.token())
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "meta": { "page": paging.page, "limit": paging.limit },
        "data": data,
    })))
}

#[axum::debug_handler]
pub async fn delete_schedule(
    State(state): State<Arc<AppConfig>>,
    Path(schedule_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only admins can delete schedules".to_string()));
    }

    let service = ScheduleService::new(&state);
    service.delete(schedule_id).await.map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Schedule deleted"
    })))
}

/// Doctor opts into a batch of schedules at once.
#[axum::debug_handler]
pub async fn assign_schedules(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<AssignSchedulesRequest>,
) -> Result<Json<Value>, AppError> {
    let email = user
        .email
        .clone()
        .ok_or_else(|| AppError::Auth("Missing user email".to_string()))?;

    if !user.is_doctor() && !user.is_admin() {
        return Err(AppError::Forbidden("Only doctors can assign schedules".to_string()));
    }

    let service = DoctorScheduleService::new(&state);
    let created = service
        .assign(&email, &request.schedule_ids, auth.token())
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "count": created.len(),
        "data": created,
    })))
}

#[axum::debug_handler]
pub async fn my_schedules(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<MyScheduleQuery>,
) -> Result<Json<Value>, AppError> {
    let email = user
        .email
        .clone()
        .ok_or_else(|| AppError::Auth("Missing user email".to_string()))?;

    if !user.is_doctor() && !user.is_admin() {
        return Err(AppError::Forbidden("Only doctors have schedule assignments".to_string()));
    }

    let paging = pagination::calculate(&query.pagination());
    let service = DoctorScheduleService::new(&state);
    let data = service
        .my_schedules(&email, &query, &paging, auth.token())
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "meta": { "page": paging.page, "limit": paging.limit },
        "data": data,
    })))
}
