// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::HeaderMap,
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
    AllAppointmentsQuery, AppointmentError, BookAppointmentRequest, MyAppointmentsQuery,
    UpdateStatusRequest,
};
use crate::services::booking::AppointmentBookingService;

fn map_appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::DoctorNotFound => AppError::NotFound("Doctor not found".to_string()),
        AppointmentError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
        AppointmentError::SlotUnavailable => {
            AppError::Conflict("Appointment slot is not available".to_string())
        }
        AppointmentError::PaymentAlreadySettled => {
            AppError::BadRequest("Payment already completed for this appointment".to_string())
        }
        AppointmentError::AppointmentCanceled => {
            AppError::BadRequest("Cannot pay for a canceled appointment".to_string())
        }
        AppointmentError::TerminalState(status) => {
            AppError::BadRequest(format!("Appointment is in terminal status {}", status))
        }
        AppointmentError::InvalidTransition { from, to } => {
            AppError::BadRequest(format!("Invalid status transition from {} to {}", from, to))
        }
        AppointmentError::Forbidden(msg) => AppError::Forbidden(msg),
        AppointmentError::GatewayError(msg) => AppError::ExternalService(msg),
        AppointmentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get("origin").and_then(|v| v.to_str().ok())
}

/// Pay-now booking: returns the gateway redirect for immediate checkout.
#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_patient() {
        return Err(AppError::Forbidden("Only patients can book appointments".to_string()));
    }

    let service = AppointmentBookingService::new(&state);
    let session = service
        .book_pay_now(&user, request, request_origin(&headers), auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "payment_url": session.payment_url,
    })))
}

/// Pay-later booking: the reservation is held unpaid until the reclaimer's
/// grace window runs out.
#[axum::debug_handler]
pub async fn book_appointment_pay_later(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_patient() {
        return Err(AppError::Forbidden("Only patients can book appointments".to_string()));
    }

    let service = AppointmentBookingService::new(&state);
    let detail = service
        .book_pay_later(&user, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": detail,
    })))
}

#[axum::debug_handler]
pub async fn initiate_payment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if !user.is_patient() {
        return Err(AppError::Forbidden("Only patients can initiate payment".to_string()));
    }

    let service = AppointmentBookingService::new(&state);
    let session = service
        .initiate_payment(appointment_id, &user, request_origin(&headers), auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "payment_url": session.payment_url,
        "transaction_id": session.transaction_id,
    })))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_doctor() && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Only doctors and admins can change appointment status".to_string(),
        ));
    }

    let service = AppointmentBookingService::new(&state);
    let updated = service
        .update_status(appointment_id, request.status, &user, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": updated,
    })))
}

#[axum::debug_handler]
pub async fn my_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<MyAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let paging = pagination::calculate(&query.pagination());
    let service = AppointmentBookingService::new(&state);
    let data = service
        .my_appointments(&user, &query, &paging, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "meta": { "page": paging.page, "limit": paging.limit },
        "data": data,
    })))
}

#[axum::debug_handler]
pub async fn all_appointments(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Query(query): Query<AllAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only admins can list all appointments".to_string()));
    }

    let paging = pagination::calculate(&query.pagination());
    let service = AppointmentBookingService::new(&state);
    let data = service
        .all_appointments(&query, &paging)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "meta": { "page": paging.page, "limit": paging.limit },
        "data": data,
    })))
}
