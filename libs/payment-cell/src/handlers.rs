// libs/payment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, warn};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{IpnQuery, PaymentError, StripeEvent, ValidateSessionQuery};
use crate::services::reconcile::ReconciliationService;
use crate::services::stripe::verify_webhook_signature;

pub fn map_payment_error(e: PaymentError) -> AppError {
    match e {
        PaymentError::NotFound => AppError::NotFound("Payment not found".to_string()),
        PaymentError::AppointmentNotFound => {
            AppError::NotFound("Appointment not found".to_string())
        }
        PaymentError::AlreadySettled => {
            AppError::BadRequest("Payment already completed for this appointment".to_string())
        }
        PaymentError::AppointmentCanceled => {
            AppError::BadRequest("Cannot pay for a canceled appointment".to_string())
        }
        PaymentError::MissingMetadata => {
            AppError::BadRequest("Gateway session metadata is missing".to_string())
        }
        PaymentError::Forbidden => AppError::Forbidden("Forbidden".to_string()),
        PaymentError::InvalidSignature(msg) => AppError::BadRequest(msg),
        PaymentError::GatewayError(msg) => AppError::ExternalService(msg),
        PaymentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Gateway webhook. Authenticated by signature, not by user session. Beyond
/// the signature check, failures are acknowledged with a 200; erroring
/// here only makes the gateway redeliver an event we already logged.
#[axum::debug_handler]
pub async fn stripe_webhook(
    State(state): State<Arc<AppConfig>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    verify_webhook_signature(
        &body,
        signature,
        &state.stripe_webhook_secret,
        Utc::now().timestamp(),
    )
    .map_err(map_payment_error)?;

    let event: StripeEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Malformed webhook payload: {}", e);
            return Ok(Json(json!({ "received": true })));
        }
    };

    let service = ReconciliationService::new(&state);
    match service.handle_webhook_event(event).await {
        Ok(_) => {}
        Err(e) => {
            error!("Webhook processing failed: {}", e);
        }
    }

    Ok(Json(json!({ "received": true })))
}

/// Out-of-band confirmation callback keyed by transaction id.
#[axum::debug_handler]
pub async fn ipn_callback(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<IpnQuery>,
) -> Result<Json<Value>, AppError> {
    let service = ReconciliationService::new(&state);
    let summary = service
        .validate_ipn(&query.transaction_id, &query.status)
        .await
        .map_err(map_payment_error)?;

    Ok(Json(json!({
        "success": true,
        "data": summary,
    })))
}

/// Authenticated polling validation, used when webhook delivery is
/// unavailable. The caller must own the appointment.
#[axum::debug_handler]
pub async fn validate_stripe_session(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Query(query): Query<ValidateSessionQuery>,
) -> Result<Json<Value>, AppError> {
    let service = ReconciliationService::new(&state);
    let summary = service
        .validate_session(&query.session_id, &user)
        .await
        .map_err(map_payment_error)?;

    Ok(Json(json!({
        "success": true,
        "data": summary,
    })))
}
