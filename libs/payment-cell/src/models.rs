// libs/payment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use shared_models::status::{AppointmentStatus, PaymentStatus};

/// Payment row, 1:1 with an appointment. `amount` is frozen at booking
/// time; `transaction_id` is the external correlation key;
/// `gateway_event_id` records the last applied gateway event for
/// idempotent reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub amount: f64,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub gateway_event_id: Option<String>,
    pub gateway_response: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Minimal appointment projection used by reconciliation paths; the full
/// appointment model belongs to the appointment cell.
#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentRef {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
}

// ==============================================================================
// GATEWAY MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Result of session creation handed back to the booking flow.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub payment_url: String,
    pub transaction_id: String,
}

/// What a reconciliation attempt did to the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// State transitioned (or was re-affirmed) to the given status.
    Applied(PaymentStatus),
    /// The event id was seen before; nothing was written.
    AlreadyProcessed,
    /// The appointment was no longer `scheduled`; nothing was written.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSummary {
    pub appointment_id: Uuid,
    pub payment_id: Uuid,
    pub status: PaymentStatus,
}

// ==============================================================================
// QUERY MODELS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct IpnQuery {
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateSessionQuery {
    pub session_id: String,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment not found")]
    NotFound,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Payment already completed for this appointment")]
    AlreadySettled,

    #[error("Cannot pay for a canceled appointment")]
    AppointmentCanceled,

    #[error("Gateway session metadata is missing")]
    MissingMetadata,

    #[error("Forbidden")]
    Forbidden,

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
