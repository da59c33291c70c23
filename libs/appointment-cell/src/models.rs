// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use schedule_cell::models::{Schedule, ScheduleError};
use shared_models::profiles::{Doctor, Patient};
use shared_models::status::{AppointmentStatus, PaymentStatus};

use payment_cell::models::PaymentError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// One patient's claim on one (doctor, schedule) slot. The pair is unique
/// among non-canceled appointments; the slot ledger enforces it at claim
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
    pub video_calling_id: String,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Appointment with its related rows, returned by the pay-later flow so the
/// client can render the reservation without further lookups.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentDetail {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient: Patient,
    pub doctor: Doctor,
    pub schedule: Schedule,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct MyAppointmentsQuery {
    pub status: Option<AppointmentStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl MyAppointmentsQuery {
    pub fn pagination(&self) -> shared_utils::pagination::PaginationOptions {
        shared_utils::pagination::PaginationOptions {
            page: self.page,
            limit: self.limit,
            sort_by: self.sort_by.clone(),
            sort_order: self.sort_order.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AllAppointmentsQuery {
    pub status: Option<AppointmentStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub patient_email: Option<String>,
    pub doctor_email: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl AllAppointmentsQuery {
    pub fn pagination(&self) -> shared_utils::pagination::PaginationOptions {
        shared_utils::pagination::PaginationOptions {
            page: self.page,
            limit: self.limit,
            sort_by: self.sort_by.clone(),
            sort_order: self.sort_order.clone(),
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Appointment slot is not available")]
    SlotUnavailable,

    #[error("Payment already completed for this appointment")]
    PaymentAlreadySettled,

    #[error("Cannot pay for a canceled appointment")]
    AppointmentCanceled,

    #[error("Appointment is in terminal status {0}")]
    TerminalState(AppointmentStatus),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<ScheduleError> for AppointmentError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::SlotUnavailable => AppointmentError::SlotUnavailable,
            ScheduleError::DoctorNotFound => AppointmentError::DoctorNotFound,
            other => AppointmentError::DatabaseError(other.to_string()),
        }
    }
}

impl From<PaymentError> for AppointmentError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::AlreadySettled => AppointmentError::PaymentAlreadySettled,
            PaymentError::AppointmentCanceled => AppointmentError::AppointmentCanceled,
            PaymentError::GatewayError(msg) => AppointmentError::GatewayError(msg),
            PaymentError::DatabaseError(msg) => AppointmentError::DatabaseError(msg),
            other => AppointmentError::DatabaseError(other.to_string()),
        }
    }
}
