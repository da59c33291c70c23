// libs/schedule-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fixed calendar interval `[start_date_time, end_date_time)`. Global,
/// immutable once created; doctors opt in through `DoctorSchedule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Join row binding a doctor to a schedule. `is_booked` is the slot ledger
/// bit; `appointment_id` is a weak back-reference for lookup only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorSchedule {
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
    pub is_booked: bool,
    pub appointment_id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Daily window start, `HH:MM`.
    pub start_time: String,
    /// Daily window end, `HH:MM`.
    pub end_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignSchedulesRequest {
    pub schedule_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleListQuery {
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ScheduleListQuery {
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
pub struct MyScheduleQuery {
    pub is_booked: Option<bool>,
    pub schedule_id: Option<Uuid>,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl MyScheduleQuery {
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
pub enum ScheduleError {
    #[error("Schedule not found")]
    NotFound,

    #[error("Doctor profile not found for this account")]
    DoctorNotFound,

    #[error("One or more schedule ids are invalid")]
    InvalidScheduleIds,

    #[error("Slot is not available")]
    SlotUnavailable,

    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("Schedule is assigned to a doctor")]
    StillAssigned,

    #[error("Database error: {0}")]
    DatabaseError(String),
}
