// libs/schedule-cell/src/services/ledger.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::ScheduleError;

/// Slot ledger over `doctor_schedules`. The claim is a single conditioned
/// PATCH against the store; when two bookings race for the same
/// (doctor, schedule) pair, the row filter `is_booked=eq.false` lets exactly
/// one of them through. There is no in-process locking here on purpose;
/// the service runs on many instances.
pub struct SlotLedgerService {
    supabase: Arc<SupabaseClient>,
}

impl SlotLedgerService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Atomically flip a free slot to booked. `SlotUnavailable` covers both
    /// "no such doctor/schedule pair" and "already booked": the filter
    /// matches zero rows either way.
    pub async fn try_claim(&self, doctor_id: Uuid, schedule_id: Uuid) -> Result<(), ScheduleError> {
        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&schedule_id=eq.{}&is_booked=eq.false",
            doctor_id, schedule_id
        );

        let updated: Vec<Value> = self
            .supabase
            .service_request_with_headers(
                Method::PATCH,
                &path,
                Some(json!({ "is_booked": true })),
                Some(SupabaseClient::returning()),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            debug!(
                "Slot claim lost for doctor {} schedule {}: slot missing or already booked",
                doctor_id, schedule_id
            );
            return Err(ScheduleError::SlotUnavailable);
        }

        debug!("Slot claimed for doctor {} schedule {}", doctor_id, schedule_id);
        Ok(())
    }

    /// Record the appointment back-reference on an already-claimed slot.
    pub async fn attach_appointment(
        &self,
        doctor_id: Uuid,
        schedule_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<(), ScheduleError> {
        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&schedule_id=eq.{}",
            doctor_id, schedule_id
        );

        let _: Value = self
            .supabase
            .service_request(
                Method::PATCH,
                &path,
                Some(json!({ "appointment_id": appointment_id })),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Idempotently free a slot and clear its back-reference. Safe to call
    /// for a slot that was never booked.
    pub async fn release(&self, doctor_id: Uuid, schedule_id: Uuid) -> Result<(), ScheduleError> {
        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&schedule_id=eq.{}",
            doctor_id, schedule_id
        );

        let updated: Vec<Value> = self
            .supabase
            .service_request_with_headers(
                Method::PATCH,
                &path,
                Some(json!({ "is_booked": false, "appointment_id": null })),
                Some(SupabaseClient::returning()),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            warn!(
                "Release matched no ledger row for doctor {} schedule {}",
                doctor_id, schedule_id
            );
        }

        Ok(())
    }
}
