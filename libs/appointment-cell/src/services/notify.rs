// libs/appointment-cell/src/services/notify.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::profiles::{Doctor, Patient};
use shared_models::status::AppointmentStatus;

/// Records notification rows for the delivery pipeline (an external
/// collaborator) to pick up. Recording is best-effort: a failed insert is
/// logged and never fails the surrounding booking.
pub struct NotificationService {
    supabase: Arc<SupabaseClient>,
}

impl NotificationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub async fn appointment_created(&self, patient: &Patient, doctor: &Doctor) {
        let rows = json!([
            {
                "recipient_email": patient.email,
                "recipient_role": "patient",
                "type": "APPOINTMENT_CREATED",
                "title": "Appointment booked",
                "message": format!("Your appointment with {} has been booked.", doctor.name),
                "link": "/dashboard/my-appointments",
            },
            {
                "recipient_email": doctor.email,
                "recipient_role": "doctor",
                "type": "APPOINTMENT_CREATED",
                "title": "New appointment",
                "message": format!("You have a new appointment with {}.", patient.name),
                "link": "/doctor/dashboard/appointments",
            },
        ]);

        self.record(rows).await;
    }

    pub async fn status_updated(
        &self,
        patient: &Patient,
        doctor: &Doctor,
        status: AppointmentStatus,
    ) {
        let rows = json!([
            {
                "recipient_email": patient.email,
                "recipient_role": "patient",
                "type": "APPOINTMENT_STATUS_UPDATED",
                "title": "Appointment updated",
                "message": format!("Your appointment status is now {}.", status),
                "link": "/dashboard/my-appointments",
            },
            {
                "recipient_email": doctor.email,
                "recipient_role": "doctor",
                "type": "APPOINTMENT_STATUS_UPDATED",
                "title": "Appointment updated",
                "message": format!("Appointment status is now {}.", status),
                "link": "/doctor/dashboard/appointments",
            },
        ]);

        self.record(rows).await;
    }

    async fn record(&self, rows: Value) {
        match self
            .supabase
            .service_request::<Value>(Method::POST, "/rest/v1/notifications", Some(rows))
            .await
        {
            Ok(_) => debug!("Notification events recorded"),
            Err(e) => warn!("Failed to record notification events: {}", e),
        }
    }
}
