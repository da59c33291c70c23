// libs/appointment-cell/src/services/booking.rs
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use payment_cell::models::{CheckoutSession, Payment};
use payment_cell::services::checkout::CheckoutService;
use schedule_cell::models::Schedule;
use schedule_cell::services::ledger::SlotLedgerService;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;
use shared_models::profiles::{Doctor, Patient};
use shared_models::status::{AppointmentStatus, PaymentStatus};
use shared_utils::pagination::Pagination;

use crate::models::{
    AllAppointmentsQuery, Appointment, AppointmentDetail, AppointmentError,
    BookAppointmentRequest, MyAppointmentsQuery,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notify::NotificationService;

pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    ledger: SlotLedgerService,
    lifecycle: AppointmentLifecycleService,
    notifications: NotificationService,
    checkout: CheckoutService,
}

/// Everything created by a successful reservation, kept together so the
/// compensation path can unwind all of it.
struct ReservationContext {
    appointment: Appointment,
    payment: Payment,
    patient: Patient,
    doctor: Doctor,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            ledger: SlotLedgerService::with_client(Arc::clone(&supabase)),
            lifecycle: AppointmentLifecycleService::new(),
            notifications: NotificationService::new(config),
            checkout: CheckoutService::new(config),
            supabase,
        }
    }

    /// Pay-now booking: reserve the slot, then open a checkout session. The
    /// gateway call runs strictly after the reservation writes; if it fails
    /// the reservation is compensated away so no claimed slot survives
    /// without a reachable payment flow.
    pub async fn book_pay_now(
        &self,
        user: &User,
        request: BookAppointmentRequest,
        request_origin: Option<&str>,
        auth_token: &str,
    ) -> Result<CheckoutSession, AppointmentError> {
        info!(
            "Booking appointment (pay-now) for doctor {} schedule {}",
            request.doctor_id, request.schedule_id
        );

        let ctx = self.create_reservation(user, &request, auth_token).await?;

        let session = match self
            .checkout
            .create_session(
                ctx.appointment.id,
                ctx.appointment.status,
                &ctx.payment,
                &ctx.patient.email,
                &ctx.doctor.name,
                request_origin,
            )
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    "Gateway session creation failed for appointment {}; rolling back reservation: {}",
                    ctx.appointment.id, e
                );
                self.rollback_reservation(&ctx).await;
                return Err(e.into());
            }
        };

        self.notifications
            .appointment_created(&ctx.patient, &ctx.doctor)
            .await;

        info!("Appointment {} booked (pay-now)", ctx.appointment.id);
        Ok(session)
    }

    /// Pay-later booking: reserve the slot and return the full reservation;
    /// payment starts later through `initiate_payment`. The reservation
    /// still expires through the reclaimer if no payment arrives in time.
    pub async fn book_pay_later(
        &self,
        user: &User,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<AppointmentDetail, AppointmentError> {
        info!(
            "Booking appointment (pay-later) for doctor {} schedule {}",
            request.doctor_id, request.schedule_id
        );

        let ctx = self.create_reservation(user, &request, auth_token).await?;

        self.notifications
            .appointment_created(&ctx.patient, &ctx.doctor)
            .await;

        let schedule = self.get_schedule(ctx.appointment.schedule_id, auth_token).await?;

        info!("Appointment {} booked (pay-later)", ctx.appointment.id);
        Ok(AppointmentDetail {
            appointment: ctx.appointment,
            patient: ctx.patient,
            doctor: ctx.doctor,
            schedule,
        })
    }

    /// Open a checkout session for an existing unpaid reservation.
    pub async fn initiate_payment(
        &self,
        appointment_id: Uuid,
        user: &User,
        request_origin: Option<&str>,
        auth_token: &str,
    ) -> Result<CheckoutSession, AppointmentError> {
        let email = user
            .email
            .as_deref()
            .ok_or_else(|| AppointmentError::Forbidden("Missing user email".to_string()))?;
        let patient = self.find_patient_by_email(email, auth_token).await?;

        let appointments: Vec<Appointment> = self
            .supabase
            .request(
                Method::GET,
                &format!(
                    "/rest/v1/appointments?id=eq.{}&patient_id=eq.{}",
                    appointment_id, patient.id
                ),
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let appointment = appointments.into_iter().next().ok_or(AppointmentError::NotFound)?;

        if appointment.payment_status == PaymentStatus::Paid {
            return Err(AppointmentError::PaymentAlreadySettled);
        }
        if appointment.status == AppointmentStatus::Canceled {
            return Err(AppointmentError::AppointmentCanceled);
        }

        let payments: Vec<Payment> = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/payments?appointment_id=eq.{}", appointment.id),
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let payment = payments.into_iter().next().ok_or_else(|| {
            AppointmentError::DatabaseError(
                "Payment record not found for this appointment".to_string(),
            )
        })?;

        let doctor = self.get_doctor(appointment.doctor_id).await?;

        let session = self
            .checkout
            .create_session(
                appointment.id,
                appointment.status,
                &payment,
                &patient.email,
                &doctor.name,
                request_origin,
            )
            .await?;

        Ok(session)
    }

    /// Status change by the owning doctor or an admin. Terminal states are
    /// sealed by the lifecycle check before any write happens.
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        user: &User,
        _auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id).await?;
        let doctor = self.get_doctor(appointment.doctor_id).await?;

        if user.is_doctor() {
            if user.email.as_deref() != Some(doctor.email.as_str()) {
                return Err(AppointmentError::Forbidden(
                    "This is not your appointment".to_string(),
                ));
            }
        } else if !user.is_admin() {
            return Err(AppointmentError::Forbidden(
                "Only the appointment's doctor or an admin can change status".to_string(),
            ));
        }

        self.lifecycle
            .validate_status_transition(appointment.status, new_status)?;

        let updated: Vec<Appointment> = self
            .supabase
            .service_request_with_headers(
                Method::PATCH,
                &format!("/rest/v1/appointments?id=eq.{}", appointment_id),
                Some(json!({
                    "status": new_status,
                    "updated_at": Utc::now().to_rfc3339(),
                })),
                Some(SupabaseClient::returning()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let updated = updated.into_iter().next().ok_or(AppointmentError::NotFound)?;

        if let Ok(patient) = self.get_patient(appointment.patient_id).await {
            self.notifications
                .status_updated(&patient, &doctor, new_status)
                .await;
        }

        info!("Appointment {} status changed to {}", appointment_id, new_status);
        Ok(updated)
    }

    /// The caller's own appointments, scoped by role.
    pub async fn my_appointments(
        &self,
        user: &User,
        query: &MyAppointmentsQuery,
        paging: &Pagination,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let email = user
            .email
            .as_deref()
            .ok_or_else(|| AppointmentError::Forbidden("Missing user email".to_string()))?;

        let mut filters = Vec::new();

        if user.is_patient() {
            let patient = self.find_patient_by_email(email, auth_token).await?;
            filters.push(format!("patient_id=eq.{}", patient.id));
        } else if user.is_doctor() {
            let doctor = self.find_doctor_by_email(email, auth_token).await?;
            filters.push(format!("doctor_id=eq.{}", doctor.id));
        }

        if let Some(status) = query.status {
            filters.push(format!("status=eq.{}", status));
        }
        if let Some(payment_status) = query.payment_status {
            filters.push(format!("payment_status=eq.{}", payment_status));
        }

        self.list_appointments(filters, paging, Some(auth_token)).await
    }

    /// Admin listing across all appointments, with optional participant
    /// email filters.
    pub async fn all_appointments(
        &self,
        query: &AllAppointmentsQuery,
        paging: &Pagination,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut filters = Vec::new();

        if let Some(patient_email) = query.patient_email.as_deref() {
            match self.find_patient_by_email_service(patient_email).await {
                Ok(patient) => filters.push(format!("patient_id=eq.{}", patient.id)),
                Err(AppointmentError::PatientNotFound) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            }
        }
        if let Some(doctor_email) = query.doctor_email.as_deref() {
            match self.find_doctor_by_email_service(doctor_email).await {
                Ok(doctor) => filters.push(format!("doctor_id=eq.{}", doctor.id)),
                Err(AppointmentError::DoctorNotFound) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            }
        }

        if let Some(status) = query.status {
            filters.push(format!("status=eq.{}", status));
        }
        if let Some(payment_status) = query.payment_status {
            filters.push(format!("payment_status=eq.{}", payment_status));
        }

        self.list_appointments(filters, paging, None).await
    }

    // ==========================================================================
    // RESERVATION INTERNALS
    // ==========================================================================

    /// Claim the slot and persist the appointment + payment pair. The slot
    /// claim is the conditioned write that decides races; every later step
    /// compensates the earlier ones on failure instead of leaving a ghost
    /// booking behind.
    async fn create_reservation(
        &self,
        user: &User,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<ReservationContext, AppointmentError> {
        let email = user
            .email
            .as_deref()
            .ok_or_else(|| AppointmentError::Forbidden("Missing user email".to_string()))?;

        let patient = self.find_patient_by_email(email, auth_token).await?;
        let doctor = self.find_active_doctor(request.doctor_id, auth_token).await?;

        self.ledger.try_claim(doctor.id, request.schedule_id).await?;

        let appointment = match self
            .insert_appointment(&patient, &doctor, request.schedule_id)
            .await
        {
            Ok(appointment) => appointment,
            Err(e) => {
                if let Err(release_err) = self.ledger.release(doctor.id, request.schedule_id).await
                {
                    warn!("Slot release after failed insert also failed: {}", release_err);
                }
                return Err(e);
            }
        };

        if let Err(e) = self
            .ledger
            .attach_appointment(doctor.id, request.schedule_id, appointment.id)
            .await
        {
            // Back-reference is lookup-only; the appointment row stays the
            // source of truth for slot ownership.
            warn!(
                "Failed to record ledger back-reference for appointment {}: {}",
                appointment.id, e
            );
        }

        let payment = match self
            .checkout
            .create_payment_stub(appointment.id, doctor.appointment_fee)
            .await
        {
            Ok(payment) => payment,
            Err(e) => {
                warn!(
                    "Payment stub creation failed for appointment {}; unwinding reservation",
                    appointment.id
                );
                if let Err(delete_err) = self.delete_appointment_row(appointment.id).await {
                    warn!("Appointment cleanup failed: {}", delete_err);
                }
                if let Err(release_err) = self.ledger.release(doctor.id, request.schedule_id).await
                {
                    warn!("Slot release after failed payment stub failed: {}", release_err);
                }
                return Err(e.into());
            }
        };

        debug!(
            "Reserved slot ({}, {}) as appointment {} with payment {} (amount {})",
            doctor.id, request.schedule_id, appointment.id, payment.id, payment.amount
        );

        Ok(ReservationContext {
            appointment,
            payment,
            patient,
            doctor,
        })
    }

    async fn rollback_reservation(&self, ctx: &ReservationContext) {
        if let Err(e) = self.checkout.delete_payment(ctx.payment.id).await {
            warn!("Rollback: payment {} deletion failed: {}", ctx.payment.id, e);
        }
        if let Err(e) = self.delete_appointment_row(ctx.appointment.id).await {
            warn!(
                "Rollback: appointment {} deletion failed: {}",
                ctx.appointment.id, e
            );
        }
        if let Err(e) = self
            .ledger
            .release(ctx.doctor.id, ctx.appointment.schedule_id)
            .await
        {
            warn!("Rollback: slot release failed: {}", e);
        }
    }

    async fn insert_appointment(
        &self,
        patient: &Patient,
        doctor: &Doctor,
        schedule_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        let room_token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(22)
            .map(char::from)
            .collect();

        let body = json!({
            "patient_id": patient.id,
            "doctor_id": doctor.id,
            "schedule_id": schedule_id,
            "video_calling_id": format!("https://meet.jit.si/{}", room_token),
            "status": AppointmentStatus::Scheduled,
            "payment_status": PaymentStatus::Unpaid,
        });

        let rows: Vec<Appointment> = self
            .supabase
            .service_request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(body),
                Some(SupabaseClient::returning()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or_else(|| {
            AppointmentError::DatabaseError("Failed to create appointment".to_string())
        })
    }

    async fn delete_appointment_row(&self, appointment_id: Uuid) -> Result<(), AppointmentError> {
        let _: Value = self
            .supabase
            .service_request(
                Method::DELETE,
                &format!("/rest/v1/appointments?id=eq.{}", appointment_id),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn list_appointments(
        &self,
        filters: Vec<String>,
        paging: &Pagination,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut path = "/rest/v1/appointments?".to_string();
        let mut parts = filters;
        parts.push(format!("order={}", paging.order_clause()));
        parts.push(format!("limit={}", paging.limit));
        parts.push(format!("offset={}", paging.offset));
        path.push_str(&parts.join("&"));

        debug!("Listing appointments: {}", path);

        let result = match auth_token {
            Some(token) => {
                self.supabase
                    .request(Method::GET, &path, Some(token), None)
                    .await
            }
            None => self.supabase.service_request(Method::GET, &path, None).await,
        };

        result.map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    // ==========================================================================
    // LOOKUPS
    // ==========================================================================

    async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let rows: Vec<Appointment> = self
            .supabase
            .service_request(
                Method::GET,
                &format!("/rest/v1/appointments?id=eq.{}", appointment_id),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(AppointmentError::NotFound)
    }

    async fn get_schedule(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<Schedule, AppointmentError> {
        let rows: Vec<Schedule> = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/schedules?id=eq.{}", schedule_id),
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AppointmentError::DatabaseError("Schedule row missing".to_string()))
    }

    async fn find_patient_by_email(
        &self,
        email: &str,
        auth_token: &str,
    ) -> Result<Patient, AppointmentError> {
        let rows: Vec<Patient> = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/patients?email=eq.{}", urlencoding::encode(email)),
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(AppointmentError::PatientNotFound)
    }

    async fn find_patient_by_email_service(
        &self,
        email: &str,
    ) -> Result<Patient, AppointmentError> {
        let rows: Vec<Patient> = self
            .supabase
            .service_request(
                Method::GET,
                &format!("/rest/v1/patients?email=eq.{}", urlencoding::encode(email)),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(AppointmentError::PatientNotFound)
    }

    async fn get_patient(&self, patient_id: Uuid) -> Result<Patient, AppointmentError> {
        let rows: Vec<Patient> = self
            .supabase
            .service_request(
                Method::GET,
                &format!("/rest/v1/patients?id=eq.{}", patient_id),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(AppointmentError::PatientNotFound)
    }

    /// Doctor lookup for booking: must exist and not be soft-deleted.
    async fn find_active_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Doctor, AppointmentError> {
        let rows: Vec<Doctor> = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/doctors?id=eq.{}&is_deleted=eq.false", doctor_id),
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(AppointmentError::DoctorNotFound)
    }

    /// Doctor lookup for existing appointments; soft-deleted doctors still
    /// resolve so their history stays manageable.
    async fn get_doctor(&self, doctor_id: Uuid) -> Result<Doctor, AppointmentError> {
        let rows: Vec<Doctor> = self
            .supabase
            .service_request(
                Method::GET,
                &format!("/rest/v1/doctors?id=eq.{}", doctor_id),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(AppointmentError::DoctorNotFound)
    }

    async fn find_doctor_by_email(
        &self,
        email: &str,
        auth_token: &str,
    ) -> Result<Doctor, AppointmentError> {
        let rows: Vec<Doctor> = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/doctors?email=eq.{}", urlencoding::encode(email)),
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(AppointmentError::DoctorNotFound)
    }

    async fn find_doctor_by_email_service(&self, email: &str) -> Result<Doctor, AppointmentError> {
        let rows: Vec<Doctor> = self
            .supabase
            .service_request(
                Method::GET,
                &format!("/rest/v1/doctors?email=eq.{}", urlencoding::encode(email)),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(AppointmentError::DoctorNotFound)
    }
}
