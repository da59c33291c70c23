// libs/schedule-cell/src/services/doctor_schedule.rs
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::profiles::Doctor;
use shared_utils::pagination::Pagination;

use crate::models::{DoctorSchedule, MyScheduleQuery, ScheduleError};

pub struct DoctorScheduleService {
    supabase: Arc<SupabaseClient>,
}

impl DoctorScheduleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// Opt the calling doctor into a batch of schedules. Unknown schedule
    /// ids fail the whole request; pairs that already exist are skipped via
    /// the store's duplicate resolution rather than raising a conflict.
    pub async fn assign(
        &self,
        doctor_email: &str,
        schedule_ids: &[uuid::Uuid],
        auth_token: &str,
    ) -> Result<Vec<DoctorSchedule>, ScheduleError> {
        if schedule_ids.is_empty() {
            return Err(ScheduleError::InvalidScheduleIds);
        }

        let doctor = self.find_doctor_by_email(doctor_email, auth_token).await?;

        let id_list = schedule_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let known: Vec<Value> = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/schedules?id=in.({})&select=id", id_list),
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        if known.len() != schedule_ids.len() {
            return Err(ScheduleError::InvalidScheduleIds);
        }

        let rows: Vec<Value> = schedule_ids
            .iter()
            .map(|schedule_id| {
                json!({
                    "doctor_id": doctor.id,
                    "schedule_id": schedule_id,
                })
            })
            .collect();

        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=ignore-duplicates,return=representation"),
        );

        let created: Vec<DoctorSchedule> = self
            .supabase
            .service_request_with_headers(
                Method::POST,
                "/rest/v1/doctor_schedules?on_conflict=doctor_id,schedule_id",
                Some(Value::Array(rows)),
                Some(headers),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        info!(
            "Doctor {} assigned to {} schedules ({} new)",
            doctor.id,
            schedule_ids.len(),
            created.len()
        );
        Ok(created)
    }

    /// The calling doctor's own schedule assignments, with booked-state and
    /// id filters.
    pub async fn my_schedules(
        &self,
        doctor_email: &str,
        query: &MyScheduleQuery,
        pagination: &Pagination,
        auth_token: &str,
    ) -> Result<Vec<DoctorSchedule>, ScheduleError> {
        let doctor = self.find_doctor_by_email(doctor_email, auth_token).await?;

        let mut path = format!("/rest/v1/doctor_schedules?doctor_id=eq.{}", doctor.id);
        if let Some(is_booked) = query.is_booked {
            path.push_str(&format!("&is_booked=eq.{}", is_booked));
        }
        if let Some(schedule_id) = query.schedule_id {
            path.push_str(&format!("&schedule_id=eq.{}", schedule_id));
        }
        path.push_str(&format!(
            "&order=created_at.{}&limit={}&offset={}",
            pagination.sort_order, pagination.limit, pagination.offset
        ));

        debug!("Listing doctor schedules: {}", path);

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))
    }

    async fn find_doctor_by_email(
        &self,
        email: &str,
        auth_token: &str,
    ) -> Result<Doctor, ScheduleError> {
        let path = format!(
            "/rest/v1/doctors?email=eq.{}&is_deleted=eq.false",
            urlencoding::encode(email)
        );

        let result: Vec<Doctor> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(ScheduleError::DoctorNotFound)
    }
}
