// libs/schedule-cell/src/services/schedule.rs
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::profiles::Doctor;
use shared_utils::pagination::Pagination;

use crate::models::{CreateScheduleRequest, Schedule, ScheduleError, ScheduleListQuery};

/// Width of a generated slot. The administrative window is partitioned into
/// intervals of this size.
const SLOT_INTERVAL_MINUTES: i64 = 30;

pub struct ScheduleService {
    supabase: Arc<SupabaseClient>,
}

impl ScheduleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// Partition the requested date range and daily window into fixed-width
    /// slots, creating each one that does not already exist. Not atomic
    /// across the range: a failure mid-way leaves the created prefix behind,
    /// and re-running skips it.
    pub async fn generate(
        &self,
        request: CreateScheduleRequest,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        let start_time = parse_hhmm(&request.start_time)?;
        let end_time = parse_hhmm(&request.end_time)?;

        if request.end_date < request.start_date {
            return Err(ScheduleError::InvalidTimeWindow(
                "end_date must not precede start_date".to_string(),
            ));
        }
        if end_time <= start_time {
            return Err(ScheduleError::InvalidTimeWindow(
                "end_time must be after start_time".to_string(),
            ));
        }

        let slots = slot_grid(
            request.start_date,
            request.end_date,
            start_time,
            end_time,
            SLOT_INTERVAL_MINUTES,
        );

        let mut created = Vec::new();
        for (slot_start, slot_end) in slots {
            if self.schedule_exists(slot_start, slot_end).await? {
                debug!("Slot {} - {} already exists, skipping", slot_start, slot_end);
                continue;
            }

            let body = json!({
                "start_date_time": slot_start.to_rfc3339(),
                "end_date_time": slot_end.to_rfc3339(),
            });

            let rows: Vec<Schedule> = self
                .supabase
                .service_request_with_headers(
                    Method::POST,
                    "/rest/v1/schedules",
                    Some(body),
                    Some(SupabaseClient::returning()),
                )
                .await
                .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

            created.extend(rows);
        }

        info!("Generated {} new schedule slots", created.len());
        Ok(created)
    }

    /// Schedules the calling doctor has not opted into yet, for the opt-in
    /// picker. Date filters narrow the window.
    pub async fn list_available_for_doctor(
        &self,
        doctor_email: &str,
        query: &ScheduleListQuery,
        pagination: &Pagination,
        auth_token: &str,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        let doctor = self.find_doctor_by_email(doctor_email, auth_token).await?;

        let assigned: Vec<Value> = self
            .supabase
            .request(
                Method::GET,
                &format!(
                    "/rest/v1/doctor_schedules?doctor_id=eq.{}&select=schedule_id",
                    doctor.id
                ),
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        let assigned_ids: Vec<String> = assigned
            .iter()
            .filter_map(|row| row["schedule_id"].as_str().map(|s| s.to_string()))
            .collect();

        let mut path = "/rest/v1/schedules?".to_string();
        let mut filters = Vec::new();
        if let Some(start) = query.start_date_time {
            filters.push(format!(
                "start_date_time=gte.{}",
                urlencoding::encode(&start.to_rfc3339())
            ));
        }
        if let Some(end) = query.end_date_time {
            filters.push(format!(
                "end_date_time=lte.{}",
                urlencoding::encode(&end.to_rfc3339())
            ));
        }
        if !assigned_ids.is_empty() {
            filters.push(format!("id=not.in.({})", assigned_ids.join(",")));
        }
        filters.push("order=start_date_time.asc".to_string());
        filters.push(format!("limit={}", pagination.limit));
        filters.push(format!("offset={}", pagination.offset));
        path.push_str(&filters.join("&"));

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))
    }

    /// Delete a schedule slot. Refused while any doctor still references it.
    pub async fn delete(&self, schedule_id: Uuid) -> Result<(), ScheduleError> {
        let references: Vec<Value> = self
            .supabase
            .service_request(
                Method::GET,
                &format!(
                    "/rest/v1/doctor_schedules?schedule_id=eq.{}&select=doctor_id&limit=1",
                    schedule_id
                ),
                None,
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        if !references.is_empty() {
            return Err(ScheduleError::StillAssigned);
        }

        let deleted: Vec<Value> = self
            .supabase
            .service_request_with_headers(
                Method::DELETE,
                &format!("/rest/v1/schedules?id=eq.{}", schedule_id),
                None,
                Some(SupabaseClient::returning()),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        if deleted.is_empty() {
            return Err(ScheduleError::NotFound);
        }

        info!("Deleted schedule {}", schedule_id);
        Ok(())
    }

    async fn schedule_exists(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, ScheduleError> {
        let path = format!(
            "/rest/v1/schedules?start_date_time=eq.{}&end_date_time=eq.{}&select=id",
            urlencoding::encode(&start.to_rfc3339()),
            urlencoding::encode(&end.to_rfc3339())
        );

        let existing: Vec<Value> = self
            .supabase
            .service_request(Method::GET, &path, None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        Ok(!existing.is_empty())
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

/// Expand a date range and daily window into `[start, start + interval)`
/// slots. Only slots that fit entirely inside the window are emitted.
pub fn slot_grid(
    start_date: NaiveDate,
    end_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    interval_minutes: i64,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let interval = ChronoDuration::minutes(interval_minutes);
    let mut slots = Vec::new();

    let mut day = start_date;
    while day <= end_date {
        let window_end = day.and_time(end_time).and_utc();
        let mut slot_start = day.and_time(start_time).and_utc();

        while slot_start + interval <= window_end {
            slots.push((slot_start, slot_start + interval));
            slot_start += interval;
        }

        day += ChronoDuration::days(1);
    }

    slots
}

fn parse_hhmm(value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| ScheduleError::InvalidTimeWindow(format!("Invalid time of day: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn grid_partitions_single_day() {
        let slots = slot_grid(date(2025, 3, 10), date(2025, 3, 10), time(9, 0), time(11, 0), 30);
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0].0.to_rfc3339(), "2025-03-10T09:00:00+00:00");
        assert_eq!(slots[3].1.to_rfc3339(), "2025-03-10T11:00:00+00:00");
    }

    #[test]
    fn grid_spans_multiple_days() {
        let slots = slot_grid(date(2025, 3, 10), date(2025, 3, 12), time(9, 0), time(10, 0), 30);
        assert_eq!(slots.len(), 6);
        assert_eq!(slots[2].0.to_rfc3339(), "2025-03-11T09:00:00+00:00");
    }

    #[test]
    fn grid_drops_partial_trailing_slot() {
        let slots = slot_grid(date(2025, 3, 10), date(2025, 3, 10), time(9, 0), time(9, 45), 30);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].1.to_rfc3339(), "2025-03-10T09:30:00+00:00");
    }

    #[test]
    fn grid_empty_when_window_too_small() {
        let slots = slot_grid(date(2025, 3, 10), date(2025, 3, 10), time(9, 0), time(9, 15), 30);
        assert!(slots.is_empty());
    }

    #[test]
    fn parse_hhmm_rejects_garbage() {
        assert!(parse_hhmm("9am").is_err());
        assert!(parse_hhmm("25:00").is_err());
        assert!(parse_hhmm("09:30").is_ok());
    }
}
