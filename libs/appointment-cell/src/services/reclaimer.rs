// libs/appointment-cell/src/services/reclaimer.rs
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, instrument, warn};

use schedule_cell::services::ledger::SlotLedgerService;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::status::AppointmentStatus;

use crate::models::{Appointment, AppointmentError};

/// Recurring sweep that cancels reservations whose payment never arrived
/// within the grace window and hands their slots back to the ledger.
///
/// The cancel itself is a conditioned write on `scheduled + unpaid`, so a
/// payment confirmation that commits first wins the race: the sweep sees
/// zero affected rows and leaves the appointment alone.
pub struct UnpaidReclaimerService {
    supabase: Arc<SupabaseClient>,
    ledger: SlotLedgerService,
    grace: ChronoDuration,
    sweep_interval: Duration,
    is_shutdown: tokio::sync::RwLock<bool>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub reclaimed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl UnpaidReclaimerService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            ledger: SlotLedgerService::with_client(Arc::clone(&supabase)),
            supabase,
            grace: ChronoDuration::minutes(config.payment_grace_minutes),
            sweep_interval: Duration::from_secs(config.reclaim_interval_seconds),
            is_shutdown: tokio::sync::RwLock::new(false),
        }
    }

    /// Run sweeps until shutdown. A failed sweep is logged and retried on
    /// the next tick; nothing here may take the process down.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            "Unpaid-reservation reclaimer started (grace {} min, interval {:?})",
            self.grace.num_minutes(),
            self.sweep_interval
        );

        let mut ticker = interval(self.sweep_interval);
        // The first tick completes immediately; skip it so startup does not
        // race application wiring.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if *self.is_shutdown.read().await {
                info!("Reclaimer received shutdown signal");
                break;
            }

            match self.sweep_once().await {
                Ok(stats) if stats.examined > 0 => {
                    info!(
                        "Reclaim sweep: {} examined, {} reclaimed, {} skipped, {} failed",
                        stats.examined, stats.reclaimed, stats.skipped, stats.failed
                    );
                }
                Ok(_) => debug!("Reclaim sweep found nothing to do"),
                Err(e) => error!("Reclaim sweep failed, retrying next tick: {}", e),
            }
        }
    }

    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        *is_shutdown = true;
    }

    /// One pass over stale unpaid reservations. Public so tests and
    /// operational tooling can force a sweep without the timer.
    pub async fn sweep_once(&self) -> Result<SweepStats, AppointmentError> {
        let cutoff = Utc::now() - self.grace;

        let stale: Vec<Appointment> = self
            .supabase
            .service_request(
                Method::GET,
                &format!(
                    "/rest/v1/appointments?status=eq.scheduled&payment_status=eq.unpaid&created_at=lte.{}",
                    urlencoding::encode(&cutoff.to_rfc3339())
                ),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let mut stats = SweepStats {
            examined: stale.len(),
            ..Default::default()
        };

        for appointment in stale {
            match self.reclaim_one(&appointment).await {
                Ok(true) => stats.reclaimed += 1,
                Ok(false) => {
                    debug!(
                        "Appointment {} no longer unpaid+scheduled, leaving it alone",
                        appointment.id
                    );
                    stats.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to reclaim appointment {}: {}", appointment.id, e);
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Cancel one stale reservation: conditioned cancel, then payment
    /// discard, then slot release. Returns false when the conditioned
    /// cancel matched nothing (a payment landed since the sweep query).
    async fn reclaim_one(&self, appointment: &Appointment) -> Result<bool, AppointmentError> {
        let canceled: Vec<Value> = self
            .supabase
            .service_request_with_headers(
                Method::PATCH,
                &format!(
                    "/rest/v1/appointments?id=eq.{}&status=eq.scheduled&payment_status=eq.unpaid",
                    appointment.id
                ),
                Some(json!({
                    "status": AppointmentStatus::Canceled,
                    "updated_at": Utc::now().to_rfc3339(),
                })),
                Some(SupabaseClient::returning()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if canceled.is_empty() {
            return Ok(false);
        }

        // The appointment row is kept (canceled) for audit; the stale
        // transaction record is discarded.
        let _: Value = self
            .supabase
            .service_request(
                Method::DELETE,
                &format!("/rest/v1/payments?appointment_id=eq.{}", appointment.id),
                None,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        self.ledger
            .release(appointment.doctor_id, appointment.schedule_id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        warn!(
            "Reclaimed unpaid appointment {} (slot {}, {})",
            appointment.id, appointment.doctor_id, appointment.schedule_id
        );
        Ok(true)
    }
}
