// libs/payment-cell/src/services/reconcile.rs
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;
use shared_models::status::PaymentStatus;

use crate::models::{
    AppointmentRef, Payment, PaymentError, ReconcileOutcome, ReconciliationSummary, StripeEvent,
};
use crate::services::stripe::StripeClient;

/// Applies gateway outcomes to the payment/appointment pair. Every entry
/// point (webhook, IPN, polled validation, zero-fee settlement) funnels into
/// `apply_outcome`, which is idempotent under redelivery and defers to the
/// reclaimer when the appointment already left the `scheduled` state.
pub struct ReconciliationService {
    supabase: Arc<SupabaseClient>,
    stripe: StripeClient,
}

impl ReconciliationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            stripe: StripeClient::new(config),
        }
    }

    /// Record a gateway outcome.
    ///
    /// Write order matters: the appointment flip is a conditioned PATCH on
    /// `status=eq.scheduled`, so a reclaimer cancellation that committed
    /// first makes this a no-op (`Skipped`) and the payment row is left
    /// untouched, so `canceled` and `paid` can never coexist. The payment row
    /// is written second; a crash in between heals on redelivery because
    /// the appointment condition does not include `payment_status`.
    pub async fn apply_outcome(
        &self,
        appointment_id: Uuid,
        payment_id: Uuid,
        paid: bool,
        event_id: Option<&str>,
        snapshot: Value,
    ) -> Result<ReconcileOutcome, PaymentError> {
        if let Some(event_id) = event_id {
            let payment = self.get_payment(payment_id).await?;
            if payment.gateway_event_id.as_deref() == Some(event_id) {
                info!("Event {} already processed, skipping", event_id);
                return Ok(ReconcileOutcome::AlreadyProcessed);
            }
        }

        let next_status = if paid { PaymentStatus::Paid } else { PaymentStatus::Unpaid };

        let updated: Vec<Value> = self
            .supabase
            .service_request_with_headers(
                Method::PATCH,
                &format!(
                    "/rest/v1/appointments?id=eq.{}&status=eq.scheduled",
                    appointment_id
                ),
                Some(json!({ "payment_status": next_status })),
                Some(SupabaseClient::returning()),
            )
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            warn!(
                "Appointment {} is no longer scheduled; leaving payment {} untouched",
                appointment_id, payment_id
            );
            return Ok(ReconcileOutcome::Skipped);
        }

        let mut payment_update = json!({
            "status": next_status,
            "gateway_response": snapshot,
            "updated_at": Utc::now().to_rfc3339(),
        });
        if let Some(event_id) = event_id {
            payment_update["gateway_event_id"] = json!(event_id);
        }

        let _: Value = self
            .supabase
            .service_request(
                Method::PATCH,
                &format!("/rest/v1/payments?id=eq.{}", payment_id),
                Some(payment_update),
            )
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        info!(
            "Payment {} for appointment {} reconciled to {}",
            payment_id, appointment_id, next_status
        );
        Ok(ReconcileOutcome::Applied(next_status))
    }

    /// Webhook entry point. Processing problems (unknown metadata, missing
    /// appointment) are logged and reported as handled; returning an error
    /// to the gateway would only trigger redelivery of an event we cannot
    /// use.
    pub async fn handle_webhook_event(&self, event: StripeEvent) -> Result<Value, PaymentError> {
        match event.kind.as_str() {
            "checkout.session.completed" => {
                let object = event.data.object;

                let Some((appointment_id, payment_id)) = extract_correlation(&object) else {
                    warn!("Missing correlation metadata in webhook event {}", event.id);
                    return Ok(json!({ "message": "Missing metadata" }));
                };

                match self.get_appointment(appointment_id).await {
                    Ok(_) => {}
                    Err(PaymentError::AppointmentNotFound) => {
                        warn!(
                            "Appointment {} not found; payment may be for an expired reservation",
                            appointment_id
                        );
                        return Ok(json!({ "message": "Appointment not found" }));
                    }
                    Err(e) => return Err(e),
                }

                let paid = object["payment_status"].as_str() == Some("paid");
                self.apply_outcome(appointment_id, payment_id, paid, Some(&event.id), object)
                    .await?;

                Ok(json!({ "message": "Webhook processed successfully" }))
            }
            "checkout.session.expired" => {
                // The unpaid reservation is reclaimed by the sweep.
                warn!("Checkout session expired: {}", event.data.object["id"]);
                Ok(json!({ "message": "Session expiry noted" }))
            }
            "payment_intent.payment_failed" => {
                warn!("Payment failed: {}", event.data.object["id"]);
                Ok(json!({ "message": "Payment failure noted" }))
            }
            other => {
                debug!("Unhandled event type: {}", other);
                Ok(json!({ "message": "Event ignored" }))
            }
        }
    }

    /// Out-of-band confirmation keyed by our transaction id.
    pub async fn validate_ipn(
        &self,
        transaction_id: &str,
        status: &str,
    ) -> Result<ReconciliationSummary, PaymentError> {
        let payment = self.get_payment_by_transaction(transaction_id).await?;

        let normalized = status.trim().to_lowercase();
        let is_success = normalized == "success" || normalized == "paid";

        let snapshot = json!({
            "provider": "ipn",
            "transaction_id": transaction_id,
            "status": normalized,
            "received_at": Utc::now().to_rfc3339(),
        });

        let outcome = self
            .apply_outcome(payment.appointment_id, payment.id, is_success, None, snapshot)
            .await?;

        Ok(ReconciliationSummary {
            appointment_id: payment.appointment_id,
            payment_id: payment.id,
            status: match outcome {
                ReconcileOutcome::Applied(status) => status,
                _ => payment.status,
            },
        })
    }

    /// Authenticated polling validation: fetches the session from the
    /// gateway, checks the caller owns the appointment, then applies the
    /// same reconciliation as the webhook path.
    pub async fn validate_session(
        &self,
        session_id: &str,
        user: &User,
    ) -> Result<ReconciliationSummary, PaymentError> {
        let (session, _raw) = self.stripe.retrieve_checkout_session(session_id).await?;

        let appointment_id: Uuid = session
            .metadata
            .get("appointment_id")
            .and_then(|v| v.parse().ok())
            .ok_or(PaymentError::MissingMetadata)?;
        let payment_id: Uuid = session
            .metadata
            .get("payment_id")
            .and_then(|v| v.parse().ok())
            .ok_or(PaymentError::MissingMetadata)?;

        let appointment = self.get_appointment(appointment_id).await?;
        self.ensure_patient_owns(&appointment, user).await?;

        let paid = session.payment_status.as_deref() == Some("paid");
        let snapshot = json!({
            "provider": "stripe-validate",
            "session_id": session_id,
            "payment_status": session.payment_status,
            "validated_at": Utc::now().to_rfc3339(),
        });

        let outcome = self
            .apply_outcome(appointment_id, payment_id, paid, None, snapshot)
            .await?;

        Ok(ReconciliationSummary {
            appointment_id,
            payment_id,
            status: match outcome {
                ReconcileOutcome::Applied(status) => status,
                _ => appointment.payment_status,
            },
        })
    }

    async fn ensure_patient_owns(
        &self,
        appointment: &AppointmentRef,
        user: &User,
    ) -> Result<(), PaymentError> {
        let Some(user_email) = user.email.as_deref() else {
            return Err(PaymentError::Forbidden);
        };

        let patients: Vec<Value> = self
            .supabase
            .service_request(
                Method::GET,
                &format!(
                    "/rest/v1/patients?id=eq.{}&select=email",
                    appointment.patient_id
                ),
                None,
            )
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        let owner_email = patients
            .first()
            .and_then(|p| p["email"].as_str())
            .unwrap_or_default();

        if owner_email != user_email {
            return Err(PaymentError::Forbidden);
        }

        Ok(())
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Payment, PaymentError> {
        let result: Vec<Payment> = self
            .supabase
            .service_request(
                Method::GET,
                &format!("/rest/v1/payments?id=eq.{}", payment_id),
                None,
            )
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(PaymentError::NotFound)
    }

    async fn get_payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Payment, PaymentError> {
        let result: Vec<Payment> = self
            .supabase
            .service_request(
                Method::GET,
                &format!(
                    "/rest/v1/payments?transaction_id=eq.{}",
                    urlencoding::encode(transaction_id)
                ),
                None,
            )
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(PaymentError::NotFound)
    }

    async fn get_appointment(&self, appointment_id: Uuid) -> Result<AppointmentRef, PaymentError> {
        let result: Vec<AppointmentRef> = self
            .supabase
            .service_request(
                Method::GET,
                &format!("/rest/v1/appointments?id=eq.{}", appointment_id),
                None,
            )
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(PaymentError::AppointmentNotFound)
    }
}

fn extract_correlation(object: &Value) -> Option<(Uuid, Uuid)> {
    let metadata = object.get("metadata")?;
    let appointment_id = metadata.get("appointment_id")?.as_str()?.parse().ok()?;
    let payment_id = metadata.get("payment_id")?.as_str()?.parse().ok()?;
    Some((appointment_id, payment_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_extracted_from_session_object() {
        let object = json!({
            "id": "cs_test_1",
            "payment_status": "paid",
            "metadata": {
                "appointment_id": "7b1c0a88-87b8-4f86-9a2a-3a4c5ff00001",
                "payment_id": "7b1c0a88-87b8-4f86-9a2a-3a4c5ff00002"
            }
        });

        let (a, p) = extract_correlation(&object).unwrap();
        assert_eq!(a.to_string(), "7b1c0a88-87b8-4f86-9a2a-3a4c5ff00001");
        assert_eq!(p.to_string(), "7b1c0a88-87b8-4f86-9a2a-3a4c5ff00002");
    }

    #[test]
    fn correlation_missing_or_malformed_is_none() {
        assert!(extract_correlation(&json!({ "id": "cs_test_1" })).is_none());
        assert!(extract_correlation(&json!({
            "metadata": { "appointment_id": "not-a-uuid", "payment_id": "also-not" }
        }))
        .is_none());
        assert!(extract_correlation(&json!({
            "metadata": { "appointment_id": "7b1c0a88-87b8-4f86-9a2a-3a4c5ff00001" }
        }))
        .is_none());
    }
}
