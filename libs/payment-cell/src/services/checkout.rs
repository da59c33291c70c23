// libs/payment-cell/src/services/checkout.rs
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::status::{AppointmentStatus, PaymentStatus};

use crate::models::{CheckoutSession, Payment, PaymentError};
use crate::services::reconcile::ReconciliationService;
use crate::services::stripe::{CheckoutSessionParams, StripeClient};

const CURRENCY: &str = "usd";

/// Creates payment stubs and gateway checkout sessions for the booking
/// flow. The stub is written inside the reservation sequence; the gateway
/// call happens strictly after it, so no store transaction waits on Stripe.
pub struct CheckoutService {
    supabase: Arc<SupabaseClient>,
    stripe: StripeClient,
    reconcile: ReconciliationService,
    frontend_base_url: String,
}

impl CheckoutService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            stripe: StripeClient::new(config),
            reconcile: ReconciliationService::new(config),
            frontend_base_url: config.frontend_base_url.clone(),
        }
    }

    /// Create the unpaid payment record for a fresh appointment. The amount
    /// is the doctor's fee at this moment and is never recomputed.
    pub async fn create_payment_stub(
        &self,
        appointment_id: Uuid,
        amount: f64,
    ) -> Result<Payment, PaymentError> {
        let body = json!({
            "appointment_id": appointment_id,
            "amount": amount,
            "transaction_id": Uuid::new_v4().to_string(),
            "status": PaymentStatus::Unpaid,
        });

        let rows: Vec<Payment> = self
            .supabase
            .service_request_with_headers(
                Method::POST,
                "/rest/v1/payments",
                Some(body),
                Some(SupabaseClient::returning()),
            )
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| PaymentError::DatabaseError("Failed to create payment".to_string()))
    }

    /// Compensation helper: discard a stub whose booking did not survive.
    pub async fn delete_payment(&self, payment_id: Uuid) -> Result<(), PaymentError> {
        let _: Value = self
            .supabase
            .service_request(
                Method::DELETE,
                &format!("/rest/v1/payments?id=eq.{}", payment_id),
                None,
            )
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Create a checkout session for an unpaid appointment, or settle it on
    /// the spot when the fee is zero (the gateway rejects zero-amount
    /// charges). Redirect targets derive from the caller's origin, falling
    /// back to the configured frontend base URL.
    pub async fn create_session(
        &self,
        appointment_id: Uuid,
        appointment_status: AppointmentStatus,
        payment: &Payment,
        customer_email: &str,
        doctor_name: &str,
        request_origin: Option<&str>,
    ) -> Result<CheckoutSession, PaymentError> {
        if payment.status == PaymentStatus::Paid {
            return Err(PaymentError::AlreadySettled);
        }
        if appointment_status == AppointmentStatus::Canceled {
            return Err(PaymentError::AppointmentCanceled);
        }

        let base = self.redirect_base(request_origin);

        if payment.amount <= 0.0 {
            info!(
                "Zero-fee appointment {}; settling payment {} without gateway",
                appointment_id, payment.id
            );
            let snapshot = json!({
                "provider": "free",
                "amount": payment.amount,
                "marked_paid_at": Utc::now().to_rfc3339(),
            });
            self.reconcile
                .apply_outcome(appointment_id, payment.id, true, None, snapshot)
                .await?;

            return Ok(CheckoutSession {
                payment_url: format!("{}/dashboard/my-appointments", base),
                transaction_id: payment.transaction_id.clone(),
            });
        }

        let params = CheckoutSessionParams {
            amount_minor: (payment.amount * 100.0).round() as i64,
            currency: CURRENCY.to_string(),
            customer_email: customer_email.to_string(),
            product_name: format!("Appointment with {}", doctor_name),
            appointment_id,
            payment_id: payment.id,
            success_url: format!(
                "{}/dashboard/my-appointments?session_id={{CHECKOUT_SESSION_ID}}",
                base
            ),
            cancel_url: format!("{}/dashboard/my-appointments?payment=cancelled", base),
        };

        let session = self.stripe.create_checkout_session(params).await?;
        debug!("Checkout session {} created for appointment {}", session.id, appointment_id);

        let payment_url = session
            .url
            .ok_or_else(|| PaymentError::GatewayError("Session has no redirect URL".to_string()))?;

        Ok(CheckoutSession {
            payment_url,
            transaction_id: payment.transaction_id.clone(),
        })
    }

    fn redirect_base(&self, request_origin: Option<&str>) -> String {
        request_origin
            .and_then(normalize_origin)
            .unwrap_or_else(|| self.frontend_base_url.trim_end_matches('/').to_string())
    }
}

/// Reduce a caller-supplied origin header to scheme://host[:port]; anything
/// unparseable falls back to the raw value minus trailing slashes.
fn normalize_origin(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    match reqwest::Url::parse(value) {
        Ok(url) => Some(url.origin().ascii_serialization()),
        Err(_) => Some(value.trim_end_matches('/').to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_reduced_to_scheme_host_port() {
        assert_eq!(
            normalize_origin("https://app.example.com/some/path?q=1"),
            Some("https://app.example.com".to_string())
        );
        assert_eq!(
            normalize_origin("http://localhost:5173/"),
            Some("http://localhost:5173".to_string())
        );
    }

    #[test]
    fn unparseable_origin_keeps_raw_value() {
        assert_eq!(
            normalize_origin("app.example.com//"),
            Some("app.example.com".to_string())
        );
    }

    #[test]
    fn empty_origin_is_none() {
        assert_eq!(normalize_origin(""), None);
        assert_eq!(normalize_origin("   "), None);
    }
}
