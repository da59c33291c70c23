// libs/payment-cell/src/services/stripe.rs
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{PaymentError, StripeCheckoutSession};

type HmacSha256 = Hmac<Sha256>;

/// Accept webhook timestamps up to this far from now. Stripe signs each
/// delivery with the send time; beyond this window a replayed capture is
/// rejected even with a valid MAC.
const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

/// Stripe REST client scoped to the checkout-session endpoints the booking
/// flow needs.
pub struct StripeClient {
    client: Client,
    secret_key: String,
    base_url: String,
}

pub struct CheckoutSessionParams {
    pub amount_minor: i64,
    pub currency: String,
    pub customer_email: String,
    pub product_name: String,
    pub appointment_id: Uuid,
    pub payment_id: Uuid,
    pub success_url: String,
    pub cancel_url: String,
}

impl StripeClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            secret_key: config.stripe_secret_key.clone(),
            base_url: config.stripe_api_base_url.clone(),
        }
    }

    /// Create a card checkout session carrying the appointment/payment pair
    /// as correlation metadata.
    /// POST /v1/checkout/sessions
    pub async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> Result<StripeCheckoutSession, PaymentError> {
        info!(
            "Creating checkout session for appointment {} payment {}",
            params.appointment_id, params.payment_id
        );

        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let amount = params.amount_minor.to_string();
        let appointment_id = params.appointment_id.to_string();
        let payment_id = params.payment_id.to_string();

        let form: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("payment_method_types[0]", "card"),
            ("customer_email", &params.customer_email),
            ("line_items[0][price_data][currency]", &params.currency),
            ("line_items[0][price_data][product_data][name]", &params.product_name),
            ("line_items[0][price_data][unit_amount]", &amount),
            ("line_items[0][quantity]", "1"),
            ("metadata[appointment_id]", &appointment_id),
            ("metadata[payment_id]", &payment_id),
            ("success_url", &params.success_url),
            ("cancel_url", &params.cancel_url),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::GatewayError(e.to_string()))?;

        if !status.is_success() {
            error!("Checkout session creation failed: {} - {}", status, body);
            return Err(PaymentError::GatewayError(format!("HTTP {}: {}", status, body)));
        }

        let session: StripeCheckoutSession = serde_json::from_str(&body)
            .map_err(|e| PaymentError::GatewayError(format!("Failed to parse session: {}", e)))?;

        debug!("Created checkout session {}", session.id);
        Ok(session)
    }

    /// Fetch a session for out-of-band validation. Returns the parsed
    /// session together with the raw body for the audit snapshot.
    /// GET /v1/checkout/sessions/{id}
    pub async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<(StripeCheckoutSession, Value), PaymentError> {
        let url = format!("{}/v1/checkout/sessions/{}", self.base_url, session_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::GatewayError(e.to_string()))?;

        if !status.is_success() {
            error!("Checkout session retrieval failed: {} - {}", status, body);
            return Err(PaymentError::GatewayError(format!("HTTP {}: {}", status, body)));
        }

        let raw: Value = serde_json::from_str(&body)
            .map_err(|e| PaymentError::GatewayError(format!("Failed to parse session: {}", e)))?;
        let session: StripeCheckoutSession = serde_json::from_value(raw.clone())
            .map_err(|e| PaymentError::GatewayError(format!("Failed to parse session: {}", e)))?;

        Ok((session, raw))
    }
}

/// Verify a `Stripe-Signature` header (scheme `t=<ts>,v1=<hex mac>`) over
/// the raw request body.
pub fn verify_webhook_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now_ts: i64,
) -> Result<(), PaymentError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = value.parse().ok();
            }
            Some(("v1", value)) => {
                if let Some(decoded) = decode_hex(value) {
                    candidates.push(decoded);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(PaymentError::InvalidSignature("missing v1 signature".to_string()));
    }

    if (now_ts - timestamp).abs() > SIGNATURE_TOLERANCE_SECONDS {
        return Err(PaymentError::InvalidSignature("timestamp outside tolerance".to_string()));
    }

    let mut signed_payload = Vec::with_capacity(payload.len() + 16);
    signed_payload.extend_from_slice(timestamp.to_string().as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(payload);

    for candidate in &candidates {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| PaymentError::InvalidSignature("bad secret".to_string()))?;
        mac.update(&signed_payload);
        if mac.verify_slice(candidate).is_ok() {
            return Ok(());
        }
    }

    Err(PaymentError::InvalidSignature("no matching signature".to_string()))
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&value[i..i + 2], 16).ok())
        .collect()
}

/// Build a `Stripe-Signature` header value for a payload. Lives here so the
/// webhook tests sign their fixtures exactly the way verification expects.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut signed_payload = Vec::with_capacity(payload.len() + 16);
    signed_payload.extend_from_slice(timestamp.to_string().as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(&signed_payload);
    let digest = mac.finalize().into_bytes();

    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("t={},v1={}", timestamp, hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn valid_signature_accepted() {
        let payload = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, SECRET, now);

        assert!(verify_webhook_signature(payload, &header, SECRET, now).is_ok());
    }

    #[test]
    fn tampered_payload_rejected() {
        let payload = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, SECRET, now);

        let result = verify_webhook_signature(br#"{"id":"evt_2"}"#, &header, SECRET, now);
        assert!(result.is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let payload = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, "whsec_other", now);

        assert!(verify_webhook_signature(payload, &header, SECRET, now).is_err());
    }

    #[test]
    fn stale_timestamp_rejected() {
        let payload = br#"{"id":"evt_1"}"#;
        let signed_at = 1_700_000_000;
        let header = sign_payload(payload, SECRET, signed_at);

        let result =
            verify_webhook_signature(payload, &header, SECRET, signed_at + 3600);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_header_rejected() {
        let payload = br#"{}"#;
        assert!(verify_webhook_signature(payload, "v1=zz", SECRET, 0).is_err());
        assert!(verify_webhook_signature(payload, "t=123", SECRET, 123).is_err());
        assert!(verify_webhook_signature(payload, "", SECRET, 0).is_err());
    }
}
