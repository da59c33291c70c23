use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub stripe_api_base_url: String,
    pub frontend_base_url: String,
    pub payment_grace_minutes: i64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            stripe_api_base_url: "http://localhost:12111".to_string(),
            frontend_base_url: "http://localhost:3000".to_string(),
            payment_grace_minutes: 30,
        }
    }
}

impl TestConfig {
    /// Point the store and gateway at wiremock servers.
    pub fn with_mock_urls(supabase_url: &str, stripe_url: &str) -> Self {
        Self {
            supabase_url: supabase_url.to_string(),
            stripe_api_base_url: stripe_url.to_string(),
            ..Default::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: "test-anon-key".to_string(),
            supabase_service_role_key: "test-service-role-key".to_string(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            stripe_secret_key: "sk_test_dummy".to_string(),
            stripe_webhook_secret: "whsec_test_dummy".to_string(),
            stripe_api_base_url: self.stripe_api_base_url.clone(),
            frontend_base_url: self.frontend_base_url.clone(),
            payment_grace_minutes: self.payment_grace_minutes,
            reclaim_interval_seconds: 600,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows matching the booking schema, for wiremock bodies.
pub struct MockRows;

impl MockRows {
    pub fn patient(id: &str, email: &str, name: &str) -> Value {
        json!({
            "id": id,
            "email": email,
            "name": name,
            "is_deleted": false,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn doctor(id: &str, email: &str, name: &str, appointment_fee: f64) -> Value {
        json!({
            "id": id,
            "email": email,
            "name": name,
            "appointment_fee": appointment_fee,
            "is_deleted": false,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn schedule(id: &str, start: &str, end: &str) -> Value {
        json!({
            "id": id,
            "start_date_time": start,
            "end_date_time": end,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn doctor_schedule(doctor_id: &str, schedule_id: &str, is_booked: bool) -> Value {
        json!({
            "doctor_id": doctor_id,
            "schedule_id": schedule_id,
            "is_booked": is_booked,
            "appointment_id": null,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn appointment(
        id: &str,
        patient_id: &str,
        doctor_id: &str,
        schedule_id: &str,
        status: &str,
        payment_status: &str,
    ) -> Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "schedule_id": schedule_id,
            "video_calling_id": "https://meet.jit.si/test-room",
            "status": status,
            "payment_status": payment_status,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn payment(id: &str, appointment_id: &str, amount: f64, status: &str) -> Value {
        json!({
            "id": id,
            "appointment_id": appointment_id,
            "amount": amount,
            "transaction_id": Uuid::new_v4().to_string(),
            "status": status,
            "gateway_event_id": null,
            "gateway_response": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }
}
