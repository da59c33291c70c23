use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use payment_cell::router::{payment_routes, webhook_routes};
use payment_cell::services::stripe::sign_payload;
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockRows, TestConfig, TestUser};

const WEBHOOK_SECRET: &str = "whsec_test_dummy";

struct TestHarness {
    supabase: MockServer,
    stripe: MockServer,
    state: Arc<AppConfig>,
    jwt_secret: String,
}

async fn harness() -> TestHarness {
    let supabase = MockServer::start().await;
    let stripe = MockServer::start().await;
    let config = TestConfig::with_mock_urls(&supabase.uri(), &stripe.uri());
    let state = config.to_arc();
    let jwt_secret = config.jwt_secret.clone();

    TestHarness {
        supabase,
        stripe,
        state,
        jwt_secret,
    }
}

fn webhook_app(state: Arc<AppConfig>) -> Router {
    webhook_routes(state)
}

fn signed_webhook_request(event: &Value) -> Request<Body> {
    let payload = event.to_string();
    let signature = sign_payload(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp());

    Request::builder()
        .method("POST")
        .uri("/")
        .header("Stripe-Signature", signature)
        .header("content-type", "application/json")
        .body(Body::from(payload))
        .unwrap()
}

fn completed_event(event_id: &str, appointment_id: Uuid, payment_id: Uuid, paid: bool) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_test_1",
                "payment_status": if paid { "paid" } else { "unpaid" },
                "metadata": {
                    "appointment_id": appointment_id,
                    "payment_id": payment_id
                }
            }
        }
    })
}

fn appointment_row(appointment_id: Uuid, status: &str, payment_status: &str) -> Value {
    MockRows::appointment(
        &appointment_id.to_string(),
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        status,
        payment_status,
    )
}

#[tokio::test]
async fn paid_event_settles_appointment_and_payment() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment_row(
            appointment_id,
            "scheduled",
            "unpaid"
        )])))
        .mount(&h.supabase)
        .await;

    // Event id not seen yet
    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([MockRows::payment(
            &payment_id.to_string(),
            &appointment_id.to_string(),
            500.0,
            "unpaid"
        )])))
        .mount(&h.supabase)
        .await;

    // Conditioned appointment flip, then the payment record
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment_row(
            appointment_id,
            "scheduled",
            "paid"
        )])))
        .expect(1)
        .mount(&h.supabase)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("id", format!("eq.{}", payment_id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.supabase)
        .await;

    let event = completed_event("evt_1", appointment_id, payment_id, true);
    let response = webhook_app(h.state.clone())
        .oneshot(signed_webhook_request(&event))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn replayed_event_id_is_a_no_op() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment_row(
            appointment_id,
            "scheduled",
            "paid"
        )])))
        .mount(&h.supabase)
        .await;

    // The payment already carries this event id
    let mut payment = MockRows::payment(
        &payment_id.to_string(),
        &appointment_id.to_string(),
        500.0,
        "paid",
    );
    payment["gateway_event_id"] = json!("evt_replayed");
    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment])))
        .mount(&h.supabase)
        .await;

    // Redelivery must not write anything
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.supabase)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.supabase)
        .await;

    let event = completed_event("evt_replayed", appointment_id, payment_id, true);
    let response = webhook_app(h.state.clone())
        .oneshot(signed_webhook_request(&event))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn late_event_after_reclaim_is_swallowed() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();

    // Reclaimer already canceled the appointment
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment_row(
            appointment_id,
            "canceled",
            "unpaid"
        )])))
        .mount(&h.supabase)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([MockRows::payment(
            &payment_id.to_string(),
            &appointment_id.to_string(),
            500.0,
            "unpaid"
        )])))
        .mount(&h.supabase)
        .await;

    // Conditioned flip matches nothing on a canceled row
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&h.supabase)
        .await;

    // The payment must stay unpaid: canceled+paid may never coexist
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.supabase)
        .await;

    let event = completed_event("evt_late", appointment_id, payment_id, true);
    let response = webhook_app(h.state.clone())
        .oneshot(signed_webhook_request(&event))
        .await
        .unwrap();

    // Gateway-facing success even though nothing was applied
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_metadata_is_acknowledged_without_writes() {
    let h = harness().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.supabase)
        .await;

    let event = json!({
        "id": "evt_no_meta",
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_test_1", "payment_status": "paid" } }
    });

    let response = webhook_app(h.state.clone())
        .oneshot(signed_webhook_request(&event))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unhandled_event_types_are_acknowledged() {
    let h = harness().await;

    let event = json!({
        "id": "evt_exp",
        "type": "checkout.session.expired",
        "data": { "object": { "id": "cs_test_9" } }
    });

    let response = webhook_app(h.state.clone())
        .oneshot(signed_webhook_request(&event))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_signature_is_rejected() {
    let h = harness().await;
    let event = completed_event("evt_bad", Uuid::new_v4(), Uuid::new_v4(), true);
    let payload = event.to_string();
    let signature = sign_payload(payload.as_bytes(), "whsec_wrong_secret", Utc::now().timestamp());

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("Stripe-Signature", signature)
        .header("content-type", "application/json")
        .body(Body::from(payload))
        .unwrap();

    let response = webhook_app(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_payload_with_valid_signature_is_swallowed() {
    let h = harness().await;
    let payload = "not json at all";
    let signature = sign_payload(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp());

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("Stripe-Signature", signature)
        .body(Body::from(payload))
        .unwrap();

    let response = webhook_app(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn ipn_success_reconciles_by_transaction_id() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();

    let mut payment = MockRows::payment(
        &payment_id.to_string(),
        &appointment_id.to_string(),
        500.0,
        "unpaid",
    );
    payment["transaction_id"] = json!("txn-abc");
    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .and(query_param("transaction_id", "eq.txn-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment])))
        .mount(&h.supabase)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment_row(
            appointment_id,
            "scheduled",
            "paid"
        )])))
        .expect(1)
        .mount(&h.supabase)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.supabase)
        .await;

    let response = payment_routes(h.state.clone())
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/ipn?transactionId=txn-abc&status=success")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["status"], "paid");
}

#[tokio::test]
async fn ipn_with_unknown_transaction_is_not_found() {
    let h = harness().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&h.supabase)
        .await;

    let response = payment_routes(h.state.clone())
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/ipn?transactionId=txn-missing&status=success")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_validation_rejects_non_owner() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_test_5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_5",
            "payment_status": "paid",
            "metadata": {
                "appointment_id": appointment_id,
                "payment_id": payment_id
            }
        })))
        .mount(&h.stripe)
        .await;

    let mut appointment = appointment_row(appointment_id, "scheduled", "unpaid");
    appointment["patient_id"] = json!(patient_id);
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment])))
        .mount(&h.supabase)
        .await;

    // Appointment belongs to someone else
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "email": "owner@example.com" }
        ])))
        .mount(&h.supabase)
        .await;

    let intruder = TestUser::patient("intruder@example.com");
    let token = JwtTestUtils::create_test_token(&intruder, &h.jwt_secret, None);

    let response = payment_routes(h.state.clone())
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/stripe/validate?session_id=cs_test_5")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn session_validation_settles_for_owner() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_test_6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_6",
            "payment_status": "paid",
            "metadata": {
                "appointment_id": appointment_id,
                "payment_id": payment_id
            }
        })))
        .mount(&h.stripe)
        .await;

    let mut appointment = appointment_row(appointment_id, "scheduled", "unpaid");
    appointment["patient_id"] = json!(patient_id);
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment])))
        .mount(&h.supabase)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "email": "owner@example.com" }
        ])))
        .mount(&h.supabase)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment_row(
            appointment_id,
            "scheduled",
            "paid"
        )])))
        .expect(1)
        .mount(&h.supabase)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.supabase)
        .await;

    let owner = TestUser::patient("owner@example.com");
    let token = JwtTestUtils::create_test_token(&owner, &h.jwt_secret, None);

    let response = payment_routes(h.state.clone())
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/stripe/validate?session_id=cs_test_6")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["status"], "paid");
}
