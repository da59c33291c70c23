use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::services::reclaimer::UnpaidReclaimerService;
use shared_utils::test_utils::{MockRows, TestConfig};

fn reclaimer_for(server: &MockServer) -> UnpaidReclaimerService {
    let config = TestConfig {
        supabase_url: server.uri(),
        ..Default::default()
    }
    .to_app_config();
    UnpaidReclaimerService::new(&config)
}

fn stale_appointment(appointment_id: Uuid, doctor_id: Uuid, schedule_id: Uuid) -> serde_json::Value {
    // created_at far older than any grace window
    MockRows::appointment(
        &appointment_id.to_string(),
        &Uuid::new_v4().to_string(),
        &doctor_id.to_string(),
        &schedule_id.to_string(),
        "scheduled",
        "unpaid",
    )
}

#[tokio::test]
async fn stale_unpaid_reservation_is_reclaimed() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let schedule_id = Uuid::new_v4();

    // Sweep query selects only scheduled+unpaid rows older than the cutoff
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.scheduled"))
        .and(query_param("payment_status", "eq.unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([stale_appointment(
            appointment_id,
            doctor_id,
            schedule_id
        )])))
        .mount(&server)
        .await;

    // Conditioned cancel wins
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.scheduled"))
        .and(query_param("payment_status", "eq.unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([MockRows::appointment(
            &appointment_id.to_string(),
            &Uuid::new_v4().to_string(),
            &doctor_id.to_string(),
            &schedule_id.to_string(),
            "canceled",
            "unpaid"
        )])))
        .expect(1)
        .mount(&server)
        .await;

    // Payment record discarded
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/payments"))
        .and(query_param("appointment_id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    // Slot handed back to the ledger
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("schedule_id", format!("eq.{}", schedule_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::doctor_schedule(&doctor_id.to_string(), &schedule_id.to_string(), false)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let reclaimer = reclaimer_for(&server);
    let stats = reclaimer.sweep_once().await.unwrap();

    assert_eq!(stats.examined, 1);
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn payment_that_raced_in_first_survives_the_sweep() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let schedule_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([stale_appointment(
            appointment_id,
            doctor_id,
            schedule_id
        )])))
        .mount(&server)
        .await;

    // A PAID update committed between the sweep query and the cancel: the
    // conditioned cancel matches nothing.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    // Neither the payment nor the slot may be touched
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let reclaimer = reclaimer_for(&server);
    let stats = reclaimer.sweep_once().await.unwrap();

    assert_eq!(stats.examined, 1);
    assert_eq!(stats.reclaimed, 0);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn fresh_reservations_are_left_alone() {
    let server = MockServer::start().await;

    // The cutoff filter keeps young rows out of the sweep entirely
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let reclaimer = reclaimer_for(&server);
    let stats = reclaimer.sweep_once().await.unwrap();

    assert_eq!(stats, Default::default());
}

#[tokio::test]
async fn one_failed_reclaim_does_not_abort_the_sweep() {
    let server = MockServer::start().await;
    let failing = Uuid::new_v4();
    let healthy = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let schedule_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            stale_appointment(failing, doctor_id, schedule_id),
            stale_appointment(healthy, doctor_id, schedule_id),
        ])))
        .mount(&server)
        .await;

    // First appointment's cancel hits a store fault
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", failing)))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", healthy)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([MockRows::appointment(
            &healthy.to_string(),
            &Uuid::new_v4().to_string(),
            &doctor_id.to_string(),
            &schedule_id.to_string(),
            "canceled",
            "unpaid"
        )])))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::doctor_schedule(&doctor_id.to_string(), &schedule_id.to_string(), false)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let reclaimer = reclaimer_for(&server);
    let stats = reclaimer.sweep_once().await.unwrap();

    assert_eq!(stats.examined, 2);
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn sweep_query_failure_surfaces_as_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let reclaimer = reclaimer_for(&server);
    assert!(reclaimer.sweep_once().await.is_err());
}
