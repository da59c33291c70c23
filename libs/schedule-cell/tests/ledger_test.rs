use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use schedule_cell::models::ScheduleError;
use schedule_cell::services::ledger::SlotLedgerService;
use shared_utils::test_utils::{MockRows, TestConfig};

fn ledger_for(server: &MockServer) -> SlotLedgerService {
    let config = TestConfig {
        supabase_url: server.uri(),
        ..Default::default()
    }
    .to_app_config();
    SlotLedgerService::new(&config)
}

#[tokio::test]
async fn claim_succeeds_on_free_slot() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let schedule_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("schedule_id", format!("eq.{}", schedule_id)))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::doctor_schedule(&doctor_id.to_string(), &schedule_id.to_string(), true)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let ledger = ledger_for(&server);
    assert!(ledger.try_claim(doctor_id, schedule_id).await.is_ok());
}

#[tokio::test]
async fn claim_fails_when_conditioned_write_matches_nothing() {
    let server = MockServer::start().await;

    // Already booked (or no such pair): the filtered PATCH updates no rows.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let ledger = ledger_for(&server);
    let result = ledger.try_claim(Uuid::new_v4(), Uuid::new_v4()).await;
    assert_matches!(result, Err(ScheduleError::SlotUnavailable));
}

/// Store-side compare-and-swap: the first conditioned PATCH flips the row,
/// every later one matches nothing.
struct CasSlotResponder {
    taken: AtomicBool,
    doctor_id: String,
    schedule_id: String,
}

impl Respond for CasSlotResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.taken.swap(true, Ordering::SeqCst) {
            ResponseTemplate::new(200).set_body_json(json!([]))
        } else {
            ResponseTemplate::new(200).set_body_json(json!([MockRows::doctor_schedule(
                &self.doctor_id,
                &self.schedule_id,
                true
            )]))
        }
    }
}

#[tokio::test]
async fn concurrent_claims_yield_exactly_one_winner() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let schedule_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(CasSlotResponder {
            taken: AtomicBool::new(false),
            doctor_id: doctor_id.to_string(),
            schedule_id: schedule_id.to_string(),
        })
        .mount(&server)
        .await;

    let ledger = Arc::new(ledger_for(&server));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger.try_claim(doctor_id, schedule_id).await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => successes += 1,
            Err(ScheduleError::SlotUnavailable) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn release_is_idempotent() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let schedule_id = Uuid::new_v4();

    // Unconditioned release: matches the row whether booked or not.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::doctor_schedule(&doctor_id.to_string(), &schedule_id.to_string(), false)
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let ledger = ledger_for(&server);
    assert!(ledger.release(doctor_id, schedule_id).await.is_ok());
    assert!(ledger.release(doctor_id, schedule_id).await.is_ok());
}
