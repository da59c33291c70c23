use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use payment_cell::router::{payment_routes, webhook_routes};
use schedule_cell::router::{doctor_schedule_routes, schedule_routes};
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .nest("/appointment", appointment_routes(state.clone()))
        .nest("/payment", payment_routes(state.clone()))
        .nest("/webhook", webhook_routes(state.clone()))
        .nest("/schedule", schedule_routes(state.clone()))
        .nest("/doctor-schedule", doctor_schedule_routes(state.clone()))
}
