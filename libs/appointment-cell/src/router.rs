// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/pay-later", post(handlers::book_appointment_pay_later))
        .route("/{appointment_id}/initiate-payment", post(handlers::initiate_payment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/my-appointment", get(handlers::my_appointments))
        .route("/", get(handlers::all_appointments))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
