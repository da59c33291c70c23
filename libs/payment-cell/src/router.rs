// libs/payment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn payment_routes(state: Arc<AppConfig>) -> Router {
    // The IPN callback is gateway-initiated and carries no user session.
    let public_routes = Router::new().route("/ipn", get(handlers::ipn_callback));

    let protected_routes = Router::new()
        .route("/stripe/validate", get(handlers::validate_stripe_session))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

/// The raw-body webhook mounts at the application root, authenticated by
/// gateway signature only.
pub fn webhook_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(handlers::stripe_webhook))
        .with_state(state)
}
