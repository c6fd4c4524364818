use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handlers::{health, webhooks};

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(webhooks::receive_run_task))
        .route("/healthz", get(health::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
