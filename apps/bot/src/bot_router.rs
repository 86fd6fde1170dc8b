use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::interactions::interactions_handler;
use crate::state::BotState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub fn build_router(state: BotState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/interactions", post(interactions_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
