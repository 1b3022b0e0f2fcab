pub mod assignments;
pub mod couriers;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::models::courier::CourierStatus;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(couriers::router())
        .merge(assignments::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/couriers/:id/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    couriers: usize,
    free_couriers: usize,
    outstanding_assignments: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        couriers: state.registry.len(),
        free_couriers: state.registry.list_by_status(CourierStatus::Free).len(),
        outstanding_assignments: state.active_by_order.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
