use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::assignment::assign;
use crate::error::AppError;
use crate::models::assignment::{Assignment, OrderId};
use crate::models::courier::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/assignments", post(create_assignment).get(list_assignments))
        .route("/assignments/:order_id", get(get_assignment))
}

/// Restaurant side: an order is ready at `restaurant`.
#[derive(Deserialize)]
pub struct CreateAssignmentRequest {
    pub order_id: OrderId,
    pub restaurant: GeoPoint,
}

async fn create_assignment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAssignmentRequest>,
) -> Result<Json<Assignment>, AppError> {
    payload.restaurant.validate()?;
    let restaurant = GeoPoint::new(payload.restaurant.lat, payload.restaurant.lng);

    Ok(Json(assign(&state, payload.order_id, restaurant).await?))
}

async fn list_assignments(State(state): State<Arc<AppState>>) -> Json<Vec<Assignment>> {
    let mut assignments: Vec<Assignment> = state
        .assignments
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    assignments.sort_by_key(|assignment| assignment.assigned_at);

    Json(assignments)
}

/// Latest assignment of an order, outstanding or not.
async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Assignment>, AppError> {
    state
        .assignments
        .iter()
        .filter(|entry| entry.order_id == order_id)
        .map(|entry| entry.value().clone())
        .max_by_key(|assignment| assignment.assigned_at)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} has no assignment")))
}
