use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::info;

use crate::engine::assignment;
use crate::error::AppError;
use crate::models::assignment::{Assignment, OrderId};
use crate::models::courier::{Courier, CourierId, CourierStatus, GeoPoint};
use crate::models::notification::NotificationEvent;
use crate::state::AppState;

/// Courier-facing routes. The `:id` segment is the identity the upstream auth
/// layer resolved for the caller.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier).delete(remove_courier))
        .route("/couriers/:id/status", patch(update_courier_status))
        .route("/couriers/:id/location", patch(update_courier_location))
        .route("/couriers/:id/release", post(release_courier))
        .route("/couriers/:id/accept", post(accept_delivery))
        .route("/couriers/:id/notifications", get(poll_notifications))
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    pub id: CourierId,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct ListCouriersQuery {
    pub status: Option<CourierStatus>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub order_id: OrderId,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    payload.location.validate()?;
    let location = GeoPoint::new(payload.location.lat, payload.location.lng);

    let courier = state.registry.register(payload.id, location)?;
    info!(courier_id = courier.id, "courier registered");
    Ok(Json(courier))
}

async fn list_couriers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCouriersQuery>,
) -> Json<Vec<Courier>> {
    let couriers = match query.status {
        Some(status) => state.registry.list_by_status(status),
        None => state.registry.list(),
    };
    Json(couriers)
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(state.registry.get(id)?))
}

async fn remove_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
) -> Result<Json<Courier>, AppError> {
    let courier = state.registry.remove(id)?;
    info!(courier_id = id, "courier removed");
    Ok(Json(courier))
}

async fn update_courier_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = assignment::report_status(&state, id, payload.status).await?;
    Ok(Json(courier))
}

async fn update_courier_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Courier>, AppError> {
    payload.location.validate()?;
    let location = GeoPoint::new(payload.location.lat, payload.location.lng);

    Ok(Json(state.registry.update_position(id, location)?))
}

async fn release_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(assignment::release(&state, id).await?))
}

async fn accept_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
    Json(payload): Json<AcceptRequest>,
) -> Result<Json<Assignment>, AppError> {
    Ok(Json(assignment::accept(&state, id, payload.order_id).await?))
}

/// Drains the courier's queue; events already handed out are filtered.
async fn poll_notifications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
) -> Result<Json<Vec<NotificationEvent>>, AppError> {
    state.registry.get(id)?;

    // Events for orders the courier no longer holds are stale redeliveries.
    let current_order = state
        .outstanding_for_courier(id)
        .map(|assignment| assignment.order_id);
    let delivered = state
        .channel
        .consume(id)
        .await?
        .into_iter()
        .filter(|event| Some(event.order_id) == current_order)
        .collect();
    Ok(Json(state.inbox.accept_all(delivered)))
}
