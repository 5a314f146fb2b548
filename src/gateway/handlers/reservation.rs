//! `/reservations` handlers (spec.md §6).

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};

use crate::core_types::{DemandId, ItemId, LocationId, ReservationId, WarehouseId};
use crate::reservation::{CreateReservationsOutcome, ReservationRequest};

use super::super::state::AppState;
use super::super::types::{
    ApiResult, CancelReservationRequest, CreateReservationsRequest, FulfillReservationRequest, engine_err, ok,
};
use super::helpers::{idempotency_key, parse_quantity, tenant_id};

fn parse_reservation_id(raw: &str) -> Result<ReservationId, super::super::types::ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(ReservationId::from)
        .map_err(|_| super::super::types::ApiError::bad_request("invalid reservation id"))
}

/// Creates one or more reservations in a single batch.
///
/// POST /reservations
#[utoipa::path(
    post,
    path = "/reservations",
    request_body = CreateReservationsRequest,
    responses(
        (status = 201, description = "Reservations created", content_type = "application/json"),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Insufficient available quantity or concurrency exhausted")
    ),
    tag = "Reservations"
)]
pub async fn create_reservations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateReservationsRequest>,
) -> ApiResult<CreateReservationsOutcome> {
    let tenant = match tenant_id(&headers) {
        Ok(t) => t,
        Err(e) => return e.into_err(),
    };

    let mut lines = Vec::with_capacity(req.lines.len());
    for line in req.lines {
        let quantity = match parse_quantity(&line.quantity) {
            Ok(q) => q,
            Err(e) => return e.into_err(),
        };
        lines.push(ReservationRequest {
            demand_type: line.demand_type.as_str().into(),
            demand_id: DemandId(line.demand_id),
            item: ItemId::from(line.item_id),
            location: LocationId::from(line.location_id),
            quantity,
            uom: line.uom,
            warehouse_id: line.warehouse_id.map(WarehouseId::from),
            expires_at: line.expires_at,
        });
    }

    match state
        .reservation_engine
        .create_reservations(tenant, idempotency_key(&headers), lines)
        .await
    {
        Ok(outcome) => Ok((
            axum::http::StatusCode::CREATED,
            Json(super::super::types::ApiResponse::success(outcome)),
        )),
        Err(e) => engine_err(e),
    }
}

/// Allocates a reservation (moves its hold from `reserved` to `allocated`).
///
/// POST /reservations/:id/allocate
#[utoipa::path(
    post,
    path = "/reservations/{id}/allocate",
    params(("id" = String, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation allocated", content_type = "application/json"),
        (status = 404, description = "Reservation not found"),
        (status = 409, description = "Reservation not in a state that allows allocation")
    ),
    tag = "Reservations"
)]
pub async fn allocate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<crate::reservation::ReservationView> {
    let tenant = match tenant_id(&headers) {
        Ok(t) => t,
        Err(e) => return e.into_err(),
    };
    let id = match parse_reservation_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_err(),
    };

    match state.reservation_engine.allocate(tenant, id).await {
        Ok(view) => ok(view),
        Err(e) => engine_err(e),
    }
}

/// Cancels a reservation, releasing its open hold back to available.
///
/// POST /reservations/:id/cancel
#[utoipa::path(
    post,
    path = "/reservations/{id}/cancel",
    params(("id" = String, Path, description = "Reservation id")),
    request_body = CancelReservationRequest,
    responses(
        (status = 200, description = "Reservation canceled", content_type = "application/json"),
        (status = 404, description = "Reservation not found"),
        (status = 409, description = "Reservation already terminal")
    ),
    tag = "Reservations"
)]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CancelReservationRequest>>,
) -> ApiResult<crate::reservation::ReservationView> {
    let tenant = match tenant_id(&headers) {
        Ok(t) => t,
        Err(e) => return e.into_err(),
    };
    let id = match parse_reservation_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_err(),
    };
    let reason = body.and_then(|Json(b)| b.reason);

    match state.reservation_engine.cancel(tenant, id, reason).await {
        Ok(view) => ok(view),
        Err(e) => engine_err(e),
    }
}

/// Records incremental fulfillment against a reservation's open remainder.
///
/// POST /reservations/:id/fulfill
#[utoipa::path(
    post,
    path = "/reservations/{id}/fulfill",
    params(("id" = String, Path, description = "Reservation id")),
    request_body = FulfillReservationRequest,
    responses(
        (status = 200, description = "Reservation fulfillment recorded", content_type = "application/json"),
        (status = 400, description = "Invalid quantity"),
        (status = 404, description = "Reservation not found"),
        (status = 409, description = "Reservation not in a state that allows fulfillment")
    ),
    tag = "Reservations"
)]
pub async fn fulfill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<FulfillReservationRequest>,
) -> ApiResult<crate::reservation::ReservationView> {
    let tenant = match tenant_id(&headers) {
        Ok(t) => t,
        Err(e) => return e.into_err(),
    };
    let id = match parse_reservation_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_err(),
    };
    let quantity = match parse_quantity(&req.quantity) {
        Ok(q) => q,
        Err(e) => return e.into_err(),
    };

    match state.reservation_engine.fulfill(tenant, id, quantity).await {
        Ok(view) => ok(view),
        Err(e) => engine_err(e),
    }
}

/// Reads a single reservation's current state. Not named in spec.md §6's
/// endpoint list, which only specifies mutating operations, but every
/// mutation already returns the same view — exposing a plain read is a
/// direct extension of that, not new surface.
///
/// GET /reservations/:id
#[utoipa::path(
    get,
    path = "/reservations/{id}",
    params(("id" = String, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation", content_type = "application/json"),
        (status = 404, description = "Reservation not found")
    ),
    tag = "Reservations"
)]
pub async fn get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<crate::reservation::ReservationView> {
    let tenant = match tenant_id(&headers) {
        Ok(t) => t,
        Err(e) => return e.into_err(),
    };
    let id = match parse_reservation_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_err(),
    };

    match state.reservation_engine.get(tenant, id).await {
        Ok(view) => ok(view),
        Err(e) => engine_err(e),
    }
}
