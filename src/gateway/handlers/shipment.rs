//! `/sales-order-shipments` handlers (spec.md §6).

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};

use crate::core_types::ShipmentId;
use crate::shipment::PostShipmentRequest;
use crate::validator::OverrideRequest;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, PostShipmentRequestDto, engine_err, ok};
use super::helpers::{idempotency_key, tenant_id};

fn parse_shipment_id(raw: &str) -> Result<ShipmentId, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(ShipmentId::from)
        .map_err(|_| ApiError::bad_request("invalid shipment id"))
}

/// Posts a sales-order shipment: consumes stock and matched reservations
/// under FIFO cost-layer accounting (spec.md §4.6).
///
/// POST /sales-order-shipments/:id/post
#[utoipa::path(
    post,
    path = "/sales-order-shipments/{id}/post",
    params(("id" = String, Path, description = "Shipment id")),
    request_body = PostShipmentRequestDto,
    responses(
        (status = 200, description = "Shipment posted", content_type = "application/json"),
        (status = 400, description = "Invalid shipment lines"),
        (status = 403, description = "Actor not authorized to override negative stock"),
        (status = 404, description = "Shipment not found"),
        (status = 409, description = "Insufficient stock, cross-warehouse leakage, or concurrency exhausted")
    ),
    tag = "Shipments"
)]
pub async fn post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<PostShipmentRequestDto>,
) -> ApiResult<crate::shipment::ShipmentView> {
    let tenant = match tenant_id(&headers) {
        Ok(t) => t,
        Err(e) => return e.into_err(),
    };
    let id = match parse_shipment_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_err(),
    };
    let idempotency_key = match idempotency_key(&headers) {
        Some(k) => k,
        None => return ApiError::bad_request("missing Idempotency-Key header").into_err(),
    };

    let request = PostShipmentRequest {
        idempotency_key,
        actor: req.actor,
        override_request: OverrideRequest {
            requested: req.override_requested,
            reason: req.override_reason,
            reference: req.override_reference,
        },
    };

    match state.shipment_poster.post(tenant, id, request).await {
        Ok(view) => ok(view),
        Err(e) => engine_err(e),
    }
}
