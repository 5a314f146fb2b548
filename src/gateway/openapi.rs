//! OpenAPI / Swagger UI documentation for the ATP HTTP surface.
//!
//! Swagger UI: `http://<bind>/docs`; raw spec: `http://<bind>/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::gateway::handlers::HealthResponse;
use crate::gateway::types::{
    ApiResponse, CancelReservationRequest, CreateReservationsRequest, FulfillReservationRequest,
    PostShipmentRequestDto, ReservationLineRequest,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ATP Reservation & Shipment Engine",
        version = "1.0.0",
        description = "Multi-tenant Available-to-Promise reservation and shipment-posting engine."
    ),
    paths(
        crate::gateway::handlers::health_check,
        crate::gateway::handlers::create_reservations,
        crate::gateway::handlers::get,
        crate::gateway::handlers::allocate,
        crate::gateway::handlers::cancel,
        crate::gateway::handlers::fulfill,
        crate::gateway::handlers::post_shipment,
    ),
    components(
        schemas(
            HealthResponse,
            ReservationLineRequest,
            CreateReservationsRequest,
            CancelReservationRequest,
            FulfillReservationRequest,
            PostShipmentRequestDto,
            ApiResponse<HealthResponse>,
        )
    ),
    tags(
        (name = "System", description = "Health checks"),
        (name = "Reservations", description = "Reservation lifecycle: create, allocate, cancel, fulfill"),
        (name = "Shipments", description = "Shipment posting against stock and reservations"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "ATP Reservation & Shipment Engine");
    }

    #[test]
    fn reservation_paths_registered() {
        let spec = ApiDoc::openapi();
        assert!(spec.paths.paths.contains_key("/reservations"));
        assert!(spec.paths.paths.contains_key("/sales-order-shipments/{id}/post"));
    }
}
