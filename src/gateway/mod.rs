//! HTTP surface (spec.md §6): a thin axum routing layer in front of the
//! reservation engine and shipment poster. Request validation here is
//! limited to parsing/shape; every domain rule still lives in the engine.

mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{Router, routing::{get, post}};
use tokio::net::TcpListener;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/reservations", post(handlers::create_reservations))
        .route("/reservations/{id}", get(handlers::get))
        .route("/reservations/{id}/allocate", post(handlers::allocate))
        .route("/reservations/{id}/cancel", post(handlers::cancel))
        .route("/reservations/{id}/fulfill", post(handlers::fulfill))
        .route("/sales-order-shipments/{id}/post", post(handlers::post_shipment))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Binds and serves the HTTP surface. Runs until the process receives a
/// shutdown signal or the listener fails.
pub async fn run_server(bind_addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = bind_addr, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
