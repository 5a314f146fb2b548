//! Liveness/readiness handler.

use std::sync::Arc;

use axum::extract::State;
use serde::Serialize;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiResult, ok};

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub database: bool,
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json")
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let database = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    ok(HealthResponse { database })
}
