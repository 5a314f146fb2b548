//! Unified response envelope and request DTOs for the HTTP surface.
//!
//! Same `ApiResponse<T>` / `ApiResult<T>` / `ApiError` shape as this
//! codebase's original gateway, just re-keyed on [`crate::error::EngineError`]
//! instead of the order-pipeline's error type.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::EngineError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Stable error code string, or "OK" on success.
    #[schema(example = "OK")]
    pub code: String,
    #[schema(example = "ok")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "OK".to_string(),
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }
}

pub type ApiResult<T> =
    Result<(StatusCode, Json<ApiResponse<T>>), (StatusCode, Json<ApiResponse<()>>)>;

#[inline]
pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

#[inline]
pub fn accepted<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(data))))
}

/// Unified gateway error, translated straight from [`EngineError`]'s own
/// `code()`/`http_status()` so the wire error code is never out of sync
/// with the engine's taxonomy.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_PARAMETER", msg)
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err((self.status, Json(ApiResponse::<()>::error(self.code, self.message))))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ApiResponse::<()>::error(self.code, self.message));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.code(), err.to_string())
    }
}

/// Maps an [`EngineError`] straight to the handler error tuple, the
/// `?`-operator-friendly shape every handler below returns.
pub fn engine_err<T>(err: EngineError) -> ApiResult<T> {
    ApiError::from(err).into_err()
}

// ---------------------------------------------------------------------
// Request DTOs. Kept as plain primitive-field structs (no domain
// newtypes) so `ToSchema` derives without needing schema impls for every
// core id type; handlers parse/validate into the engine's own types.
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReservationLineRequest {
    #[schema(example = "sales_order_line")]
    pub demand_type: String,
    #[schema(example = 1001)]
    pub demand_id: i64,
    #[schema(example = 42)]
    pub item_id: i64,
    #[schema(example = 7)]
    pub location_id: i64,
    #[schema(example = "10.000000")]
    pub quantity: String,
    #[schema(example = "EA")]
    pub uom: String,
    pub warehouse_id: Option<i64>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReservationsRequest {
    pub lines: Vec<ReservationLineRequest>,
}

#[derive(Debug, Deserialize, ToSchema, Default)]
pub struct CancelReservationRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FulfillReservationRequest {
    #[schema(example = "5.000000")]
    pub quantity: String,
}

#[derive(Debug, Deserialize, ToSchema, Default)]
pub struct PostShipmentRequestDto {
    pub actor: String,
    #[serde(default)]
    pub override_requested: bool,
    pub override_reason: Option<String>,
    pub override_reference: Option<String>,
}
