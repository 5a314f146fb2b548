use axum::http::HeaderMap;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::money::{self, ScaledQty};

use super::super::types::ApiError;

/// Tenant scoping is carried on every request by the excluded routing
/// layer (auth/gateway in front of this service resolves it from the
/// caller's credentials); this crate only trusts the header it forwards.
pub fn tenant_id(headers: &HeaderMap) -> Result<crate::core_types::TenantId, ApiError> {
    let raw = headers
        .get("X-Tenant-Id")
        .ok_or_else(|| ApiError::bad_request("missing X-Tenant-Id header"))?
        .to_str()
        .map_err(|_| ApiError::bad_request("X-Tenant-Id header is not valid ASCII"))?;
    let id: i64 = raw
        .parse()
        .map_err(|_| ApiError::bad_request("X-Tenant-Id header is not an integer"))?;
    Ok(crate::core_types::TenantId::from(id))
}

pub fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub fn parse_quantity(raw: &str) -> Result<ScaledQty, ApiError> {
    let d = Decimal::from_str(raw.trim()).map_err(|e| ApiError::bad_request(format!("invalid quantity: {e}")))?;
    money::round_quantity(d).map_err(|e| ApiError::bad_request(e.to_string()))
}
