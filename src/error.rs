//! Engine-wide error taxonomy.
//!
//! One enum, one variant per named error code, each with a `code()` string
//! and an `http_status()` — the same shape as this codebase's transfer FSM
//! error type. Keeping every module's errors in one enum (rather than one
//! per module) means the gateway layer has a single place to translate
//! errors into the unified response envelope.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    // --- UoM canonicalization (4.1) ---
    #[error("uom '{uom}' does not match item's canonical dimension")]
    UomDimensionMismatch { uom: String },
    #[error("item {item} has no canonical uom configured")]
    ItemCanonicalUomMissing { item: String },

    // --- Balance store (4.2) ---
    #[error("balance row missing after ensure")]
    BalanceRowMissing,

    // --- Cost-layer engine (4.3) ---
    #[error("no cost layers available for item/location")]
    NoLayers,
    #[error("insufficient cost layer quantity: requested {requested}, available {available}")]
    InsufficientLayerQty { requested: String, available: String },

    // --- Idempotency (4.4) ---
    #[error("operation '{op}' already in progress for this key")]
    IdempotencyInProgress { op: String },
    #[error("idempotency key reused with a different request body")]
    IdempotencyConflict,

    // --- Reservation engine (4.5) ---
    #[error("warehouse scope required but not derivable")]
    WarehouseScopeRequired,
    #[error("warehouse scope mismatch between explicit id, location, and demand")]
    WarehouseScopeMismatch,
    #[error("insufficient available quantity to reserve")]
    AtpInsufficientAvailable,
    #[error("reservation not found: {0}")]
    ReservationNotFound(String),
    #[error("reservation is not in a state that allows this operation")]
    ReservationInvalidState,
    #[error("reservation quantity must be greater than epsilon")]
    ReservationInvalidQuantity,
    #[error("reservation conflict: unique demand tuple already claimed by another row")]
    ReservationConflict,
    #[error("location is not sellable in the derived warehouse scope")]
    ReservationLocationNotSellable,

    // --- Concurrency (4.5/5) ---
    #[error("serializable transaction retries exhausted after {attempts} attempts")]
    ConcurrencyExhausted { attempts: u32 },

    // --- Movement creation (4.1 / §6 config) ---
    #[error("movement requires an externalRef")]
    MovementExternalRefRequired,
    #[error("movement line requires entered+canonical uom triplets")]
    CanonicalMovementFieldsRequired,

    // --- Shipment poster (4.6) ---
    #[error("shipment not found: {0}")]
    ShipmentNotFound(String),
    #[error("shipment has been canceled")]
    ShipmentCanceled,
    #[error("shipment has no lines, or a line has non-positive quantity shipped")]
    ShipmentInvalidLines,
    #[error("cross-warehouse leakage blocked: ship-from warehouse does not match sales order warehouse")]
    CrossWarehouseLeakageBlocked,
    #[error("insufficient available quantity even with reservation-consumption allowance")]
    InsufficientAvailableWithAllowance,

    // --- Stock validator (4.7) ---
    #[error("insufficient stock to post without an override")]
    InsufficientStock,
    #[error("actor is not authorized to override negative stock")]
    NegativeOverrideNotAllowed,
    #[error("negative stock override requires a reason")]
    NegativeOverrideRequiresReason,

    // --- Infrastructure ---
    #[error("database error: {0}")]
    Database(String),
    #[error("internal error: {0}")]
    Internal(String),

    /// Postgres SQLSTATE 40001 (serialization failure) surfaced from inside
    /// a SERIALIZABLE transaction. Never meant to reach a caller — `
    /// with_serializable_retry` catches this variant and retries; it only
    /// escapes as `ConcurrencyExhausted` once the retry budget is spent.
    #[error("serializable transaction conflict, retrying")]
    SerializationConflict,
}

impl EngineError {
    /// Stable string code, exactly as spelled in the specification's error
    /// tables — this is what goes over the wire in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UomDimensionMismatch { .. } => "UOM_DIMENSION_MISMATCH",
            EngineError::ItemCanonicalUomMissing { .. } => "ITEM_CANONICAL_UOM_MISSING",
            EngineError::BalanceRowMissing => "BALANCE_ROW_MISSING",
            EngineError::NoLayers => "NO_LAYERS",
            EngineError::InsufficientLayerQty { .. } => "INSUFFICIENT_LAYER_QTY",
            EngineError::IdempotencyInProgress { .. } => "IDEMPOTENCY_IN_PROGRESS",
            EngineError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            EngineError::WarehouseScopeRequired => "WAREHOUSE_SCOPE_REQUIRED",
            EngineError::WarehouseScopeMismatch => "WAREHOUSE_SCOPE_MISMATCH",
            EngineError::AtpInsufficientAvailable => "ATP_INSUFFICIENT_AVAILABLE",
            EngineError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            EngineError::ReservationInvalidState => "RESERVATION_INVALID_STATE",
            EngineError::ReservationInvalidQuantity => "RESERVATION_INVALID_QUANTITY",
            EngineError::ReservationConflict => "RESERVATION_CONFLICT",
            EngineError::ReservationLocationNotSellable => "RESERVATION_LOCATION_NOT_SELLABLE",
            EngineError::ConcurrencyExhausted { .. } => "ATP_CONCURRENCY_EXHAUSTED",
            EngineError::MovementExternalRefRequired => "MOVEMENT_EXTERNAL_REF_REQUIRED",
            EngineError::CanonicalMovementFieldsRequired => "CANONICAL_MOVEMENT_FIELDS_REQUIRED",
            EngineError::ShipmentNotFound(_) => "SHIPMENT_NOT_FOUND",
            EngineError::ShipmentCanceled => "SHIPMENT_CANCELED",
            EngineError::ShipmentInvalidLines => "SHIPMENT_INVALID_LINES",
            EngineError::CrossWarehouseLeakageBlocked => "CROSS_WAREHOUSE_LEAKAGE_BLOCKED",
            EngineError::InsufficientAvailableWithAllowance => {
                "INSUFFICIENT_AVAILABLE_WITH_ALLOWANCE"
            }
            EngineError::InsufficientStock => "INSUFFICIENT_STOCK",
            EngineError::NegativeOverrideNotAllowed => "NEGATIVE_OVERRIDE_NOT_ALLOWED",
            EngineError::NegativeOverrideRequiresReason => "NEGATIVE_OVERRIDE_REQUIRES_REASON",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
            EngineError::SerializationConflict => "ATP_CONCURRENCY_EXHAUSTED",
        }
    }

    /// HTTP status per spec.md §6's error-code table; codes not listed
    /// there get a status inferred from the same taxonomy (validation/scope
    /// → 400, state/availability/conflict → 409, not-found → 404, auth →
    /// 403, infra → 500).
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::UomDimensionMismatch { .. }
            | EngineError::ItemCanonicalUomMissing { .. }
            | EngineError::ReservationInvalidQuantity
            | EngineError::ReservationLocationNotSellable
            | EngineError::ShipmentInvalidLines
            | EngineError::CrossWarehouseLeakageBlocked
            | EngineError::MovementExternalRefRequired
            | EngineError::CanonicalMovementFieldsRequired
            | EngineError::WarehouseScopeRequired => 400,

            EngineError::AtpInsufficientAvailable
            | EngineError::ConcurrencyExhausted { .. }
            | EngineError::ReservationInvalidState
            | EngineError::ReservationConflict
            | EngineError::InsufficientAvailableWithAllowance
            | EngineError::InsufficientStock
            | EngineError::NegativeOverrideRequiresReason
            | EngineError::WarehouseScopeMismatch
            | EngineError::IdempotencyInProgress { .. }
            | EngineError::IdempotencyConflict
            | EngineError::ShipmentCanceled
            | EngineError::NoLayers
            | EngineError::InsufficientLayerQty { .. } => 409,

            EngineError::NegativeOverrideNotAllowed => 403,

            EngineError::ReservationNotFound(_) | EngineError::ShipmentNotFound(_) => 404,

            EngineError::BalanceRowMissing | EngineError::Database(_) | EngineError::Internal(_) => {
                500
            }

            EngineError::SerializationConflict => 409,
        }
    }

    /// Only `ATP_CONCURRENCY_EXHAUSTED` is meant to be retried by the
    /// caller; every other error is a definitive answer under the snapshot
    /// that produced it.
    pub fn is_retryable_by_caller(&self) -> bool {
        matches!(self, EngineError::ConcurrencyExhausted { .. })
    }
}

/// Converts a raw `sqlx::Error` to the engine taxonomy, classifying
/// Postgres SQLSTATE 40001 as [`EngineError::SerializationConflict`] so
/// `with_serializable_retry` can recognize it with a single `matches!` —
/// every other error collapses to `Database(String)`.
impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.code().as_deref() == Some("40001")
        {
            return EngineError::SerializationConflict;
        }
        EngineError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_matches_spec() {
        assert_eq!(EngineError::AtpInsufficientAvailable.http_status(), 409);
        assert_eq!(
            EngineError::ConcurrencyExhausted { attempts: 6 }.http_status(),
            409
        );
        assert_eq!(EngineError::ReservationInvalidState.http_status(), 409);
        assert_eq!(
            EngineError::InsufficientAvailableWithAllowance.http_status(),
            409
        );
        assert_eq!(EngineError::NegativeOverrideNotAllowed.http_status(), 403);
        assert_eq!(
            EngineError::NegativeOverrideRequiresReason.http_status(),
            409
        );
        assert_eq!(EngineError::WarehouseScopeRequired.http_status(), 400);
        assert_eq!(EngineError::WarehouseScopeMismatch.http_status(), 409);
        assert_eq!(
            EngineError::ReservationNotFound("x".into()).http_status(),
            404
        );
        assert_eq!(EngineError::ShipmentNotFound("x".into()).http_status(), 404);
    }

    #[test]
    fn only_concurrency_exhausted_is_retryable() {
        assert!(EngineError::ConcurrencyExhausted { attempts: 2 }.is_retryable_by_caller());
        assert!(!EngineError::AtpInsufficientAvailable.is_retryable_by_caller());
    }
}
