//! Reservation and reservation-event row models.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;

use crate::core_types::{DemandId, ItemId, LocationId, ReservationId, TenantId, WarehouseId};
use crate::money::ScaledQty;

use super::state::ReservationState;

/// Demand lines are not limited to sales orders in principle, so the type
/// is carried as the caller's own string (`sales_order_line`, `work_order`,
/// ...) rather than a closed enum this crate would need to keep in sync
/// with every demand-producing peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DemandType(pub String);

impl DemandType {
    pub fn sales_order_line() -> Self {
        DemandType("sales_order_line".to_string())
    }
}

impl From<&str> for DemandType {
    fn from(s: &str) -> Self {
        DemandType(s.to_string())
    }
}

impl std::fmt::Display for DemandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: ReservationId,
    pub tenant: TenantId,
    pub warehouse: WarehouseId,
    pub demand_type: DemandType,
    pub demand_id: DemandId,
    pub item: ItemId,
    pub location: LocationId,
    pub canonical_uom: String,
    pub state: ReservationState,
    pub quantity_reserved: ScaledQty,
    pub quantity_fulfilled: ScaledQty,
    pub reserved_at: DateTime<Utc>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub cancel_reason: Option<String>,
}

impl Reservation {
    /// The reservation's current contribution to `reserved + allocated`:
    /// `quantityReserved - quantityFulfilled`, clamped at zero for
    /// terminal states (which always contribute zero regardless of the
    /// stored counters).
    pub fn open_remaining(&self) -> ScaledQty {
        if self.state.is_terminal() {
            return ScaledQty::ZERO;
        }
        self.quantity_reserved.saturating_sub(self.quantity_fulfilled)
    }
}

pub(super) fn row_to_reservation(row: &sqlx::postgres::PgRow) -> Reservation {
    Reservation {
        id: ReservationId::from(row.get::<uuid::Uuid, _>("id")),
        tenant: TenantId::from(row.get::<i64, _>("tenant_id")),
        warehouse: WarehouseId::from(row.get::<i64, _>("warehouse_id")),
        demand_type: DemandType(row.get("demand_type")),
        demand_id: DemandId(row.get::<i64, _>("demand_id")),
        item: ItemId::from(row.get::<i64, _>("item_id")),
        location: LocationId::from(row.get::<i64, _>("location_id")),
        canonical_uom: row.get("canonical_uom"),
        state: ReservationState::from_id(row.get::<i16, _>("state"))
            .expect("state column always holds a valid reservation state id"),
        quantity_reserved: ScaledQty::from_raw(row.get::<i64, _>("quantity_reserved")),
        quantity_fulfilled: ScaledQty::from_raw(row.get::<i64, _>("quantity_fulfilled")),
        reserved_at: row.get("reserved_at"),
        allocated_at: row.get("allocated_at"),
        fulfilled_at: row.get("fulfilled_at"),
        canceled_at: row.get("canceled_at"),
        expired_at: row.get("expired_at"),
        expires_at: row.get("expires_at"),
        idempotency_key: row.get("idempotency_key"),
        cancel_reason: row.get("cancel_reason"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationEventType {
    Reserved,
    Allocated,
    Cancelled,
    Expired,
    Fulfilled,
}

impl ReservationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationEventType::Reserved => "RESERVED",
            ReservationEventType::Allocated => "ALLOCATED",
            ReservationEventType::Cancelled => "CANCELLED",
            ReservationEventType::Expired => "EXPIRED",
            ReservationEventType::Fulfilled => "FULFILLED",
        }
    }
}
