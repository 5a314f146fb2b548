//! Shipment header and line rows.
//!
//! Not part of spec.md §6's persisted-table list — that list assumes the
//! shipment header was already created by an excluded sales-order peer.
//! But the poster's algorithm locks the header and its lines `FOR UPDATE`
//! inside the very transaction that also locks balances and reservations
//! (spec.md §4.6 steps 1-2), which is only possible if all of those rows
//! live in the same database this crate writes to. This module therefore
//! carries a local projection of the shipment header/lines alongside the
//! tables spec.md does name; see DESIGN.md for the call.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::core_types::{DemandId, ItemId, LocationId, MovementId, ShipmentId, ShipmentLineId, TenantId};
use crate::money::ScaledQty;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipmentStatus {
    Draft,
    Posted,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Draft => "draft",
            ShipmentStatus::Posted => "posted",
            ShipmentStatus::Cancelled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "posted" => ShipmentStatus::Posted,
            "canceled" => ShipmentStatus::Cancelled,
            _ => ShipmentStatus::Draft,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Shipment {
    pub id: ShipmentId,
    pub tenant: TenantId,
    pub sales_order_id: String,
    pub ship_from_location: LocationId,
    pub status: ShipmentStatus,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_idempotency_key: Option<String>,
    pub movement_id: Option<MovementId>,
    pub created_at: DateTime<Utc>,
}

pub(super) fn row_to_shipment(row: &sqlx::postgres::PgRow) -> Shipment {
    Shipment {
        id: ShipmentId::from(row.get::<uuid::Uuid, _>("id")),
        tenant: TenantId::from(row.get::<i64, _>("tenant_id")),
        sales_order_id: row.get("sales_order_id"),
        ship_from_location: LocationId::from(row.get::<i64, _>("ship_from_location_id")),
        status: ShipmentStatus::from_str(&row.get::<String, _>("status")),
        posted_at: row.get("posted_at"),
        posted_idempotency_key: row.get("posted_idempotency_key"),
        movement_id: row
            .get::<Option<uuid::Uuid>, _>("movement_id")
            .map(MovementId::from),
        created_at: row.get("created_at"),
    }
}

#[derive(Debug, Clone)]
pub struct ShipmentLine {
    pub id: ShipmentLineId,
    pub shipment_id: ShipmentId,
    pub sales_order_line_id: DemandId,
    pub item: ItemId,
    pub location: LocationId,
    pub quantity_shipped: ScaledQty,
    pub uom: String,
    pub created_at: DateTime<Utc>,
}

pub(super) fn row_to_line(row: &sqlx::postgres::PgRow) -> ShipmentLine {
    ShipmentLine {
        id: ShipmentLineId::from(row.get::<uuid::Uuid, _>("id")),
        shipment_id: ShipmentId::from(row.get::<uuid::Uuid, _>("shipment_id")),
        sales_order_line_id: DemandId(row.get::<i64, _>("sales_order_line_id")),
        item: ItemId::from(row.get::<i64, _>("item_id")),
        location: LocationId::from(row.get::<i64, _>("location_id")),
        quantity_shipped: ScaledQty::from_raw(row.get::<i64, _>("quantity_shipped")),
        uom: row.get("uom"),
        created_at: row.get("created_at"),
    }
}
