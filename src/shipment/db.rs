//! Row-level persistence for shipment headers and lines. Raw `sqlx::query`
//! + manual row mapping, the same style as [`crate::reservation::db`].

use chrono::Utc;
use sqlx::{Postgres, Row, Transaction};

use crate::core_types::{DemandId, ItemId, LocationId, MovementId, ShipmentId, ShipmentLineId, TenantId};
use crate::error::EngineError;
use crate::money::ScaledQty;

use super::model::{Shipment, ShipmentLine, row_to_line, row_to_shipment};

pub struct NewShipment {
    pub tenant: TenantId,
    pub sales_order_id: String,
    pub ship_from_location: LocationId,
}

/// Creates a `draft` shipment header. Exercised by tests and by whatever
/// excluded peer stages a shipment before asking this crate to post it.
pub async fn insert_draft(
    tx: &mut Transaction<'_, Postgres>,
    params: &NewShipment,
) -> Result<Shipment, EngineError> {
    let row = sqlx::query(
        r#"
        INSERT INTO sales_order_shipments
            (id, tenant_id, sales_order_id, ship_from_location_id, status, created_at)
        VALUES ($1, $2, $3, $4, 'draft', NOW())
        RETURNING id, tenant_id, sales_order_id, ship_from_location_id, status,
                  posted_at, posted_idempotency_key, movement_id, created_at
        "#,
    )
    .bind(ShipmentId::new().get())
    .bind(params.tenant.get())
    .bind(&params.sales_order_id)
    .bind(params.ship_from_location.get())
    .fetch_one(&mut **tx)
    .await?;

    Ok(row_to_shipment(&row))
}

pub struct NewShipmentLine {
    pub sales_order_line_id: DemandId,
    pub item: ItemId,
    pub location: LocationId,
    pub quantity_shipped: ScaledQty,
    pub uom: String,
}

pub async fn insert_line(
    tx: &mut Transaction<'_, Postgres>,
    shipment_id: ShipmentId,
    line: &NewShipmentLine,
) -> Result<ShipmentLine, EngineError> {
    let row = sqlx::query(
        r#"
        INSERT INTO sales_order_shipment_lines
            (id, shipment_id, sales_order_line_id, item_id, location_id, quantity_shipped, uom, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        RETURNING id, shipment_id, sales_order_line_id, item_id, location_id, quantity_shipped, uom, created_at
        "#,
    )
    .bind(ShipmentLineId::new().get())
    .bind(shipment_id.get())
    .bind(line.sales_order_line_id.0)
    .bind(line.item.get())
    .bind(line.location.get())
    .bind(line.quantity_shipped.raw())
    .bind(&line.uom)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row_to_line(&row))
}

pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    id: ShipmentId,
) -> Result<Shipment, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, sales_order_id, ship_from_location_id, status,
               posted_at, posted_idempotency_key, movement_id, created_at
        FROM sales_order_shipments
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(id.get())
    .bind(tenant.get())
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref()
        .map(row_to_shipment)
        .ok_or_else(|| EngineError::ShipmentNotFound(id.to_string()))
}

/// Locks the shipment header `FOR UPDATE` — the first lock taken by the
/// poster, before any advisory or balance lock (spec.md §4.6 step 1).
pub async fn lock_shipment(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    id: ShipmentId,
) -> Result<Shipment, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, sales_order_id, ship_from_location_id, status,
               posted_at, posted_idempotency_key, movement_id, created_at
        FROM sales_order_shipments
        WHERE id = $1 AND tenant_id = $2
        FOR UPDATE
        "#,
    )
    .bind(id.get())
    .bind(tenant.get())
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref()
        .map(row_to_shipment)
        .ok_or_else(|| EngineError::ShipmentNotFound(id.to_string()))
}

/// Locks every line of the shipment, ordered by creation (spec.md §4.6
/// step 2), so line iteration order is stable across retries.
pub async fn lock_lines(
    tx: &mut Transaction<'_, Postgres>,
    shipment_id: ShipmentId,
) -> Result<Vec<ShipmentLine>, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, shipment_id, sales_order_line_id, item_id, location_id, quantity_shipped, uom, created_at
        FROM sales_order_shipment_lines
        WHERE shipment_id = $1
        ORDER BY created_at ASC
        FOR UPDATE
        "#,
    )
    .bind(shipment_id.get())
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.iter().map(row_to_line).collect())
}

pub async fn mark_posted(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    id: ShipmentId,
    movement_id: MovementId,
    idempotency_key: &str,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        UPDATE sales_order_shipments
        SET status = 'posted', posted_at = $1, posted_idempotency_key = $2, movement_id = $3
        WHERE id = $4 AND tenant_id = $5
        "#,
    )
    .bind(Utc::now())
    .bind(idempotency_key)
    .bind(movement_id.get())
    .bind(id.get())
    .bind(tenant.get())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
