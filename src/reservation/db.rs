//! Row-level persistence for reservations, reservation events and
//! backorders. Raw `sqlx::query` + manual row mapping, the same style used
//! throughout this codebase's transactional stores.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};

use crate::core_types::{DemandId, ItemId, LocationId, ReservationId, TenantId, WarehouseId};
use crate::error::EngineError;
use crate::money::ScaledQty;

use super::model::{DemandType, Reservation, ReservationEventType, row_to_reservation};
use super::state::ReservationState;

pub struct NewReservation {
    pub tenant: TenantId,
    pub warehouse: WarehouseId,
    pub demand_type: DemandType,
    pub demand_id: DemandId,
    pub item: ItemId,
    pub location: LocationId,
    pub canonical_uom: String,
    pub quantity_reserved: ScaledQty,
    pub idempotency_key: Option<String>,
}

/// `INSERT ... ON CONFLICT DO NOTHING`, conflicting on either the
/// idempotency key or the unique non-terminal demand tuple. Returns the
/// inserted row, or `None` on conflict — the caller resolves conflicts by
/// re-reading via [`find_by_idempotency_key`] or [`find_by_demand_tuple`].
pub async fn insert_new(
    tx: &mut Transaction<'_, Postgres>,
    params: &NewReservation,
) -> Result<Option<Reservation>, EngineError> {
    let row = sqlx::query(
        r#"
        INSERT INTO inventory_reservations
            (id, tenant_id, warehouse_id, demand_type, demand_id, item_id, location_id,
             canonical_uom, state, quantity_reserved, quantity_fulfilled, reserved_at,
             idempotency_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, NOW(), $11)
        ON CONFLICT DO NOTHING
        RETURNING id, tenant_id, warehouse_id, demand_type, demand_id, item_id, location_id,
                  canonical_uom, state, quantity_reserved, quantity_fulfilled, reserved_at,
                  allocated_at, fulfilled_at, canceled_at, expired_at, expires_at,
                  idempotency_key, cancel_reason
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(params.tenant.get())
    .bind(params.warehouse.get())
    .bind(&params.demand_type.0)
    .bind(params.demand_id.0)
    .bind(params.item.get())
    .bind(params.location.get())
    .bind(&params.canonical_uom)
    .bind(ReservationState::Reserved.id())
    .bind(params.quantity_reserved.raw())
    .bind(&params.idempotency_key)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(row_to_reservation))
}

pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    id: ReservationId,
) -> Result<Reservation, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, warehouse_id, demand_type, demand_id, item_id, location_id,
               canonical_uom, state, quantity_reserved, quantity_fulfilled, reserved_at,
               allocated_at, fulfilled_at, canceled_at, expired_at, expires_at,
               idempotency_key, cancel_reason
        FROM inventory_reservations
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(id.get())
    .bind(tenant.get())
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref()
        .map(row_to_reservation)
        .ok_or_else(|| EngineError::ReservationNotFound(id.to_string()))
}

/// Locks the row `FOR UPDATE` before reading — used on every mutating path
/// once the advisory lock for its `(tenant, warehouse, item)` is held.
pub async fn lock_and_get(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    id: ReservationId,
) -> Result<Reservation, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, warehouse_id, demand_type, demand_id, item_id, location_id,
               canonical_uom, state, quantity_reserved, quantity_fulfilled, reserved_at,
               allocated_at, fulfilled_at, canceled_at, expired_at, expires_at,
               idempotency_key, cancel_reason
        FROM inventory_reservations
        WHERE id = $1 AND tenant_id = $2
        FOR UPDATE
        "#,
    )
    .bind(id.get())
    .bind(tenant.get())
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref()
        .map(row_to_reservation)
        .ok_or_else(|| EngineError::ReservationNotFound(id.to_string()))
}

pub async fn find_by_idempotency_key(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    idempotency_key: &str,
) -> Result<Option<Reservation>, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, warehouse_id, demand_type, demand_id, item_id, location_id,
               canonical_uom, state, quantity_reserved, quantity_fulfilled, reserved_at,
               allocated_at, fulfilled_at, canceled_at, expired_at, expires_at,
               idempotency_key, cancel_reason
        FROM inventory_reservations
        WHERE tenant_id = $1 AND idempotency_key = $2
        "#,
    )
    .bind(tenant.get())
    .bind(idempotency_key)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(row_to_reservation))
}

/// Finds the (at most one) non-terminal reservation for the unique demand
/// tuple `(tenant, warehouse, demandType, demandId, item, location,
/// canonicalUom)`.
pub async fn find_by_demand_tuple(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    warehouse: WarehouseId,
    demand_type: &DemandType,
    demand_id: DemandId,
    item: ItemId,
    location: LocationId,
    canonical_uom: &str,
) -> Result<Option<Reservation>, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, warehouse_id, demand_type, demand_id, item_id, location_id,
               canonical_uom, state, quantity_reserved, quantity_fulfilled, reserved_at,
               allocated_at, fulfilled_at, canceled_at, expired_at, expires_at,
               idempotency_key, cancel_reason
        FROM inventory_reservations
        WHERE tenant_id = $1 AND warehouse_id = $2 AND demand_type = $3 AND demand_id = $4
          AND item_id = $5 AND location_id = $6 AND canonical_uom = $7
          AND state NOT IN ($8, $9, $10)
        "#,
    )
    .bind(tenant.get())
    .bind(warehouse.get())
    .bind(&demand_type.0)
    .bind(demand_id.0)
    .bind(item.get())
    .bind(location.get())
    .bind(canonical_uom)
    .bind(ReservationState::Fulfilled.id())
    .bind(ReservationState::Cancelled.id())
    .bind(ReservationState::Expired.id())
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(row_to_reservation))
}

/// Finds the (RESERVED or ALLOCATED) reservation matching a shipment
/// line's demand tuple, for the shipment poster's reservation lookup.
pub async fn find_open_for_demand(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    warehouse: WarehouseId,
    demand_type: &DemandType,
    demand_id: DemandId,
    item: ItemId,
    location: LocationId,
    canonical_uom: &str,
) -> Result<Option<Reservation>, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, warehouse_id, demand_type, demand_id, item_id, location_id,
               canonical_uom, state, quantity_reserved, quantity_fulfilled, reserved_at,
               allocated_at, fulfilled_at, canceled_at, expired_at, expires_at,
               idempotency_key, cancel_reason
        FROM inventory_reservations
        WHERE tenant_id = $1 AND warehouse_id = $2 AND demand_type = $3 AND demand_id = $4
          AND item_id = $5 AND location_id = $6 AND canonical_uom = $7
          AND state IN ($8, $9)
        "#,
    )
    .bind(tenant.get())
    .bind(warehouse.get())
    .bind(&demand_type.0)
    .bind(demand_id.0)
    .bind(item.get())
    .bind(location.get())
    .bind(canonical_uom)
    .bind(ReservationState::Reserved.id())
    .bind(ReservationState::Allocated.id())
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(row_to_reservation))
}

/// CAS transition: `UPDATE ... WHERE id=$1 AND state=$expected`, returns
/// whether it actually changed anything.
pub async fn transition(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    id: ReservationId,
    expected: ReservationState,
    next: ReservationState,
    quantity_fulfilled: ScaledQty,
    cancel_reason: Option<&str>,
) -> Result<bool, EngineError> {
    let now_column = match next {
        ReservationState::Allocated => "allocated_at",
        ReservationState::Fulfilled => "fulfilled_at",
        ReservationState::Cancelled => "canceled_at",
        ReservationState::Expired => "expired_at",
        ReservationState::Reserved => "reserved_at",
    };

    let sql = format!(
        r#"
        UPDATE inventory_reservations
        SET state = $1, quantity_fulfilled = $2, {now_column} = NOW(), cancel_reason = COALESCE($3, cancel_reason)
        WHERE id = $4 AND tenant_id = $5 AND state = $6
        "#
    );

    let result = sqlx::query(&sql)
        .bind(next.id())
        .bind(quantity_fulfilled.raw())
        .bind(cancel_reason)
        .bind(id.get())
        .bind(tenant.get())
        .bind(expected.id())
        .execute(&mut **tx)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Append-only reservation event row.
pub async fn append_event(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    reservation_id: ReservationId,
    event_type: ReservationEventType,
    delta_reserved: i64,
    delta_allocated: i64,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO reservation_events
            (id, tenant_id, reservation_id, event_type, delta_reserved, delta_allocated, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(tenant.get())
    .bind(reservation_id.get())
    .bind(event_type.as_str())
    .bind(delta_reserved)
    .bind(delta_allocated)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Upserts a Backorder row, incrementing `quantityBackordered` on conflict.
pub async fn upsert_backorder(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    demand_type: &DemandType,
    demand_id: DemandId,
    item: ItemId,
    location: LocationId,
    uom: &str,
    quantity_backordered: ScaledQty,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO inventory_backorders
            (tenant_id, demand_type, demand_id, item_id, location_id, uom, quantity_backordered, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        ON CONFLICT (tenant_id, demand_type, demand_id, item_id, location_id, uom)
        DO UPDATE SET quantity_backordered = inventory_backorders.quantity_backordered + EXCLUDED.quantity_backordered,
                      updated_at = NOW()
        "#,
    )
    .bind(tenant.get())
    .bind(&demand_type.0)
    .bind(demand_id.0)
    .bind(item.get())
    .bind(location.get())
    .bind(uom)
    .bind(quantity_backordered.raw())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Partial-or-complete fulfillment write. A partial fulfillment (state
/// unchanged) only touches `quantity_fulfilled` — it must not stomp
/// `reserved_at`/`allocated_at` the way [`transition`]'s shared `now_column`
/// update would if reused here for a same-state CAS.
pub async fn apply_fulfillment(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    id: ReservationId,
    expected: ReservationState,
    quantity_fulfilled: ScaledQty,
    complete: bool,
) -> Result<bool, EngineError> {
    let result = if complete {
        sqlx::query(
            r#"
            UPDATE inventory_reservations
            SET state = $1, quantity_fulfilled = $2, fulfilled_at = NOW()
            WHERE id = $3 AND tenant_id = $4 AND state = $5
            "#,
        )
        .bind(ReservationState::Fulfilled.id())
        .bind(quantity_fulfilled.raw())
        .bind(id.get())
        .bind(tenant.get())
        .bind(expected.id())
        .execute(&mut **tx)
        .await?
    } else {
        sqlx::query(
            r#"
            UPDATE inventory_reservations
            SET quantity_fulfilled = $1
            WHERE id = $2 AND tenant_id = $3 AND state = $4
            "#,
        )
        .bind(quantity_fulfilled.raw())
        .bind(id.get())
        .bind(tenant.get())
        .bind(expected.id())
        .execute(&mut **tx)
        .await?
    };
    Ok(result.rows_affected() > 0)
}

/// Eligible rows for the background expiry job: non-terminal, `expiresAt`
/// in the past. `FOR UPDATE SKIP LOCKED` so concurrent job instances
/// partition the work instead of blocking on each other.
pub async fn find_stale(
    tx: &mut Transaction<'_, Postgres>,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Reservation>, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, tenant_id, warehouse_id, demand_type, demand_id, item_id, location_id,
               canonical_uom, state, quantity_reserved, quantity_fulfilled, reserved_at,
               allocated_at, fulfilled_at, canceled_at, expired_at, expires_at,
               idempotency_key, cancel_reason
        FROM inventory_reservations
        WHERE state = $1 AND expires_at IS NOT NULL AND expires_at < $2
        ORDER BY expires_at ASC
        LIMIT $3
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(ReservationState::Reserved.id())
    .bind(now)
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.iter().map(row_to_reservation).collect())
}

