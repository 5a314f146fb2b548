//! `InventoryMovement` / `InventoryMovementLine`: the append-only record of
//! every stock quantity change this crate ever posts. Only ever written by
//! the shipment poster today, but modeled as its own module (not folded
//! into `shipment/`) because spec.md §3 treats it as an independent entity
//! with its own uniqueness rules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{Postgres, Row, Transaction};

use crate::config::EngineConfig;
use crate::core_types::{ItemId, LocationId, MovementId, ShipmentLineId, TenantId};
use crate::error::EngineError;
use crate::money::{ScaledQty, ScaledQtySigned};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementType {
    Issue,
    Receive,
    Transfer,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Issue => "issue",
            MovementType::Receive => "receive",
            MovementType::Transfer => "transfer",
            MovementType::Adjustment => "adjustment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementStatus {
    Draft,
    Posted,
}

impl MovementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementStatus::Draft => "draft",
            MovementStatus::Posted => "posted",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "posted" => MovementStatus::Posted,
            _ => MovementStatus::Draft,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub tenant: TenantId,
    pub movement_type: MovementType,
    pub status: MovementStatus,
    pub external_ref: Option<String>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

fn row_to_movement(row: &sqlx::postgres::PgRow) -> InventoryMovement {
    InventoryMovement {
        id: MovementId::from(row.get::<uuid::Uuid, _>("id")),
        tenant: TenantId::from(row.get::<i64, _>("tenant_id")),
        movement_type: match row.get::<String, _>("movement_type").as_str() {
            "receive" => MovementType::Receive,
            "transfer" => MovementType::Transfer,
            "adjustment" => MovementType::Adjustment,
            _ => MovementType::Issue,
        },
        status: MovementStatus::from_str(&row.get::<String, _>("status")),
        external_ref: row.get("external_ref"),
        source_type: row.get("source_type"),
        source_id: row.get("source_id"),
        idempotency_key: row.get("idempotency_key"),
        occurred_at: row.get("occurred_at"),
        posted_at: row.get("posted_at"),
        metadata: row.get("metadata"),
    }
}

pub struct NewMovement {
    pub tenant: TenantId,
    pub movement_type: MovementType,
    pub status: MovementStatus,
    pub external_ref: Option<String>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
}

/// Gate for `config.enforce_inventory_movement_external_ref` (spec.md §6):
/// when set, a movement without `external_ref` is rejected.
fn check_external_ref_enforced(config: &EngineConfig, external_ref: &Option<String>) -> Result<(), EngineError> {
    if config.enforce_inventory_movement_external_ref && external_ref.is_none() {
        return Err(EngineError::MovementExternalRefRequired);
    }
    Ok(())
}

/// Gate for `config.enforce_canonical_movement_fields` (spec.md §6): once
/// set, a line posted for a movement occurring at or after
/// `canonical_movement_required_after` (or from the start, if that cutover
/// is unset) must carry both its entered and canonical uom — an empty
/// string on either side means the triplet was never populated.
fn check_canonical_fields_enforced(
    config: &EngineConfig,
    occurred_at: DateTime<Utc>,
    uom_entered: &str,
    canonical_uom: &str,
) -> Result<(), EngineError> {
    let required_after = config
        .canonical_movement_required_after
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    if config.enforce_canonical_movement_fields
        && occurred_at >= required_after
        && (uom_entered.is_empty() || canonical_uom.is_empty())
    {
        return Err(EngineError::CanonicalMovementFieldsRequired);
    }
    Ok(())
}

/// `INSERT ... ON CONFLICT (tenant_id, idempotency_key) DO NOTHING`, the
/// same once-only pattern as [`crate::cost_layer::create_receipt_cost_layer_once`]
/// — a retry of the same shipment post must never create a second movement.
///
/// Enforces `config.enforce_inventory_movement_external_ref` (spec.md §6):
/// when set, a movement without `external_ref` is rejected before the
/// insert is attempted.
pub async fn create_once(
    tx: &mut Transaction<'_, Postgres>,
    params: &NewMovement,
    config: &EngineConfig,
) -> Result<Option<InventoryMovement>, EngineError> {
    check_external_ref_enforced(config, &params.external_ref)?;

    let row = sqlx::query(
        r#"
        INSERT INTO inventory_movements
            (id, tenant_id, movement_type, status, external_ref, source_type, source_id,
             idempotency_key, occurred_at, posted_at, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), $9, $10)
        ON CONFLICT (tenant_id, idempotency_key) DO NOTHING
        RETURNING id, tenant_id, movement_type, status, external_ref, source_type, source_id,
                  idempotency_key, occurred_at, posted_at, metadata
        "#,
    )
    .bind(MovementId::new().get())
    .bind(params.tenant.get())
    .bind(params.movement_type.as_str())
    .bind(params.status.as_str())
    .bind(&params.external_ref)
    .bind(&params.source_type)
    .bind(&params.source_id)
    .bind(&params.idempotency_key)
    .bind(if params.status == MovementStatus::Posted {
        Some(Utc::now())
    } else {
        None
    })
    .bind(&params.metadata)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(row_to_movement))
}

pub async fn find_by_idempotency_key(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    idempotency_key: &str,
) -> Result<Option<InventoryMovement>, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, movement_type, status, external_ref, source_type, source_id,
               idempotency_key, occurred_at, posted_at, metadata
        FROM inventory_movements
        WHERE tenant_id = $1 AND idempotency_key = $2
        "#,
    )
    .bind(tenant.get())
    .bind(idempotency_key)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(row_to_movement))
}

/// One consumed or issued line on a movement, carrying both the
/// as-entered and canonicalized quantity/uom pairs (spec.md §4.1's
/// `getCanonicalMovementFields` audit requirement).
pub struct NewMovementLine {
    pub item: ItemId,
    pub location: LocationId,
    pub quantity_delta_entered: ScaledQtySigned,
    pub uom_entered: String,
    pub quantity_delta_canonical: ScaledQtySigned,
    pub canonical_uom: String,
    pub uom_dimension: String,
    pub unit_cost: Option<Decimal>,
    pub extended_cost: Option<Decimal>,
    pub reason_code: Option<String>,
    /// Shipment line this movement line was posted for, when the movement
    /// came out of the shipment poster — `None` for other movement sources.
    pub shipment_line_id: Option<ShipmentLineId>,
    /// Portion of `quantity_delta_canonical` that was satisfied out of a
    /// reservation rather than free stock, carried so a posted shipment's
    /// view can be rebuilt byte-for-byte on idempotent replay.
    pub reserve_consume: ScaledQty,
}

/// Enforces `config.enforce_canonical_movement_fields` (spec.md §6): once
/// set, a line posted for a movement occurring at or after
/// `canonical_movement_required_after` (or from the start, if that cutover
/// is unset) must carry both its entered and canonical uom — an empty
/// string on either side means the triplet was never populated.
pub async fn insert_line(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    movement_id: MovementId,
    occurred_at: DateTime<Utc>,
    line: &NewMovementLine,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    check_canonical_fields_enforced(config, occurred_at, &line.uom_entered, &line.canonical_uom)?;

    sqlx::query(
        r#"
        INSERT INTO inventory_movement_lines
            (id, tenant_id, movement_id, item_id, location_id, quantity_delta, uom,
             quantity_delta_entered, uom_entered, quantity_delta_canonical, canonical_uom,
             uom_dimension, unit_cost, extended_cost, reason_code, shipment_line_id, reserve_consume)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(tenant.get())
    .bind(movement_id.get())
    .bind(line.item.get())
    .bind(line.location.get())
    .bind(line.quantity_delta_canonical.raw())
    .bind(&line.canonical_uom)
    .bind(line.quantity_delta_entered.raw())
    .bind(&line.uom_entered)
    .bind(line.quantity_delta_canonical.raw())
    .bind(&line.canonical_uom)
    .bind(&line.uom_dimension)
    .bind(line.unit_cost)
    .bind(line.extended_cost)
    .bind(&line.reason_code)
    .bind(line.shipment_line_id.map(|id| id.get()))
    .bind(line.reserve_consume.raw())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// A posted movement line read back, keyed by the shipment line it came
/// from — used to rebuild a [`crate::shipment::poster::ShipmentView`]
/// on idempotent replay without re-deriving canonicalization or
/// reservation-consumption split.
pub struct InventoryMovementLine {
    pub shipment_line_id: Option<ShipmentLineId>,
    pub item: ItemId,
    pub location: LocationId,
    pub canonical_uom: String,
    pub quantity_delta_canonical: ScaledQtySigned,
    pub reserve_consume: ScaledQty,
}

fn row_to_movement_line(row: &sqlx::postgres::PgRow) -> InventoryMovementLine {
    InventoryMovementLine {
        shipment_line_id: row
            .get::<Option<uuid::Uuid>, _>("shipment_line_id")
            .map(ShipmentLineId::from),
        item: ItemId::from(row.get::<i64, _>("item_id")),
        location: LocationId::from(row.get::<i64, _>("location_id")),
        canonical_uom: row.get("canonical_uom"),
        quantity_delta_canonical: ScaledQtySigned::from_raw(row.get("quantity_delta_canonical")),
        reserve_consume: ScaledQty::from_raw(row.get("reserve_consume")),
    }
}

pub async fn list_lines(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    movement_id: MovementId,
) -> Result<Vec<InventoryMovementLine>, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT shipment_line_id, item_id, location_id, canonical_uom,
               quantity_delta_canonical, reserve_consume
        FROM inventory_movement_lines
        WHERE tenant_id = $1 AND movement_id = $2
        "#,
    )
    .bind(tenant.get())
    .bind(movement_id.get())
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.iter().map(row_to_movement_line).collect())
}

pub async fn count_lines(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    movement_id: MovementId,
) -> Result<i64, EngineError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM inventory_movement_lines WHERE tenant_id = $1 AND movement_id = $2")
        .bind(tenant.get())
        .bind(movement_id.get())
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.get("n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(enforce_external_ref: bool, enforce_canonical: bool, required_after: Option<DateTime<Utc>>) -> EngineConfig {
        EngineConfig {
            enforce_inventory_movement_external_ref: enforce_external_ref,
            enforce_canonical_movement_fields: enforce_canonical,
            canonical_movement_required_after: required_after,
            ..EngineConfig::from_env()
        }
    }

    #[test]
    fn external_ref_gate_passes_when_flag_off() {
        let config = config_with(false, false, None);
        assert!(check_external_ref_enforced(&config, &None).is_ok());
    }

    #[test]
    fn external_ref_gate_rejects_missing_ref_when_enforced() {
        let config = config_with(true, false, None);
        assert!(matches!(
            check_external_ref_enforced(&config, &None),
            Err(EngineError::MovementExternalRefRequired)
        ));
    }

    #[test]
    fn external_ref_gate_accepts_present_ref_when_enforced() {
        let config = config_with(true, false, None);
        assert!(check_external_ref_enforced(&config, &Some("shipment:1".to_string())).is_ok());
    }

    #[test]
    fn canonical_fields_gate_passes_when_flag_off() {
        let config = config_with(false, false, None);
        assert!(check_canonical_fields_enforced(&config, Utc::now(), "", "").is_ok());
    }

    #[test]
    fn canonical_fields_gate_rejects_empty_triplet_when_enforced_with_no_cutover() {
        let config = config_with(false, true, None);
        assert!(matches!(
            check_canonical_fields_enforced(&config, Utc::now(), "", "g"),
            Err(EngineError::CanonicalMovementFieldsRequired)
        ));
    }

    #[test]
    fn canonical_fields_gate_accepts_populated_triplet_when_enforced() {
        let config = config_with(false, true, None);
        assert!(check_canonical_fields_enforced(&config, Utc::now(), "mg", "g").is_ok());
    }

    #[test]
    fn canonical_fields_gate_respects_cutover_timestamp() {
        let cutover = Utc::now();
        let config = config_with(false, true, Some(cutover));
        let before = cutover - chrono::Duration::seconds(1);
        assert!(check_canonical_fields_enforced(&config, before, "", "").is_ok());
        let after = cutover + chrono::Duration::seconds(1);
        assert!(matches!(
            check_canonical_fields_enforced(&config, after, "", ""),
            Err(EngineError::CanonicalMovementFieldsRequired)
        ));
    }
}
