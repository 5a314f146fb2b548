//! FIFO cost-layer accounting: append-only `CostLayer` rows per (item,
//! location, uom), drained oldest-first by [`consume_cost_layers`] and
//! recorded into [`CostLayerConsumption`] rows for audit.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Postgres, Row, Transaction};

use crate::core_types::{CostLayerId, ItemId, LocationId, MovementId, TenantId};
use crate::error::EngineError;
use crate::money::{EPSILON_RAW, ScaledQty};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostLayerSource {
    Receipt,
    Production,
    Adjustment,
    OpeningBalance,
    TransferIn,
}

impl CostLayerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostLayerSource::Receipt => "receipt",
            CostLayerSource::Production => "production",
            CostLayerSource::Adjustment => "adjustment",
            CostLayerSource::OpeningBalance => "opening_balance",
            CostLayerSource::TransferIn => "transfer_in",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "receipt" => Some(CostLayerSource::Receipt),
            "production" => Some(CostLayerSource::Production),
            "adjustment" => Some(CostLayerSource::Adjustment),
            "opening_balance" => Some(CostLayerSource::OpeningBalance),
            "transfer_in" => Some(CostLayerSource::TransferIn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostLayer {
    pub id: CostLayerId,
    pub tenant: TenantId,
    pub item: ItemId,
    pub location: LocationId,
    pub uom: String,
    pub layer_date: NaiveDate,
    pub layer_sequence: i32,
    pub original_qty: ScaledQty,
    pub remaining_qty: ScaledQty,
    pub unit_cost: Decimal,
    pub source_type: CostLayerSource,
    pub source_document_id: Option<String>,
    pub movement_id: Option<MovementId>,
    pub lot_id: Option<String>,
    pub voided: bool,
}

fn row_to_layer(row: &sqlx::postgres::PgRow) -> CostLayer {
    CostLayer {
        id: CostLayerId::from(row.get::<uuid::Uuid, _>("id")),
        tenant: TenantId::from(row.get::<i64, _>("tenant_id")),
        item: ItemId::from(row.get::<i64, _>("item_id")),
        location: LocationId::from(row.get::<i64, _>("location_id")),
        uom: row.get("uom"),
        layer_date: row.get("layer_date"),
        layer_sequence: row.get("layer_sequence"),
        original_qty: ScaledQty::from_raw(row.get::<i64, _>("original_qty")),
        remaining_qty: ScaledQty::from_raw(row.get::<i64, _>("remaining_qty")),
        unit_cost: row.get("unit_cost"),
        source_type: CostLayerSource::from_str(row.get::<String, _>("source_type").as_str())
            .unwrap_or(CostLayerSource::Adjustment),
        source_document_id: row.get("source_document_id"),
        movement_id: row
            .get::<Option<uuid::Uuid>, _>("movement_id")
            .map(MovementId::from),
        lot_id: row.get("lot_id"),
        voided: row.get("voided"),
    }
}

pub struct NewCostLayer {
    pub tenant: TenantId,
    pub item: ItemId,
    pub location: LocationId,
    pub uom: String,
    pub layer_date: NaiveDate,
    pub original_qty: ScaledQty,
    pub unit_cost: Decimal,
    pub source_type: CostLayerSource,
    pub source_document_id: Option<String>,
    pub movement_id: Option<MovementId>,
    pub lot_id: Option<String>,
}

/// Computes the next `layerSequence` for `(item, location, day)` and
/// inserts a layer with `remainingQty = originalQty`.
pub async fn create_cost_layer(
    tx: &mut Transaction<'_, Postgres>,
    params: NewCostLayer,
) -> Result<CostLayer, EngineError> {
    let next_sequence: i32 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(layer_sequence), 0) + 1
        FROM inventory_cost_layers
        WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3 AND layer_date = $4
        "#,
    )
    .bind(params.tenant.get())
    .bind(params.item.get())
    .bind(params.location.get())
    .bind(params.layer_date)
    .fetch_one(&mut **tx)
    .await?;

    let row = sqlx::query(
        r#"
        INSERT INTO inventory_cost_layers
            (id, tenant_id, item_id, location_id, uom, layer_date, layer_sequence,
             original_qty, remaining_qty, unit_cost, source_type, source_document_id,
             movement_id, lot_id, voided, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, $9, $10, $11, $12, $13, false, NOW())
        RETURNING id, tenant_id, item_id, location_id, uom, layer_date, layer_sequence,
                  original_qty, remaining_qty, unit_cost, source_type, source_document_id,
                  movement_id, lot_id, voided
        "#,
    )
    .bind(CostLayerId::new().get())
    .bind(params.tenant.get())
    .bind(params.item.get())
    .bind(params.location.get())
    .bind(&params.uom)
    .bind(params.layer_date)
    .bind(next_sequence)
    .bind(params.original_qty.raw())
    .bind(params.unit_cost)
    .bind(params.source_type.as_str())
    .bind(&params.source_document_id)
    .bind(params.movement_id.map(|m| m.get()))
    .bind(&params.lot_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row_to_layer(&row))
}

/// `INSERT ... ON CONFLICT DO NOTHING` on `(tenant, sourceType='receipt',
/// sourceDocumentId)`; on conflict returns the existing layer so a receipt
/// retried under a new idempotency key still resolves to exactly one
/// layer.
pub async fn create_receipt_cost_layer_once(
    tx: &mut Transaction<'_, Postgres>,
    params: NewCostLayer,
) -> Result<CostLayer, EngineError> {
    debug_assert_eq!(params.source_type, CostLayerSource::Receipt);
    let source_document_id = params
        .source_document_id
        .clone()
        .expect("receipt cost layers require a sourceDocumentId");

    let inserted = sqlx::query(
        r#"
        INSERT INTO inventory_cost_layers
            (id, tenant_id, item_id, location_id, uom, layer_date, layer_sequence,
             original_qty, remaining_qty, unit_cost, source_type, source_document_id,
             movement_id, lot_id, voided, created_at)
        SELECT $1, $2, $3, $4, $5, $6,
               COALESCE((SELECT MAX(layer_sequence) FROM inventory_cost_layers
                         WHERE tenant_id = $2 AND item_id = $3 AND location_id = $4 AND layer_date = $6), 0) + 1,
               $7, $7, $8, 'receipt', $9, $10, $11, false, NOW()
        ON CONFLICT (tenant_id, source_type, source_document_id) WHERE source_type = 'receipt' AND NOT voided
        DO NOTHING
        RETURNING id, tenant_id, item_id, location_id, uom, layer_date, layer_sequence,
                  original_qty, remaining_qty, unit_cost, source_type, source_document_id,
                  movement_id, lot_id, voided
        "#,
    )
    .bind(CostLayerId::new().get())
    .bind(params.tenant.get())
    .bind(params.item.get())
    .bind(params.location.get())
    .bind(&params.uom)
    .bind(params.layer_date)
    .bind(params.original_qty.raw())
    .bind(params.unit_cost)
    .bind(&source_document_id)
    .bind(params.movement_id.map(|m| m.get()))
    .bind(&params.lot_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(row) = inserted {
        return Ok(row_to_layer(&row));
    }

    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, item_id, location_id, uom, layer_date, layer_sequence,
               original_qty, remaining_qty, unit_cost, source_type, source_document_id,
               movement_id, lot_id, voided
        FROM inventory_cost_layers
        WHERE tenant_id = $1 AND source_type = 'receipt' AND source_document_id = $2 AND NOT voided
        "#,
    )
    .bind(params.tenant.get())
    .bind(&source_document_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row_to_layer(&row))
}

/// Layers available for consumption, FIFO ordered: `layerDate ASC,
/// layerSequence ASC`, excluding voided or fully exhausted layers.
pub async fn get_available_layers(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    item: ItemId,
    location: LocationId,
) -> Result<Vec<CostLayer>, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, tenant_id, item_id, location_id, uom, layer_date, layer_sequence,
               original_qty, remaining_qty, unit_cost, source_type, source_document_id,
               movement_id, lot_id, voided
        FROM inventory_cost_layers
        WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3
          AND NOT voided AND remaining_qty > 0
        ORDER BY layer_date ASC, layer_sequence ASC
        FOR UPDATE
        "#,
    )
    .bind(tenant.get())
    .bind(item.get())
    .bind(location.get())
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.iter().map(row_to_layer).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionType {
    Shipment,
    Adjustment,
    TransferOut,
}

impl ConsumptionType {
    fn as_str(&self) -> &'static str {
        match self {
            ConsumptionType::Shipment => "shipment",
            ConsumptionType::Adjustment => "adjustment",
            ConsumptionType::TransferOut => "transfer_out",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostLayerConsumption {
    pub layer_id: CostLayerId,
    pub consumed_qty: ScaledQty,
    pub unit_cost: Decimal,
    pub extended_cost: Decimal,
}

#[derive(Debug, Clone)]
pub struct ConsumptionResult {
    pub total_cost: Decimal,
    pub weighted_average_unit_cost: Decimal,
    pub consumptions: Vec<CostLayerConsumption>,
}

/// Greedily drains layers oldest-first for `qty`. Fails [`EngineError::NoLayers`]
/// when there are none to draw from at all, [`EngineError::InsufficientLayerQty`]
/// when the sum of all available layers is short by more than ε.
pub async fn consume_cost_layers(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    item: ItemId,
    location: LocationId,
    qty: ScaledQty,
    consumption_type: ConsumptionType,
    doc_id: &str,
    movement_id: MovementId,
) -> Result<ConsumptionResult, EngineError> {
    let layers = get_available_layers(tx, tenant, item, location).await?;
    if layers.is_empty() {
        return Err(EngineError::NoLayers);
    }

    let total_available: i64 = layers.iter().map(|l| l.remaining_qty.raw()).sum();
    if total_available < qty.raw() - EPSILON_RAW {
        return Err(EngineError::InsufficientLayerQty {
            requested: qty.to_decimal().to_string(),
            available: ScaledQty::from_raw(total_available).to_decimal().to_string(),
        });
    }

    let mut remaining_to_consume = qty.raw();
    let mut total_cost = Decimal::ZERO;
    let mut consumptions = Vec::new();

    for layer in layers {
        if remaining_to_consume <= EPSILON_RAW {
            break;
        }
        let take = remaining_to_consume.min(layer.remaining_qty.raw());
        if take <= 0 {
            continue;
        }

        let take_qty = ScaledQty::from_raw(take);
        let extended_cost = take_qty.to_decimal() * layer.unit_cost;

        sqlx::query(
            r#"
            INSERT INTO cost_layer_consumptions
                (id, layer_id, tenant_id, consumed_qty, unit_cost, extended_cost,
                 consumption_type, doc_id, movement_id, consumed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(layer.id.get())
        .bind(tenant.get())
        .bind(take)
        .bind(layer.unit_cost)
        .bind(extended_cost)
        .bind(consumption_type.as_str())
        .bind(doc_id)
        .bind(movement_id.get())
        .execute(&mut **tx)
        .await?;

        sqlx::query("UPDATE inventory_cost_layers SET remaining_qty = remaining_qty - $1 WHERE id = $2")
            .bind(take)
            .bind(layer.id.get())
            .execute(&mut **tx)
            .await?;

        total_cost += extended_cost;
        consumptions.push(CostLayerConsumption {
            layer_id: layer.id,
            consumed_qty: take_qty,
            unit_cost: layer.unit_cost,
            extended_cost,
        });
        remaining_to_consume -= take;
    }

    let weighted_average_unit_cost = if qty.raw() > 0 {
        total_cost / qty.to_decimal()
    } else {
        Decimal::ZERO
    };

    Ok(ConsumptionResult {
        total_cost,
        weighted_average_unit_cost,
        consumptions,
    })
}

/// Deletes a layer only when it has never been consumed and
/// `remaining == original`.
pub async fn delete_cost_layer(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    layer_id: CostLayerId,
) -> Result<bool, EngineError> {
    let result = sqlx::query(
        r#"
        DELETE FROM inventory_cost_layers
        WHERE id = $1 AND tenant_id = $2 AND remaining_qty = original_qty
          AND NOT EXISTS (SELECT 1 FROM cost_layer_consumptions WHERE layer_id = $1)
        "#,
    )
    .bind(layer_id.get())
    .bind(tenant.get())
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool_env() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    #[tokio::test]
    #[ignore]
    async fn fifo_consumption_drains_oldest_layer_first() {
        let Some(database_url) = test_pool_env() else {
            eprintln!("Skipping test - database not available");
            return;
        };
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await
            .expect("connect");
        let mut tx = pool.begin().await.expect("begin");

        let tenant = TenantId::from(1);
        let item = ItemId::from(1);
        let location = LocationId::from(1);

        let older = create_cost_layer(
            &mut tx,
            NewCostLayer {
                tenant,
                item,
                location,
                uom: "ea".into(),
                layer_date: chrono::Utc::now().date_naive() - chrono::Duration::days(1),
                original_qty: ScaledQty::from_raw(5_000_000),
                unit_cost: Decimal::from(10),
                source_type: CostLayerSource::Adjustment,
                source_document_id: None,
                movement_id: None,
                lot_id: None,
            },
        )
        .await
        .expect("create older layer");

        let result = consume_cost_layers(
            &mut tx,
            tenant,
            item,
            location,
            ScaledQty::from_raw(3_000_000),
            ConsumptionType::Shipment,
            "doc-1",
            MovementId::new(),
        )
        .await
        .expect("consume");

        assert_eq!(result.consumptions.len(), 1);
        assert_eq!(result.consumptions[0].layer_id, older.id);
        assert_eq!(result.total_cost, Decimal::from(30));
    }
}
