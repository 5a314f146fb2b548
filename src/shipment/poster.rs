//! The shipment poster: spec.md §4.6, steps 1-12, reproduced in order.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::audit;
use crate::balance::{self, BalanceKey};
use crate::cache::SharedAtpCache;
use crate::config::EngineConfig;
use crate::core_types::{ItemId, LocationId, MovementId, ShipmentId, ShipmentLineId, TenantId, WarehouseId};
use crate::cost_layer::{self, ConsumptionType};
use crate::db::with_serializable_retry;
use crate::error::EngineError;
use crate::locks;
use crate::money::{EPSILON_RAW, ScaledQty, ScaledQtySigned};
use crate::movement::{self, MovementStatus, MovementType, NewMovement, NewMovementLine};
use crate::outbox;
use crate::reservation::collaborators::LocationCatalog;
use crate::reservation::db as rdb;
use crate::reservation::model::{DemandType, Reservation, ReservationEventType};
use crate::reservation::state::ReservationState;
use crate::uom::{self, UomCatalog};
use crate::validator::{self, ConsumptionLine, OverrideAuthority, OverrideMetadata, OverrideRequest};

use super::collaborators::SalesOrderCatalog;
use super::db as sdb;
use super::model::{Shipment, ShipmentStatus};

#[derive(Debug, Clone)]
pub struct PostShipmentRequest {
    pub idempotency_key: String,
    pub actor: String,
    pub override_request: OverrideRequest,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ShipmentLineView {
    pub shipment_line_id: ShipmentLineId,
    pub item: ItemId,
    pub location: LocationId,
    pub canonical_uom: String,
    pub issue_qty: ScaledQty,
    pub reserve_consume: ScaledQty,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ShipmentView {
    pub id: ShipmentId,
    pub tenant: TenantId,
    pub sales_order_id: String,
    pub status: String,
    pub movement_id: Option<MovementId>,
    pub lines: Vec<ShipmentLineView>,
    pub override_applied: bool,
}

/// One shipment line resolved to its canonical quantity and candidate
/// reservation, before advisory/reservation locks are taken.
struct ResolvedLine {
    line_id: ShipmentLineId,
    item: ItemId,
    location: LocationId,
    canonical_uom: String,
    dimension: String,
    issue_qty: ScaledQty,
    uom_entered: String,
    qty_entered: ScaledQty,
    reservation_id: Option<crate::core_types::ReservationId>,
}

pub struct ShipmentPoster {
    pool: PgPool,
    location_catalog: Arc<dyn LocationCatalog>,
    sales_order_catalog: Arc<dyn SalesOrderCatalog>,
    uom_catalog: Arc<dyn UomCatalog>,
    override_authority: Arc<dyn OverrideAuthority>,
    config: Arc<EngineConfig>,
    cache: Option<SharedAtpCache>,
}

impl ShipmentPoster {
    pub fn new(
        pool: PgPool,
        location_catalog: Arc<dyn LocationCatalog>,
        sales_order_catalog: Arc<dyn SalesOrderCatalog>,
        uom_catalog: Arc<dyn UomCatalog>,
        override_authority: Arc<dyn OverrideAuthority>,
        config: Arc<EngineConfig>,
        cache: Option<SharedAtpCache>,
    ) -> Self {
        Self {
            pool,
            location_catalog,
            sales_order_catalog,
            uom_catalog,
            override_authority,
            config,
            cache,
        }
    }

    fn invalidate(&self, tenant: TenantId, warehouse: WarehouseId) {
        if let Some(cache) = &self.cache {
            cache.invalidate_scope(tenant, warehouse);
        }
    }

    pub async fn post(
        &self,
        tenant: TenantId,
        shipment_id: ShipmentId,
        request: PostShipmentRequest,
    ) -> Result<ShipmentView, EngineError> {
        let request = Arc::new(request);
        with_serializable_retry(&self.pool, self.config.serializable_retries, move |tx| {
            let request = request.clone();
            Box::pin(async move { self.post_once(tx, tenant, shipment_id, &request).await })
        })
        .await
    }

    fn post_once<'c>(
        &'c self,
        tx: &'c mut Transaction<'_, Postgres>,
        tenant: TenantId,
        shipment_id: ShipmentId,
        request: &'c PostShipmentRequest,
    ) -> futures::future::BoxFuture<'c, Result<ShipmentView, EngineError>> {
        Box::pin(async move {
            // Step 1: lock shipment header, reject canceled, short-circuit posted.
            let mut shipment = sdb::lock_shipment(tx, tenant, shipment_id).await?;
            if shipment.status == ShipmentStatus::Cancelled {
                return Err(EngineError::ShipmentCanceled);
            }
            if shipment.status == ShipmentStatus::Posted {
                return self.build_noop_view(tx, tenant, &shipment).await;
            }

            // Step 2: lock lines ordered by creation; reject empty/non-positive.
            let lines = sdb::lock_lines(tx, shipment_id).await?;
            if lines.is_empty() || lines.iter().any(|l| l.quantity_shipped.raw() <= 0) {
                return Err(EngineError::ShipmentInvalidLines);
            }

            // Step 3: resolve ship-from warehouse, verify against sales order.
            let ship_from_warehouse = self
                .location_catalog
                .warehouse_of(tenant, shipment.ship_from_location)
                .ok_or(EngineError::WarehouseScopeRequired)?;
            if let Some(so_warehouse) = self
                .sales_order_catalog
                .warehouse_of_sales_order(tenant, &shipment.sales_order_id)
                && so_warehouse != ship_from_warehouse
            {
                return Err(EngineError::CrossWarehouseLeakageBlocked);
            }

            // Step 4: canonicalize each line, locate its open reservation.
            let demand_type = DemandType::sales_order_line();
            let mut resolved: Vec<ResolvedLine> = Vec::with_capacity(lines.len());
            for line in &lines {
                let canonical = uom::convert_to_canonical(
                    self.uom_catalog.as_ref(),
                    tenant,
                    line.item,
                    line.quantity_shipped,
                    &line.uom,
                )?;

                let reservation = rdb::find_open_for_demand(
                    tx,
                    tenant,
                    ship_from_warehouse,
                    &demand_type,
                    line.sales_order_line_id,
                    line.item,
                    line.location,
                    &canonical.canonical_uom,
                )
                .await?;

                resolved.push(ResolvedLine {
                    line_id: line.id,
                    item: line.item,
                    location: line.location,
                    canonical_uom: canonical.canonical_uom,
                    dimension: canonical.dimension,
                    issue_qty: canonical.qty_canonical,
                    uom_entered: canonical.uom_entered,
                    qty_entered: canonical.qty_entered,
                    reservation_id: reservation.as_ref().map(|r| r.id),
                });
            }

            // Step 5: sort by (item, canonicalUom, shipmentLineId); acquire
            // advisory locks, then lock reservations by id ASC.
            resolved.sort_by(|a, b| {
                (a.item.get(), a.canonical_uom.clone(), a.line_id)
                    .cmp(&(b.item.get(), b.canonical_uom.clone(), b.line_id))
            });

            let advisory_keys: Vec<(TenantId, WarehouseId, ItemId)> = resolved
                .iter()
                .map(|r| (tenant, ship_from_warehouse, r.item))
                .collect();
            locks::acquire_sorted(tx, &advisory_keys).await?;

            let mut reservation_ids: Vec<crate::core_types::ReservationId> =
                resolved.iter().filter_map(|r| r.reservation_id).collect();
            reservation_ids.sort();
            reservation_ids.dedup();

            let mut reservations: HashMap<crate::core_types::ReservationId, Reservation> = HashMap::new();
            for id in reservation_ids {
                let reservation = rdb::lock_and_get(tx, tenant, id).await?;
                reservations.insert(id, reservation);
            }

            // Step 6: compute reserveConsume / quantityToConsume per line.
            let mut consumption_lines = Vec::with_capacity(resolved.len());
            let mut reserve_consumes = Vec::with_capacity(resolved.len());
            for r in &resolved {
                let reserved_remaining = r
                    .reservation_id
                    .and_then(|id| reservations.get(&id))
                    .map(|res| res.open_remaining())
                    .unwrap_or(ScaledQty::ZERO);
                let reserve_consume = r.issue_qty.min(reserved_remaining);
                let quantity_to_consume = r.issue_qty.saturating_sub(reserve_consume);
                reserve_consumes.push(reserve_consume);
                consumption_lines.push(ConsumptionLine {
                    item: r.item,
                    location: r.location,
                    canonical_uom: r.canonical_uom.clone(),
                    quantity_to_consume,
                });
            }

            // Step 7: stock validator; INSUFFICIENT_STOCK is renamed to the
            // shipment-specific allowance error at this boundary.
            let override_metadata = match validator::validate(
                tx,
                tenant,
                &consumption_lines,
                &request.actor,
                &request.override_request,
                self.override_authority.as_ref(),
            )
            .await
            {
                Ok(meta) => meta,
                Err(EngineError::InsufficientStock) => {
                    return Err(EngineError::InsufficientAvailableWithAllowance);
                }
                Err(other) => return Err(other),
            };

            // Step 8: create (or recover) the posted movement.
            let new_movement = NewMovement {
                tenant,
                movement_type: MovementType::Issue,
                status: MovementStatus::Posted,
                external_ref: Some(format!("shipment:{shipment_id}")),
                source_type: Some("shipment_post".to_string()),
                source_id: Some(shipment_id.to_string()),
                idempotency_key: Some(request.idempotency_key.clone()),
                metadata: override_metadata
                    .as_ref()
                    .map(|m| json!({ "override_reason": m.override_reason, "override_reference": m.override_reference }))
                    .unwrap_or_else(|| json!({})),
            };

            let movement = match movement::create_once(tx, &new_movement, &self.config).await? {
                Some(m) => m,
                None => movement::find_by_idempotency_key(tx, tenant, &request.idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Internal(
                            "movement insert conflicted but no existing row found".to_string(),
                        )
                    })?,
            };

            if movement::count_lines(tx, tenant, movement.id).await? > 0 {
                sdb::mark_posted(tx, tenant, shipment_id, movement.id, &request.idempotency_key).await?;
                shipment.status = ShipmentStatus::Posted;
                shipment.movement_id = Some(movement.id);
                return self.build_noop_view(tx, tenant, &shipment).await;
            }

            // Step 9: per line, in the same item order established above.
            let mut line_views = Vec::with_capacity(resolved.len());
            for (r, reserve_consume) in resolved.iter().zip(reserve_consumes.iter().copied()) {
                let key = BalanceKey::new(tenant, r.item, r.location, r.canonical_uom.clone());
                balance::ensure_row(tx, &key).await?;

                let consumption = cost_layer::consume_cost_layers(
                    tx,
                    tenant,
                    r.item,
                    r.location,
                    r.issue_qty,
                    ConsumptionType::Shipment,
                    &shipment_id.to_string(),
                    movement.id,
                )
                .await?;

                let unit_cost = consumption.weighted_average_unit_cost;
                let extended_cost = -consumption.total_cost;

                movement::insert_line(
                    tx,
                    tenant,
                    movement.id,
                    movement.occurred_at,
                    &NewMovementLine {
                        item: r.item,
                        location: r.location,
                        quantity_delta_entered: ScaledQtySigned::from_raw(-r.qty_entered.raw()),
                        uom_entered: r.uom_entered.clone(),
                        quantity_delta_canonical: ScaledQtySigned::from_raw(-r.issue_qty.raw()),
                        canonical_uom: r.canonical_uom.clone(),
                        uom_dimension: r.dimension.clone(),
                        unit_cost: Some(unit_cost),
                        extended_cost: Some(extended_cost),
                        reason_code: None,
                        shipment_line_id: Some(r.line_id),
                        reserve_consume,
                    },
                    &self.config,
                )
                .await?;

                let reservation = r.reservation_id.and_then(|id| reservations.get(&id).cloned());

                if let Some(mut reservation) = reservation {
                    if reservation.state == ReservationState::Reserved {
                        balance::apply_delta(
                            tx,
                            &key,
                            ScaledQtySigned::ZERO,
                            ScaledQtySigned::from_raw(-reserve_consume.raw()),
                            ScaledQtySigned::from_raw(reserve_consume.raw()),
                        )
                        .await?;
                        let transitioned = rdb::transition(
                            tx,
                            tenant,
                            reservation.id,
                            ReservationState::Reserved,
                            ReservationState::Allocated,
                            reservation.quantity_fulfilled,
                            None,
                        )
                        .await?;
                        if !transitioned {
                            return Err(EngineError::ReservationConflict);
                        }
                        rdb::append_event(
                            tx,
                            tenant,
                            reservation.id,
                            ReservationEventType::Allocated,
                            -reserve_consume.raw(),
                            reserve_consume.raw(),
                        )
                        .await?;
                        reservation.state = ReservationState::Allocated;
                    }

                    balance::apply_delta(
                        tx,
                        &key,
                        ScaledQtySigned::from_raw(-r.issue_qty.raw()),
                        ScaledQtySigned::ZERO,
                        ScaledQtySigned::from_raw(-reserve_consume.raw()),
                    )
                    .await?;

                    let new_fulfilled = reservation
                        .quantity_fulfilled
                        .checked_add(reserve_consume)
                        .ok_or_else(|| EngineError::Internal("fulfilled quantity overflow".to_string()))?;
                    let complete =
                        new_fulfilled.raw() + EPSILON_RAW >= reservation.quantity_reserved.raw();

                    let applied = rdb::apply_fulfillment(
                        tx,
                        tenant,
                        reservation.id,
                        reservation.state,
                        new_fulfilled,
                        complete,
                    )
                    .await?;
                    if !applied {
                        return Err(EngineError::ReservationConflict);
                    }

                    let event_type = if complete {
                        ReservationEventType::Fulfilled
                    } else {
                        ReservationEventType::Allocated
                    };
                    rdb::append_event(tx, tenant, reservation.id, event_type, 0, -reserve_consume.raw())
                        .await?;

                    outbox::enqueue_event(
                        tx,
                        tenant,
                        "reservation",
                        reservation.id.to_string().as_str(),
                        "inventory.reservation.changed",
                        json!({ "reservationId": reservation.id.to_string(), "shipmentId": shipment_id.to_string() }),
                    )
                    .await?;
                } else {
                    balance::apply_delta(
                        tx,
                        &key,
                        ScaledQtySigned::from_raw(-r.issue_qty.raw()),
                        ScaledQtySigned::ZERO,
                        ScaledQtySigned::ZERO,
                    )
                    .await?;
                }

                self.invalidate(tenant, ship_from_warehouse);

                line_views.push(ShipmentLineView {
                    shipment_line_id: r.line_id,
                    item: r.item,
                    location: r.location,
                    canonical_uom: r.canonical_uom.clone(),
                    issue_qty: r.issue_qty,
                    reserve_consume,
                });
            }

            // Step 10: update shipment header.
            sdb::mark_posted(tx, tenant, shipment_id, movement.id, &request.idempotency_key).await?;

            // Step 11: outbox for the posted movement.
            outbox::enqueue_event(
                tx,
                tenant,
                "movement",
                movement.id.to_string().as_str(),
                "inventory.movement.posted",
                json!({ "movementId": movement.id.to_string() }),
            )
            .await?;

            // Step 12: audit.
            audit::record(
                tx,
                tenant,
                "post",
                "shipment",
                &shipment_id.to_string(),
                &request.actor,
                json!({ "movementId": movement.id.to_string() }),
            )
            .await?;
            if let Some(meta) = &override_metadata {
                self.record_override_audit(tx, tenant, movement.id, meta).await?;
            }

            Ok(ShipmentView {
                id: shipment_id,
                tenant,
                sales_order_id: shipment.sales_order_id.clone(),
                status: ShipmentStatus::Posted.as_str().to_string(),
                movement_id: Some(movement.id),
                lines: line_views,
                override_applied: override_metadata.is_some(),
            })
        })
    }

    async fn record_override_audit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        movement_id: MovementId,
        meta: &OverrideMetadata,
    ) -> Result<(), EngineError> {
        audit::record(
            tx,
            tenant,
            "negative_override",
            "movement",
            &movement_id.to_string(),
            &meta.actor,
            json!({ "override_reason": meta.override_reason, "override_reference": meta.override_reference }),
        )
        .await
    }

    /// A second identical call observing an already-posted shipment is a
    /// no-op returning the current posted view (spec.md §4.6 closing note).
    async fn build_noop_view(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        shipment: &Shipment,
    ) -> Result<ShipmentView, EngineError> {
        let lines = sdb::lock_lines(tx, shipment.id).await?;

        let mut by_shipment_line: HashMap<ShipmentLineId, movement::InventoryMovementLine> =
            HashMap::new();
        if let Some(movement_id) = shipment.movement_id {
            for posted in movement::list_lines(tx, tenant, movement_id).await? {
                if let Some(shipment_line_id) = posted.shipment_line_id {
                    by_shipment_line.insert(shipment_line_id, posted);
                }
            }
        }

        let line_views = lines
            .into_iter()
            .map(|l| match by_shipment_line.remove(&l.id) {
                Some(posted) => ShipmentLineView {
                    shipment_line_id: l.id,
                    item: l.item,
                    location: l.location,
                    canonical_uom: posted.canonical_uom,
                    issue_qty: ScaledQty::from_raw(-posted.quantity_delta_canonical.raw()),
                    reserve_consume: posted.reserve_consume,
                },
                // Movement line not found (e.g. shipment never actually
                // posted) — fall back to the raw shipment line.
                None => ShipmentLineView {
                    shipment_line_id: l.id,
                    item: l.item,
                    location: l.location,
                    canonical_uom: l.uom.clone(),
                    issue_qty: l.quantity_shipped,
                    reserve_consume: ScaledQty::ZERO,
                },
            })
            .collect();

        Ok(ShipmentView {
            id: shipment.id,
            tenant,
            sales_order_id: shipment.sales_order_id.clone(),
            status: shipment.status.as_str().to_string(),
            movement_id: shipment.movement_id,
            lines: line_views,
            override_applied: false,
        })
    }
}
