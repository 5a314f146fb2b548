//! Reservation engine: `createReservations`, `allocate`, `cancel`, `fulfill`,
//! and the background expiry job (spec.md §4.5). Every mutating operation
//! opens its own [`crate::db::with_serializable_retry`] transaction and owns
//! its full lifecycle — no transaction crosses a public-fn boundary, the
//! same discipline as the teacher's `TransferCoordinator::step`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};

use crate::balance::{self, BalanceKey};
use crate::cache::SharedAtpCache;
use crate::config::EngineConfig;
use crate::core_types::{DemandId, ItemId, LocationId, ReservationId, TenantId, WarehouseId};
use crate::db::with_serializable_retry;
use crate::error::EngineError;
use crate::idempotency::{self, BeginOutcome, IdempotencyStatus};
use crate::locks;
use crate::money::{EPSILON_RAW, ScaledQty, ScaledQtySigned};
use crate::outbox;
use crate::uom::{self, UomCatalog};

use super::collaborators::{DemandCatalog, LocationCatalog};
use super::db as rdb;
use super::model::{DemandType, Reservation, ReservationEventType};
use super::state::ReservationState;

/// One demand line to reserve against. `quantity`/`uom` are as entered by
/// the caller — canonicalization happens inside the engine, same as every
/// other quantity crossing this crate's boundary.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub demand_type: DemandType,
    pub demand_id: DemandId,
    pub item: ItemId,
    pub location: LocationId,
    pub quantity: ScaledQty,
    pub uom: String,
    pub warehouse_id: Option<WarehouseId>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Public-facing snapshot of a reservation row, returned by every engine
/// operation and by the gateway's read path.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReservationView {
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
    pub expires_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            tenant: r.tenant,
            warehouse: r.warehouse,
            demand_type: r.demand_type.clone(),
            demand_id: r.demand_id,
            item: r.item,
            location: r.location,
            canonical_uom: r.canonical_uom.clone(),
            state: r.state,
            quantity_reserved: r.quantity_reserved,
            quantity_fulfilled: r.quantity_fulfilled,
            expires_at: r.expires_at,
            cancel_reason: r.cancel_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CreateReservationsOutcome {
    pub reservations: Vec<ReservationView>,
    pub any_backordered: bool,
}

struct ResolvedLine {
    index: usize,
    request: ReservationRequest,
    warehouse: WarehouseId,
    canonical_uom: String,
    canonical_qty: ScaledQty,
}

/// Resolves the warehouse scope for one demand line: an explicit id, the
/// location's warehouse, and the demand's own warehouse (when known) must
/// all agree. Absence of every source is `WAREHOUSE_SCOPE_REQUIRED`;
/// disagreement among the sources that are present is
/// `WAREHOUSE_SCOPE_MISMATCH` (spec.md §9 open question 2, resolved).
fn resolve_warehouse(
    explicit: Option<WarehouseId>,
    location_wh: Option<WarehouseId>,
    demand_wh: Option<WarehouseId>,
) -> Result<WarehouseId, EngineError> {
    let candidates: Vec<WarehouseId> = [explicit, location_wh, demand_wh].into_iter().flatten().collect();
    let first = *candidates.first().ok_or(EngineError::WarehouseScopeRequired)?;
    if candidates.iter().any(|c| *c != first) {
        return Err(EngineError::WarehouseScopeMismatch);
    }
    Ok(first)
}

/// Splits a demand quantity into the part immediately reservable and the
/// part that must backorder, absorbing a sub-epsilon remainder into the
/// reservable amount rather than opening a backorder for noise. Fails
/// `ATP_INSUFFICIENT_AVAILABLE` when backorders are disabled and the
/// remainder exceeds epsilon.
fn split_reserve(
    available: ScaledQtySigned,
    demand_qty: ScaledQty,
    backorders_enabled: bool,
) -> Result<(ScaledQty, ScaledQty), EngineError> {
    if available.raw() + EPSILON_RAW >= demand_qty.raw() {
        return Ok((demand_qty, ScaledQty::ZERO));
    }

    let fillable = ScaledQty::from_raw(available.raw().max(0));
    let remainder = demand_qty.saturating_sub(fillable);

    if remainder.raw() <= EPSILON_RAW {
        return Ok((demand_qty, ScaledQty::ZERO));
    }

    if !backorders_enabled {
        return Err(EngineError::AtpInsufficientAvailable);
    }

    Ok((fillable, remainder))
}

fn hash_lines(lines: &[ReservationRequest]) -> String {
    let mut buf = String::new();
    for l in lines {
        buf.push_str(&format!(
            "{}:{}:{}:{}:{}:{}:{};",
            l.demand_type,
            l.demand_id,
            l.item.get(),
            l.location.get(),
            l.quantity.raw(),
            l.uom,
            l.warehouse_id.map(|w| w.get()).unwrap_or(-1),
        ));
    }
    hex::encode(md5::compute(buf.as_bytes()).0)
}

fn encode_entity_ref(ids: &[ReservationId]) -> String {
    let strs: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    serde_json::to_string(&strs).unwrap_or_default()
}

fn decode_entity_ref(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub struct ReservationEngine {
    pool: PgPool,
    location_catalog: Arc<dyn LocationCatalog>,
    uom_catalog: Arc<dyn UomCatalog>,
    demand_catalog: Arc<dyn DemandCatalog>,
    config: Arc<EngineConfig>,
    cache: Option<SharedAtpCache>,
}

impl ReservationEngine {
    pub fn new(
        pool: PgPool,
        location_catalog: Arc<dyn LocationCatalog>,
        uom_catalog: Arc<dyn UomCatalog>,
        demand_catalog: Arc<dyn DemandCatalog>,
        config: Arc<EngineConfig>,
        cache: Option<SharedAtpCache>,
    ) -> Self {
        Self {
            pool,
            location_catalog,
            uom_catalog,
            demand_catalog,
            config,
            cache,
        }
    }

    fn invalidate(&self, tenant: TenantId, warehouse: WarehouseId) {
        if let Some(cache) = &self.cache {
            cache.invalidate_scope(tenant, warehouse);
        }
    }

    /// Batch-creates reservations for `lines` under one advisory-lock
    /// critical section per distinct `(tenant, warehouse, item)`. Supports
    /// whole-batch idempotency via `idempotency_key` (spec.md §4.4) on top
    /// of the per-line unique-demand-tuple dedup that always applies.
    pub async fn create_reservations(
        &self,
        tenant: TenantId,
        idempotency_key: Option<String>,
        lines: Vec<ReservationRequest>,
    ) -> Result<CreateReservationsOutcome, EngineError> {
        if lines.is_empty() {
            return Err(EngineError::ReservationInvalidQuantity);
        }
        for l in &lines {
            if l.quantity.is_zero() {
                return Err(EngineError::ReservationInvalidQuantity);
            }
        }

        let body_hash = hash_lines(&lines);
        let lines = Arc::new(lines);

        with_serializable_retry(&self.pool, self.config.reservation_create_retries, move |tx| {
            let lines = lines.clone();
            let idempotency_key = idempotency_key.clone();
            let body_hash = body_hash.clone();
            Box::pin(async move { self.create_reservations_once(tx, tenant, idempotency_key, body_hash, &lines).await })
        })
        .await
    }

    fn create_reservations_once<'c>(
        &'c self,
        tx: &'c mut Transaction<'_, Postgres>,
        tenant: TenantId,
        idempotency_key: Option<String>,
        body_hash: String,
        lines: &'c [ReservationRequest],
    ) -> BoxFuture<'c, Result<CreateReservationsOutcome, EngineError>> {
        Box::pin(async move {
            if let Some(key) = &idempotency_key {
                match idempotency::begin_idempotency(tx, key, &body_hash).await? {
                    BeginOutcome::Proceed => {}
                    BeginOutcome::ShortCircuitSucceeded { entity_ref } => {
                        let ids = entity_ref.as_deref().map(decode_entity_ref).unwrap_or_default();
                        let mut reservations = Vec::with_capacity(ids.len());
                        for raw_id in ids {
                            let Ok(uuid) = uuid::Uuid::parse_str(&raw_id) else { continue };
                            let reservation = rdb::get(tx, tenant, ReservationId::from(uuid)).await?;
                            reservations.push(ReservationView::from(&reservation));
                        }
                        // Whether the original call backordered anything isn't
                        // recoverable from the stored entity_ref alone; a
                        // short-circuited replay reports `false` here, same as
                        // it would after the backorder row itself is long since
                        // cleared.
                        return Ok(CreateReservationsOutcome { reservations, any_backordered: false });
                    }
                }
            }

            let mut resolved: Vec<ResolvedLine> = Vec::with_capacity(lines.len());
            for (index, request) in lines.iter().enumerate() {
                let location_wh = self.location_catalog.warehouse_of(tenant, request.location);
                let demand_wh = self.demand_catalog.warehouse_of_demand(
                    tenant,
                    &request.demand_type,
                    request.demand_id,
                    request.item,
                );
                let warehouse = resolve_warehouse(request.warehouse_id, location_wh, demand_wh)?;

                if !self.location_catalog.is_sellable(tenant, request.location, warehouse) {
                    return Err(EngineError::ReservationLocationNotSellable);
                }

                let canonical = uom::convert_to_canonical(
                    self.uom_catalog.as_ref(),
                    tenant,
                    request.item,
                    request.quantity,
                    &request.uom,
                )?;

                resolved.push(ResolvedLine {
                    index,
                    request: request.clone(),
                    warehouse,
                    canonical_uom: canonical.canonical_uom,
                    canonical_qty: canonical.qty_canonical,
                });
            }

            resolved.sort_by(|a, b| {
                (
                    a.warehouse.get(),
                    a.request.item.get(),
                    a.request.location.get(),
                    &a.canonical_uom,
                )
                    .cmp(&(
                        b.warehouse.get(),
                        b.request.item.get(),
                        b.request.location.get(),
                        &b.canonical_uom,
                    ))
            });

            let lock_keys: Vec<(TenantId, WarehouseId, ItemId)> = resolved
                .iter()
                .map(|l| (tenant, l.warehouse, l.request.item))
                .collect();
            locks::acquire_sorted(tx, &lock_keys).await?;

            let mut out: Vec<Option<ReservationView>> = (0..resolved.len()).map(|_| None).collect();
            let mut created_ids: Vec<ReservationId> = Vec::new();
            let mut any_backordered = false;

            for line in &resolved {
                let key = BalanceKey::new(tenant, line.request.item, line.request.location, line.canonical_uom.clone());
                balance::ensure_row(tx, &key).await?;
                let current = balance::lock_and_read(tx, &key).await?;
                let (reserve_qty, backorder_qty) =
                    split_reserve(current.available(), line.canonical_qty, self.config.backorders_enabled)?;

                let per_line_key = idempotency_key.as_ref().map(|base| {
                    format!(
                        "{base}:{}:{}:{}:{}:{}:{}",
                        line.request.demand_type,
                        line.request.demand_id,
                        line.request.item,
                        line.request.location,
                        line.warehouse,
                        line.canonical_uom,
                    )
                });

                let inserted = rdb::insert_new(
                    tx,
                    &rdb::NewReservation {
                        tenant,
                        warehouse: line.warehouse,
                        demand_type: line.request.demand_type.clone(),
                        demand_id: line.request.demand_id,
                        item: line.request.item,
                        location: line.request.location,
                        canonical_uom: line.canonical_uom.clone(),
                        quantity_reserved: reserve_qty,
                        idempotency_key: per_line_key,
                    },
                )
                .await?;

                let reservation = match inserted {
                    Some(reservation) => {
                        balance::apply_delta(tx, &key, ScaledQtySigned::ZERO, reserve_qty.to_signed(), ScaledQtySigned::ZERO)
                            .await?;
                        rdb::append_event(
                            tx,
                            tenant,
                            reservation.id,
                            ReservationEventType::Reserved,
                            reserve_qty.raw(),
                            0,
                        )
                        .await?;
                        if backorder_qty.raw() > 0 {
                            any_backordered = true;
                            rdb::upsert_backorder(
                                tx,
                                tenant,
                                &line.request.demand_type,
                                line.request.demand_id,
                                line.request.item,
                                line.request.location,
                                &line.canonical_uom,
                                backorder_qty,
                            )
                            .await?;
                        }
                        outbox::enqueue_event(
                            tx,
                            tenant,
                            "reservation",
                            &reservation.id.to_string(),
                            "inventory.reservation.changed",
                            serde_json::json!({
                                "reservation_id": reservation.id.to_string(),
                                "state": reservation.state.as_str(),
                                "quantity_reserved": reservation.quantity_reserved.to_string(),
                            }),
                        )
                        .await?;
                        created_ids.push(reservation.id);
                        reservation
                    }
                    None => rdb::find_by_demand_tuple(
                        tx,
                        tenant,
                        line.warehouse,
                        &line.request.demand_type,
                        line.request.demand_id,
                        line.request.item,
                        line.request.location,
                        &line.canonical_uom,
                    )
                    .await?
                    .ok_or(EngineError::ReservationConflict)?,
                };

                out[line.index] = Some(ReservationView::from(&reservation));
                self.invalidate(tenant, line.warehouse);
            }

            let reservations: Vec<ReservationView> = out.into_iter().map(|v| v.expect("every line produces a view")).collect();

            if let Some(key) = &idempotency_key {
                let entity_ref = encode_entity_ref(&created_ids);
                idempotency::complete_idempotency(tx, key, IdempotencyStatus::Succeeded, Some(&entity_ref)).await?;
            }

            Ok(CreateReservationsOutcome { reservations, any_backordered })
        })
    }

    /// Moves the reservation's full open remainder from `reserved` to
    /// `allocated` and transitions `RESERVED -> ALLOCATED`.
    pub async fn allocate(&self, tenant: TenantId, id: ReservationId) -> Result<ReservationView, EngineError> {
        with_serializable_retry(&self.pool, self.config.serializable_retries, move |tx| {
            Box::pin(async move {
                let preview = rdb::get(tx, tenant, id).await?;
                locks::acquire_sorted(tx, &[(tenant, preview.warehouse, preview.item)]).await?;
                let reservation = rdb::lock_and_get(tx, tenant, id).await?;

                if reservation.state != ReservationState::Reserved {
                    return Err(EngineError::ReservationInvalidState);
                }

                let open_remaining = reservation.open_remaining();
                let key = BalanceKey::new(
                    tenant,
                    reservation.item,
                    reservation.location,
                    reservation.canonical_uom.clone(),
                );
                balance::apply_delta(
                    tx,
                    &key,
                    ScaledQtySigned::ZERO,
                    open_remaining.to_signed().negate(),
                    open_remaining.to_signed(),
                )
                .await?;

                let transitioned = rdb::transition(
                    tx,
                    tenant,
                    id,
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
                    id,
                    ReservationEventType::Allocated,
                    -open_remaining.raw(),
                    open_remaining.raw(),
                )
                .await?;
                outbox::enqueue_event(
                    tx,
                    tenant,
                    "reservation",
                    &id.to_string(),
                    "inventory.reservation.changed",
                    serde_json::json!({ "reservation_id": id.to_string(), "state": "ALLOCATED" }),
                )
                .await?;
                self.invalidate(tenant, reservation.warehouse);

                let updated = rdb::get(tx, tenant, id).await?;
                Ok(ReservationView::from(&updated))
            })
        })
        .await
    }

    /// Releases a reservation's open remainder back to available, from
    /// either `RESERVED` or `ALLOCATED` — the permissive cancellation
    /// policy (spec.md §9 open question 1, resolved).
    pub async fn cancel(
        &self,
        tenant: TenantId,
        id: ReservationId,
        reason: Option<String>,
    ) -> Result<ReservationView, EngineError> {
        with_serializable_retry(&self.pool, self.config.serializable_retries, move |tx| {
            let reason = reason.clone();
            Box::pin(async move {
                let preview = rdb::get(tx, tenant, id).await?;
                locks::acquire_sorted(tx, &[(tenant, preview.warehouse, preview.item)]).await?;
                let reservation = rdb::lock_and_get(tx, tenant, id).await?;

                if reservation.state != ReservationState::Reserved && reservation.state != ReservationState::Allocated {
                    return Err(EngineError::ReservationInvalidState);
                }

                let open_remaining = reservation.open_remaining();
                let key = BalanceKey::new(
                    tenant,
                    reservation.item,
                    reservation.location,
                    reservation.canonical_uom.clone(),
                );
                let (delta_reserved, delta_allocated) = if reservation.state == ReservationState::Reserved {
                    (open_remaining.to_signed().negate(), ScaledQtySigned::ZERO)
                } else {
                    (ScaledQtySigned::ZERO, open_remaining.to_signed().negate())
                };
                balance::apply_delta(tx, &key, ScaledQtySigned::ZERO, delta_reserved, delta_allocated).await?;

                let transitioned = rdb::transition(
                    tx,
                    tenant,
                    id,
                    reservation.state,
                    ReservationState::Cancelled,
                    reservation.quantity_fulfilled,
                    reason.as_deref(),
                )
                .await?;
                if !transitioned {
                    return Err(EngineError::ReservationConflict);
                }

                rdb::append_event(
                    tx,
                    tenant,
                    id,
                    ReservationEventType::Cancelled,
                    delta_reserved.raw(),
                    delta_allocated.raw(),
                )
                .await?;
                outbox::enqueue_event(
                    tx,
                    tenant,
                    "reservation",
                    &id.to_string(),
                    "inventory.reservation.changed",
                    serde_json::json!({ "reservation_id": id.to_string(), "state": "CANCELLED" }),
                )
                .await?;
                self.invalidate(tenant, reservation.warehouse);

                let updated = rdb::get(tx, tenant, id).await?;
                Ok(ReservationView::from(&updated))
            })
        })
        .await
    }

    /// Records incremental fulfillment against a reservation's open
    /// remainder. `quantity` is clamped to the remainder rather than
    /// erroring when it overshoots; the reservation only moves to
    /// `FULFILLED` once the remainder reaches (within epsilon) zero.
    /// Requires strict state `ALLOCATED` — spec.md §4.5 only lists
    /// `ALLOCATED -> FULFILLED` as a fulfill transition and an incomplete
    /// fulfill "stays ALLOCATED"; moving a `RESERVED` reservation forward is
    /// `allocate`'s job (or the shipment poster's, which allocates inline),
    /// not this operation's.
    pub async fn fulfill(
        &self,
        tenant: TenantId,
        id: ReservationId,
        quantity: ScaledQty,
    ) -> Result<ReservationView, EngineError> {
        with_serializable_retry(&self.pool, self.config.serializable_retries, move |tx| {
            Box::pin(async move {
                let preview = rdb::get(tx, tenant, id).await?;
                locks::acquire_sorted(tx, &[(tenant, preview.warehouse, preview.item)]).await?;
                let reservation = rdb::lock_and_get(tx, tenant, id).await?;

                if reservation.state != ReservationState::Allocated {
                    return Err(EngineError::ReservationInvalidState);
                }

                let open_remaining = reservation.open_remaining();
                if open_remaining.raw() <= EPSILON_RAW {
                    return Err(EngineError::ReservationInvalidState);
                }

                let consume = quantity.min(open_remaining);
                if consume.raw() <= EPSILON_RAW {
                    return Err(EngineError::ReservationInvalidQuantity);
                }

                let remaining_after = open_remaining.saturating_sub(consume);
                let complete = remaining_after.raw() <= EPSILON_RAW;
                let new_fulfilled = reservation.quantity_fulfilled.checked_add(consume).ok_or(EngineError::Internal(
                    "fulfilled quantity overflow".to_string(),
                ))?;

                let key = BalanceKey::new(
                    tenant,
                    reservation.item,
                    reservation.location,
                    reservation.canonical_uom.clone(),
                );
                // Fulfilling a reservation releases its allocated hold; the
                // corresponding on_hand reduction is the shipment poster's
                // job (it owns the movement line and cost-layer consumption),
                // not this operation's.
                let delta_allocated = consume.to_signed().negate();
                balance::apply_delta(tx, &key, ScaledQtySigned::ZERO, ScaledQtySigned::ZERO, delta_allocated).await?;

                let transitioned = rdb::apply_fulfillment(tx, tenant, id, reservation.state, new_fulfilled, complete).await?;
                if !transitioned {
                    return Err(EngineError::ReservationConflict);
                }

                rdb::append_event(
                    tx,
                    tenant,
                    id,
                    ReservationEventType::Fulfilled,
                    0,
                    delta_allocated.raw(),
                )
                .await?;
                outbox::enqueue_event(
                    tx,
                    tenant,
                    "reservation",
                    &id.to_string(),
                    "inventory.reservation.changed",
                    serde_json::json!({
                        "reservation_id": id.to_string(),
                        "state": if complete { "FULFILLED" } else { ReservationState::Allocated.as_str() },
                        "quantity_fulfilled": new_fulfilled.to_string(),
                    }),
                )
                .await?;
                self.invalidate(tenant, reservation.warehouse);

                let updated = rdb::get(tx, tenant, id).await?;
                Ok(ReservationView::from(&updated))
            })
        })
        .await
    }

    pub async fn get(&self, tenant: TenantId, id: ReservationId) -> Result<ReservationView, EngineError> {
        let mut conn = self.pool.acquire().await?;
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
        .fetch_optional(&mut *conn)
        .await?;

        let reservation = row
            .as_ref()
            .map(super::model::row_to_reservation)
            .ok_or_else(|| EngineError::ReservationNotFound(id.to_string()))?;
        Ok(ReservationView::from(&reservation))
    }

    /// Background job: expires `RESERVED` reservations past `expiresAt`,
    /// releasing their full open remainder. Uses `FOR UPDATE SKIP LOCKED`
    /// select-then-lock instead of the advisory-lock-first protocol every
    /// other operation uses — the one documented exception (spec.md §4.5),
    /// since this job scans across tenants/items rather than acting on a
    /// caller-specified key.
    pub async fn expire_reservations_job(&self, batch_size: i64) -> Result<usize, EngineError> {
        with_serializable_retry(&self.pool, self.config.serializable_retries, move |tx| {
            Box::pin(async move {
                let now = Utc::now();
                let stale = rdb::find_stale(tx, now, batch_size).await?;
                let mut expired = 0usize;

                for reservation in &stale {
                    let open_remaining = reservation.open_remaining();
                    if open_remaining.raw() > 0 {
                        let key = BalanceKey::new(
                            reservation.tenant,
                            reservation.item,
                            reservation.location,
                            reservation.canonical_uom.clone(),
                        );
                        balance::apply_delta(
                            tx,
                            &key,
                            ScaledQtySigned::ZERO,
                            open_remaining.to_signed().negate(),
                            ScaledQtySigned::ZERO,
                        )
                        .await?;
                    }

                    let transitioned = rdb::transition(
                        tx,
                        reservation.tenant,
                        reservation.id,
                        ReservationState::Reserved,
                        ReservationState::Expired,
                        reservation.quantity_fulfilled,
                        Some("expired"),
                    )
                    .await?;
                    if !transitioned {
                        continue;
                    }

                    rdb::append_event(
                        tx,
                        reservation.tenant,
                        reservation.id,
                        ReservationEventType::Expired,
                        -open_remaining.raw(),
                        0,
                    )
                    .await?;
                    outbox::enqueue_event(
                        tx,
                        reservation.tenant,
                        "reservation",
                        &reservation.id.to_string(),
                        "inventory.reservation.changed",
                        serde_json::json!({ "reservation_id": reservation.id.to_string(), "state": "EXPIRED" }),
                    )
                    .await?;
                    self.invalidate(reservation.tenant, reservation.warehouse);
                    expired += 1;
                }

                Ok(expired)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn wh(n: i64) -> WarehouseId {
        WarehouseId::from(n)
    }

    #[test]
    fn resolve_warehouse_requires_at_least_one_source() {
        assert!(matches!(
            resolve_warehouse(None, None, None),
            Err(EngineError::WarehouseScopeRequired)
        ));
    }

    #[test]
    fn resolve_warehouse_accepts_single_known_source() {
        assert_eq!(resolve_warehouse(Some(wh(1)), None, None).unwrap(), wh(1));
        assert_eq!(resolve_warehouse(None, Some(wh(2)), None).unwrap(), wh(2));
    }

    #[test]
    fn resolve_warehouse_rejects_mismatch() {
        assert!(matches!(
            resolve_warehouse(Some(wh(1)), Some(wh(2)), None),
            Err(EngineError::WarehouseScopeMismatch)
        ));
    }

    #[test]
    fn resolve_warehouse_accepts_agreeing_sources() {
        assert_eq!(resolve_warehouse(Some(wh(1)), Some(wh(1)), Some(wh(1))).unwrap(), wh(1));
    }

    #[test]
    fn split_reserve_fills_fully_when_available() {
        let available = ScaledQtySigned::from_raw(1_000_000);
        let demand = ScaledQty::from_raw(500_000);
        let (reserve, backorder) = split_reserve(available, demand, true).unwrap();
        assert_eq!(reserve, demand);
        assert_eq!(backorder, ScaledQty::ZERO);
    }

    #[test]
    fn split_reserve_absorbs_sub_epsilon_shortfall() {
        let available = ScaledQtySigned::from_raw(999_999);
        let demand = ScaledQty::from_raw(1_000_000);
        let (reserve, backorder) = split_reserve(available, demand, false).unwrap();
        assert_eq!(reserve, demand);
        assert_eq!(backorder, ScaledQty::ZERO);
    }

    #[test]
    fn split_reserve_backorders_remainder_when_enabled() {
        let available = ScaledQtySigned::from_raw(300_000);
        let demand = ScaledQty::from_raw(1_000_000);
        let (reserve, backorder) = split_reserve(available, demand, true).unwrap();
        assert_eq!(reserve.raw(), 300_000);
        assert_eq!(backorder.raw(), 700_000);
    }

    #[test]
    fn split_reserve_fails_when_backorders_disabled() {
        let available = ScaledQtySigned::from_raw(300_000);
        let demand = ScaledQty::from_raw(1_000_000);
        assert!(matches!(
            split_reserve(available, demand, false),
            Err(EngineError::AtpInsufficientAvailable)
        ));
    }

    #[test]
    fn split_reserve_handles_negative_available() {
        let available = ScaledQtySigned::from_raw(-500_000);
        let demand = ScaledQty::from_raw(1_000_000);
        let (reserve, backorder) = split_reserve(available, demand, true).unwrap();
        assert_eq!(reserve, ScaledQty::ZERO);
        assert_eq!(backorder, demand);
    }

    #[test]
    fn entity_ref_round_trips() {
        let ids = vec![ReservationId::new(), ReservationId::new()];
        let encoded = encode_entity_ref(&ids);
        let decoded = decode_entity_ref(&encoded);
        assert_eq!(decoded.len(), 2);
        assert_eq!(uuid::Uuid::from_str(&decoded[0]).unwrap(), ids[0].get());
    }

    #[test]
    fn hash_lines_is_stable_for_identical_input() {
        let line = ReservationRequest {
            demand_type: DemandType::sales_order_line(),
            demand_id: DemandId(1),
            item: ItemId::from(1),
            location: LocationId::from(1),
            quantity: ScaledQty::from_raw(1_000_000),
            uom: "g".to_string(),
            warehouse_id: Some(wh(1)),
            expires_at: None,
        };
        assert_eq!(hash_lines(std::slice::from_ref(&line)), hash_lines(&[line]));
    }
}
