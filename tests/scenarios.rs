//! End-to-end scenario tests for spec.md §8's S1-S7, run against a live
//! PostgreSQL database. Gated on `DATABASE_URL`, same skip-gracefully
//! pattern as `db::tests` and the other `#[ignore]`d database tests
//! scattered through `src/`: `cargo test` without a database configured
//! reports these as skipped rather than failing.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use atp_engine::config::EngineConfig;
use atp_engine::core_types::{DemandId, ItemId, LocationId, TenantId, WarehouseId};
use atp_engine::money::{round_quantity, ScaledQty};
use atp_engine::reservation::collaborators::{InMemoryLocationCatalog, NoOpDemandCatalog};
use atp_engine::reservation::model::DemandType;
use atp_engine::reservation::{ReservationEngine, ReservationRequest};
use atp_engine::shipment::{self as shipment_mod, NoOpSalesOrderCatalog, PostShipmentRequest, ShipmentPoster};
use atp_engine::uom::InMemoryUomCatalog;
use atp_engine::validator::{AllowAllAuthority, DenyAllAuthority};
use atp_engine::{balance, cost_layer};
use atp_engine::error::EngineError;

async fn connect() -> Option<PgPool> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .ok()?;
    sqlx::migrate!("./migrations").run(&pool).await.ok()?;
    Some(pool)
}

/// Every scenario gets its own tenant id so concurrent test runs (and
/// concurrent `#[tokio::test]`s within this binary) never collide on the
/// same balance/reservation rows.
fn fresh_tenant() -> TenantId {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_nanos();
    // Keep it inside i64 and away from 0/negative space.
    TenantId::from((nanos % 1_000_000_000_000) as i64 + 1)
}

fn qty(s: &str) -> ScaledQty {
    round_quantity(Decimal::from_str(s).expect("valid decimal literal")).expect("positive quantity")
}

const WH: i64 = 1;
const ITEM: i64 = 100;
const LOCATION: i64 = 10;

/// `InMemoryUomCatalog::with_item` keys on tenant, but every scenario uses
/// its own tenant id, so the catalog is rebuilt per-tenant rather than
/// shared across tests.
fn uom_catalog_for(tenant: TenantId) -> Arc<InMemoryUomCatalog> {
    Arc::new(
        InMemoryUomCatalog::new()
            .with_item(tenant, ItemId::from(ITEM), "g", "mass")
            .with_factor("mass", "mg", "g", Decimal::from_str("0.001").unwrap()),
    )
}

fn location_catalog_for(tenant: TenantId) -> Arc<InMemoryLocationCatalog> {
    Arc::new(InMemoryLocationCatalog::new().with_location(tenant, LocationId::from(LOCATION), WarehouseId::from(WH)))
}

async fn seed_on_hand(pool: &PgPool, tenant: TenantId, on_hand: ScaledQty) {
    let key = balance::BalanceKey::new(tenant, ItemId::from(ITEM), LocationId::from(LOCATION), "g");
    let mut tx = pool.begin().await.expect("begin seed tx");
    balance::ensure_row(&mut tx, &key).await.expect("ensure balance row");
    balance::apply_delta(
        &mut tx,
        &key,
        on_hand.to_signed(),
        atp_engine::money::ScaledQtySigned::ZERO,
        atp_engine::money::ScaledQtySigned::ZERO,
    )
    .await
    .expect("seed on_hand");
    tx.commit().await.expect("commit seed tx");
}

/// Gives the (item, location) enough cost-layer coverage to back a
/// shipment's `consumeCostLayers` call; the shipment scenarios care about
/// balance/reservation outcomes, not cost accounting, so one layer with a
/// round unit cost is enough.
async fn seed_cost_layer(pool: &PgPool, tenant: TenantId, qty: ScaledQty) {
    let mut tx = pool.begin().await.expect("begin layer tx");
    cost_layer::create_cost_layer(
        &mut tx,
        cost_layer::NewCostLayer {
            tenant,
            item: ItemId::from(ITEM),
            location: LocationId::from(LOCATION),
            uom: "g".to_string(),
            layer_date: chrono::Utc::now().date_naive(),
            original_qty: qty,
            unit_cost: Decimal::from_str("1.00").unwrap(),
            source_type: cost_layer::CostLayerSource::OpeningBalance,
            source_document_id: None,
            movement_id: None,
            lot_id: None,
        },
    )
    .await
    .expect("seed cost layer");
    tx.commit().await.expect("commit layer tx");
}

fn config(backorders_enabled: bool) -> Arc<EngineConfig> {
    Arc::new(EngineConfig {
        backorders_enabled,
        ..EngineConfig::from_env()
    })
}

async fn post_shipment_fixture(
    pool: &PgPool,
    tenant: TenantId,
    sales_order_id: &str,
    demand_id: DemandId,
    quantity_shipped: ScaledQty,
) -> atp_engine::core_types::ShipmentId {
    let mut tx = pool.begin().await.expect("begin shipment fixture tx");
    let shipment = shipment_mod::insert_draft(
        &mut tx,
        &shipment_mod::NewShipment {
            tenant,
            sales_order_id: sales_order_id.to_string(),
            ship_from_location: LocationId::from(LOCATION),
        },
    )
    .await
    .expect("insert draft shipment");

    shipment_mod::insert_line(
        &mut tx,
        shipment.id,
        &shipment_mod::NewShipmentLine {
            sales_order_line_id: demand_id,
            item: ItemId::from(ITEM),
            location: LocationId::from(LOCATION),
            quantity_shipped,
            uom: "g".to_string(),
        },
    )
    .await
    .expect("insert shipment line");

    tx.commit().await.expect("commit shipment fixture tx");
    shipment.id
}

/// S1 — straight reserve and ship (single line). 100 g on hand; a sales
/// order line demands 250 mg; reservation RESERVED at 0.25 g; shipping the
/// matching line posts the movement, fulfills the reservation, and leaves
/// balance (99.75, 0, 0).
#[tokio::test]
async fn s1_straight_reserve_and_ship() {
    let Some(pool) = connect().await else {
        eprintln!("Skipping s1_straight_reserve_and_ship - DATABASE_URL not set");
        return;
    };

    let tenant = fresh_tenant();
    seed_on_hand(&pool, tenant, qty("100")).await;
    seed_cost_layer(&pool, tenant, qty("100")).await;

    let engine = ReservationEngine::new(
        pool.clone(),
        location_catalog_for(tenant),
        uom_catalog_for(tenant),
        Arc::new(NoOpDemandCatalog),
        config(true),
        None,
    );

    let demand_id = DemandId(1);
    let outcome = engine
        .create_reservations(
            tenant,
            None,
            vec![ReservationRequest {
                demand_type: DemandType::sales_order_line(),
                demand_id,
                item: ItemId::from(ITEM),
                location: LocationId::from(LOCATION),
                quantity: qty("250"),
                uom: "mg".to_string(),
                warehouse_id: Some(WarehouseId::from(WH)),
                expires_at: None,
            }],
        )
        .await
        .expect("reservation created");

    assert_eq!(outcome.reservations.len(), 1);
    let reservation = &outcome.reservations[0];
    assert_eq!(reservation.state.as_str(), "RESERVED");
    assert_eq!(reservation.quantity_reserved, qty("0.25"));

    let balance_after_reserve = {
        let mut tx = pool.begin().await.unwrap();
        let b = balance::lock_and_read(
            &mut tx,
            &balance::BalanceKey::new(tenant, ItemId::from(ITEM), LocationId::from(LOCATION), "g"),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();
        b
    };
    assert_eq!(balance_after_reserve.on_hand, qty("100"));
    assert_eq!(balance_after_reserve.reserved, qty("0.25"));
    assert_eq!(balance_after_reserve.allocated, ScaledQty::ZERO);

    let shipment_id = post_shipment_fixture(&pool, tenant, "SO-S1", demand_id, qty("0.25")).await;

    let poster = ShipmentPoster::new(
        pool.clone(),
        location_catalog_for(tenant),
        Arc::new(NoOpSalesOrderCatalog),
        uom_catalog_for(tenant),
        Arc::new(AllowAllAuthority),
        config(true),
        None,
    );

    let view = poster
        .post(
            tenant,
            shipment_id,
            PostShipmentRequest {
                idempotency_key: "s1-post".to_string(),
                actor: "tester".to_string(),
                override_request: Default::default(),
            },
        )
        .await
        .expect("shipment posts");

    assert_eq!(view.status, "posted");
    assert!(!view.override_applied);

    let final_reservation = engine.get(tenant, reservation.id).await.expect("fetch reservation");
    assert_eq!(final_reservation.state.as_str(), "FULFILLED");
    assert_eq!(final_reservation.quantity_fulfilled, qty("0.25"));

    let mut tx = pool.begin().await.unwrap();
    let final_balance = balance::lock_and_read(
        &mut tx,
        &balance::BalanceKey::new(tenant, ItemId::from(ITEM), LocationId::from(LOCATION), "g"),
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(final_balance.on_hand, qty("99.75"));
    assert_eq!(final_balance.reserved, ScaledQty::ZERO);
    assert_eq!(final_balance.allocated, ScaledQty::ZERO);
}

/// S2 — backorder split. on_hand=10, demand 15 in the same uom with
/// backorders enabled: reservation RESERVED at 10, backorder row at 5,
/// balance becomes (10, 10, 0).
#[tokio::test]
async fn s2_backorder_split() {
    let Some(pool) = connect().await else {
        eprintln!("Skipping s2_backorder_split - DATABASE_URL not set");
        return;
    };

    let tenant = fresh_tenant();
    seed_on_hand(&pool, tenant, qty("10")).await;

    let engine = ReservationEngine::new(
        pool.clone(),
        location_catalog_for(tenant),
        uom_catalog_for(tenant),
        Arc::new(NoOpDemandCatalog),
        config(true),
        None,
    );

    let outcome = engine
        .create_reservations(
            tenant,
            None,
            vec![ReservationRequest {
                demand_type: DemandType::sales_order_line(),
                demand_id: DemandId(2),
                item: ItemId::from(ITEM),
                location: LocationId::from(LOCATION),
                quantity: qty("15"),
                uom: "g".to_string(),
                warehouse_id: Some(WarehouseId::from(WH)),
                expires_at: None,
            }],
        )
        .await
        .expect("reservation created");

    assert!(outcome.any_backordered);
    let reservation = &outcome.reservations[0];
    assert_eq!(reservation.quantity_reserved, qty("10"));

    let mut tx = pool.begin().await.unwrap();
    let b = balance::lock_and_read(
        &mut tx,
        &balance::BalanceKey::new(tenant, ItemId::from(ITEM), LocationId::from(LOCATION), "g"),
    )
    .await
    .unwrap();
    let backordered: i64 = sqlx::query_scalar(
        "SELECT quantity_backordered FROM inventory_backorders WHERE tenant_id = $1 AND item_id = $2",
    )
    .bind(tenant.get())
    .bind(ITEM)
    .fetch_one(&mut *tx)
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(b.on_hand, qty("10"));
    assert_eq!(b.reserved, qty("10"));
    assert_eq!(ScaledQty::from_raw(backordered), qty("5"));
}

/// S3 — the same shortfall rejected outright when backorders are
/// disabled: `ATP_INSUFFICIENT_AVAILABLE`, no writes.
#[tokio::test]
async fn s3_no_backorder_rejection() {
    let Some(pool) = connect().await else {
        eprintln!("Skipping s3_no_backorder_rejection - DATABASE_URL not set");
        return;
    };

    let tenant = fresh_tenant();
    seed_on_hand(&pool, tenant, qty("10")).await;

    let engine = ReservationEngine::new(
        pool.clone(),
        location_catalog_for(tenant),
        uom_catalog_for(tenant),
        Arc::new(NoOpDemandCatalog),
        config(false),
        None,
    );

    let err = engine
        .create_reservations(
            tenant,
            None,
            vec![ReservationRequest {
                demand_type: DemandType::sales_order_line(),
                demand_id: DemandId(3),
                item: ItemId::from(ITEM),
                location: LocationId::from(LOCATION),
                quantity: qty("15"),
                uom: "g".to_string(),
                warehouse_id: Some(WarehouseId::from(WH)),
                expires_at: None,
            }],
        )
        .await
        .expect_err("must reject without backorders");

    assert!(matches!(err, EngineError::AtpInsufficientAvailable));

    let mut tx = pool.begin().await.unwrap();
    let b = balance::lock_and_read(
        &mut tx,
        &balance::BalanceKey::new(tenant, ItemId::from(ITEM), LocationId::from(LOCATION), "g"),
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(b.on_hand, qty("10"));
    assert_eq!(b.reserved, ScaledQty::ZERO);
}

/// S4 — two concurrent `createReservations` calls against the same row,
/// demanding 7 each out of an on_hand of 10, with backorders enabled.
/// Exactly one may fully reserve 7; the other backorders the remainder.
/// Both commit, and no balance row ever shows `reserved > on_hand`.
#[tokio::test]
async fn s4_concurrent_reservers_never_oversell() {
    let Some(pool) = connect().await else {
        eprintln!("Skipping s4_concurrent_reservers_never_oversell - DATABASE_URL not set");
        return;
    };

    let tenant = fresh_tenant();
    seed_on_hand(&pool, tenant, qty("10")).await;

    let engine = Arc::new(ReservationEngine::new(
        pool.clone(),
        location_catalog_for(tenant),
        uom_catalog_for(tenant),
        Arc::new(NoOpDemandCatalog),
        config(true),
        None,
    ));

    let make_request = |demand_id: i64| ReservationRequest {
        demand_type: DemandType::sales_order_line(),
        demand_id: DemandId(demand_id),
        item: ItemId::from(ITEM),
        location: LocationId::from(LOCATION),
        quantity: qty("7"),
        uom: "g".to_string(),
        warehouse_id: Some(WarehouseId::from(WH)),
        expires_at: None,
    };

    let e1 = engine.clone();
    let e2 = engine.clone();
    let (r1, r2) = tokio::join!(
        e1.create_reservations(tenant, None, vec![make_request(41)]),
        e2.create_reservations(tenant, None, vec![make_request(42)]),
    );

    let r1 = r1.expect("first reservation commits");
    let r2 = r2.expect("second reservation commits");

    let total_reserved = r1.reservations[0].quantity_reserved.raw() + r2.reservations[0].quantity_reserved.raw();
    assert_eq!(total_reserved, qty("10").raw());
    assert!(r1.any_backordered || r2.any_backordered);

    let mut tx = pool.begin().await.unwrap();
    let b = balance::lock_and_read(
        &mut tx,
        &balance::BalanceKey::new(tenant, ItemId::from(ITEM), LocationId::from(LOCATION), "g"),
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();
    assert!(b.reserved.raw() <= b.on_hand.raw());
}

/// S5 — shipment with reservation allowance. Balance (5, 5, 0) with a
/// matching reservation at q=5; shipping 5 has `available=0` but
/// `available + reserveConsume(5) >= 5`, so the allowance lets it post,
/// leaving (0, 0, 0) and a FULFILLED reservation.
#[tokio::test]
async fn s5_shipment_with_reservation_allowance() {
    let Some(pool) = connect().await else {
        eprintln!("Skipping s5_shipment_with_reservation_allowance - DATABASE_URL not set");
        return;
    };

    let tenant = fresh_tenant();
    seed_on_hand(&pool, tenant, qty("5")).await;
    seed_cost_layer(&pool, tenant, qty("5")).await;

    let engine = ReservationEngine::new(
        pool.clone(),
        location_catalog_for(tenant),
        uom_catalog_for(tenant),
        Arc::new(NoOpDemandCatalog),
        config(true),
        None,
    );

    let demand_id = DemandId(5);
    let outcome = engine
        .create_reservations(
            tenant,
            None,
            vec![ReservationRequest {
                demand_type: DemandType::sales_order_line(),
                demand_id,
                item: ItemId::from(ITEM),
                location: LocationId::from(LOCATION),
                quantity: qty("5"),
                uom: "g".to_string(),
                warehouse_id: Some(WarehouseId::from(WH)),
                expires_at: None,
            }],
        )
        .await
        .expect("reservation created");
    assert_eq!(outcome.reservations[0].quantity_reserved, qty("5"));

    let shipment_id = post_shipment_fixture(&pool, tenant, "SO-S5", demand_id, qty("5")).await;

    let poster = ShipmentPoster::new(
        pool.clone(),
        location_catalog_for(tenant),
        Arc::new(NoOpSalesOrderCatalog),
        uom_catalog_for(tenant),
        Arc::new(AllowAllAuthority),
        config(true),
        None,
    );

    let view = poster
        .post(
            tenant,
            shipment_id,
            PostShipmentRequest {
                idempotency_key: "s5-post".to_string(),
                actor: "tester".to_string(),
                override_request: Default::default(),
            },
        )
        .await
        .expect("allowance lets the shipment post");

    assert_eq!(view.status, "posted");
    assert!(!view.override_applied);

    let mut tx = pool.begin().await.unwrap();
    let b = balance::lock_and_read(
        &mut tx,
        &balance::BalanceKey::new(tenant, ItemId::from(ITEM), LocationId::from(LOCATION), "g"),
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(b.on_hand, ScaledQty::ZERO);
    assert_eq!(b.reserved, ScaledQty::ZERO);
    assert_eq!(b.allocated, ScaledQty::ZERO);

    let reservation_id = outcome.reservations[0].id;
    let reservation = engine.get(tenant, reservation_id).await.unwrap();
    assert_eq!(reservation.state.as_str(), "FULFILLED");
}

/// S6 — idempotent shipment posting. A second `post` call with the same
/// idempotency key returns the same movement and leaves balances
/// untouched.
#[tokio::test]
async fn s6_idempotent_shipment_post() {
    let Some(pool) = connect().await else {
        eprintln!("Skipping s6_idempotent_shipment_post - DATABASE_URL not set");
        return;
    };

    let tenant = fresh_tenant();
    seed_on_hand(&pool, tenant, qty("20")).await;
    seed_cost_layer(&pool, tenant, qty("20")).await;

    let engine = ReservationEngine::new(
        pool.clone(),
        location_catalog_for(tenant),
        uom_catalog_for(tenant),
        Arc::new(NoOpDemandCatalog),
        config(true),
        None,
    );

    let demand_id = DemandId(6);
    engine
        .create_reservations(
            tenant,
            None,
            vec![ReservationRequest {
                demand_type: DemandType::sales_order_line(),
                demand_id,
                item: ItemId::from(ITEM),
                location: LocationId::from(LOCATION),
                quantity: qty("10"),
                uom: "g".to_string(),
                warehouse_id: Some(WarehouseId::from(WH)),
                expires_at: None,
            }],
        )
        .await
        .expect("reservation created");

    let shipment_id = post_shipment_fixture(&pool, tenant, "SO-S6", demand_id, qty("10")).await;

    let poster = ShipmentPoster::new(
        pool.clone(),
        location_catalog_for(tenant),
        Arc::new(NoOpSalesOrderCatalog),
        uom_catalog_for(tenant),
        Arc::new(AllowAllAuthority),
        config(true),
        None,
    );

    let request = PostShipmentRequest {
        idempotency_key: "s6-key".to_string(),
        actor: "tester".to_string(),
        override_request: Default::default(),
    };

    let first = poster.post(tenant, shipment_id, request.clone()).await.expect("first post commits");
    let balance_after_first = {
        let mut tx = pool.begin().await.unwrap();
        let b = balance::lock_and_read(
            &mut tx,
            &balance::BalanceKey::new(tenant, ItemId::from(ITEM), LocationId::from(LOCATION), "g"),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();
        b
    };

    let second = poster
        .post(tenant, shipment_id, request)
        .await
        .expect("retry against an already-posted shipment is a no-op");

    assert_eq!(first.movement_id, second.movement_id);
    assert_eq!(second.status, "posted");

    let mut tx = pool.begin().await.unwrap();
    let balance_after_second = balance::lock_and_read(
        &mut tx,
        &balance::BalanceKey::new(tenant, ItemId::from(ITEM), LocationId::from(LOCATION), "g"),
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(balance_after_first.on_hand, balance_after_second.on_hand);
    assert_eq!(balance_after_first.reserved, balance_after_second.reserved);
    assert_eq!(balance_after_first.allocated, balance_after_second.allocated);
}

/// S7 — negative-stock override. on_hand=0; shipping 1 with an authorized
/// override reason posts anyway; the movement records `override_reason`
/// and an audit `post` + `negative_override` pair is written.
#[tokio::test]
async fn s7_negative_override() {
    let Some(pool) = connect().await else {
        eprintln!("Skipping s7_negative_override - DATABASE_URL not set");
        return;
    };

    let tenant = fresh_tenant();
    seed_on_hand(&pool, tenant, ScaledQty::ZERO).await;
    seed_cost_layer(&pool, tenant, qty("1")).await;

    let shipment_id = post_shipment_fixture(&pool, tenant, "SO-S7", DemandId(7), qty("1")).await;

    let poster = ShipmentPoster::new(
        pool.clone(),
        location_catalog_for(tenant),
        Arc::new(NoOpSalesOrderCatalog),
        uom_catalog_for(tenant),
        Arc::new(AllowAllAuthority),
        config(true),
        None,
    );

    let view = poster
        .post(
            tenant,
            shipment_id,
            PostShipmentRequest {
                idempotency_key: "s7-post".to_string(),
                actor: "authorized-actor".to_string(),
                override_request: atp_engine::validator::OverrideRequest {
                    requested: true,
                    reason: Some("inventory correction".to_string()),
                    reference: None,
                },
            },
        )
        .await
        .expect("authorized override posts");

    assert_eq!(view.status, "posted");
    assert!(view.override_applied);

    let mut tx = pool.begin().await.unwrap();
    let movement_metadata: serde_json::Value = sqlx::query_scalar(
        "SELECT metadata FROM inventory_movements WHERE id = $1",
    )
    .bind(view.movement_id.unwrap().get())
    .fetch_one(&mut *tx)
    .await
    .unwrap();
    let audit_actions: Vec<String> = sqlx::query_scalar(
        "SELECT action FROM audit_log WHERE tenant_id = $1 ORDER BY occurred_at ASC",
    )
    .bind(tenant.get())
    .fetch_all(&mut *tx)
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(movement_metadata["override_reason"], "inventory correction");
    assert!(audit_actions.contains(&"post".to_string()));
    assert!(audit_actions.contains(&"negative_override".to_string()));

    // Without an authorized actor, the same shipment (a fresh one, since
    // the first is already posted) is rejected outright.
    let tenant2 = fresh_tenant();
    seed_on_hand(&pool, tenant2, ScaledQty::ZERO).await;
    let denied_shipment = post_shipment_fixture(&pool, tenant2, "SO-S7-denied", DemandId(71), qty("1")).await;
    let denied_poster = ShipmentPoster::new(
        pool.clone(),
        location_catalog_for(tenant2),
        Arc::new(NoOpSalesOrderCatalog),
        uom_catalog_for(tenant2),
        Arc::new(DenyAllAuthority),
        config(true),
        None,
    );
    let err = denied_poster
        .post(
            tenant2,
            denied_shipment,
            PostShipmentRequest {
                idempotency_key: "s7-denied".to_string(),
                actor: "unauthorized-actor".to_string(),
                override_request: atp_engine::validator::OverrideRequest {
                    requested: true,
                    reason: Some("inventory correction".to_string()),
                    reference: None,
                },
            },
        )
        .await
        .expect_err("unauthorized override must be rejected");
    assert!(matches!(err, EngineError::NegativeOverrideNotAllowed));
}
