//! ATP engine HTTP server entrypoint.
//!
//! Loads configuration from the environment, opens the Postgres pool,
//! wires the master-data collaborator traits to in-memory stand-ins (a
//! real deployment replaces these with adapters onto its own master-data
//! service), and serves the HTTP surface defined in [`atp_engine::gateway`].

use std::sync::Arc;
use std::time::Duration;

use atp_engine::cache::AtpCache;
use atp_engine::config::EngineConfig;
use atp_engine::db::Database;
use atp_engine::gateway::{run_server, state::AppState};
use atp_engine::outbox;
use atp_engine::reservation::{InMemoryLocationCatalog, NoOpDemandCatalog, ReservationEngine};
use atp_engine::shipment::{NoOpSalesOrderCatalog, ShipmentPoster};
use atp_engine::uom::InMemoryUomCatalog;
use atp_engine::validator::DenyAllAuthority;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Arc::new(EngineConfig::from_env());

    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL must be set");
    }

    let db = Database::connect(&config.database_url, config.pg_pool_size).await?;
    db.health_check().await?;
    let pool = db.pool().clone();

    // Master-data collaborators: this crate never owns items, locations,
    // warehouses, or sales orders, so the binary wires empty in-memory
    // stand-ins here. A real deployment implements these traits against
    // whatever service owns that data.
    let location_catalog = Arc::new(InMemoryLocationCatalog::new());
    let uom_catalog = Arc::new(InMemoryUomCatalog::new());
    let demand_catalog = Arc::new(NoOpDemandCatalog);
    let sales_order_catalog = Arc::new(NoOpSalesOrderCatalog);
    // Negative-stock override authority is an RBAC decision this crate
    // doesn't own either; default closed until a real authority is wired.
    let override_authority = Arc::new(DenyAllAuthority);

    let cache = Some(Arc::new(AtpCache::new(Duration::from_secs(30))));

    let reservation_engine = Arc::new(ReservationEngine::new(
        pool.clone(),
        location_catalog.clone(),
        uom_catalog.clone(),
        demand_catalog,
        config.clone(),
        cache.clone(),
    ));

    let shipment_poster = Arc::new(ShipmentPoster::new(
        pool.clone(),
        location_catalog,
        sales_order_catalog,
        uom_catalog,
        override_authority,
        config.clone(),
        cache.clone(),
    ));

    let state = Arc::new(AppState::new(
        pool.clone(),
        reservation_engine.clone(),
        shipment_poster,
        cache,
    ));

    tokio::spawn(expiry_job(reservation_engine, pool.clone()));
    tokio::spawn(outbox_drain_job(pool));

    run_server(&config.http_bind_addr, state).await
}

/// Background sweep that expires reservations past `expiresAt`, releasing
/// their hold back to available (spec.md §4.5's `expireReservations`).
async fn expiry_job(engine: Arc<ReservationEngine>, _pool: sqlx::PgPool) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        match engine.expire_reservations_job(200).await {
            Ok(count) if count > 0 => tracing::info!(count, "expired stale reservations"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "reservation expiry sweep failed"),
        }
    }
}

/// Background drain of the transactional outbox. Uses [`outbox::NullPublisher`]
/// by default — wiring a real publisher (message bus, webhook relay) is an
/// excluded downstream concern (spec.md §4.8).
async fn outbox_drain_job(pool: sqlx::PgPool) {
    let publisher = outbox::NullPublisher;
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        if let Err(e) = outbox::drain_once(&pool, &publisher, 100).await {
            tracing::warn!(error = %e, "outbox drain failed");
        }
    }
}
