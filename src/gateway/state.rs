use std::sync::Arc;

use sqlx::PgPool;

use crate::cache::SharedAtpCache;
use crate::reservation::ReservationEngine;
use crate::shipment::ShipmentPoster;

/// Gateway application state (shared across every handler).
///
/// Both engines share the same pool and cache; each also holds its own
/// set of collaborator trait objects since the reservation engine and
/// shipment poster don't consult the same master-data peers (a shipment
/// additionally needs a `SalesOrderCatalog` and `OverrideAuthority`).
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub reservation_engine: Arc<ReservationEngine>,
    pub shipment_poster: Arc<ShipmentPoster>,
    pub cache: Option<SharedAtpCache>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        reservation_engine: Arc<ReservationEngine>,
        shipment_poster: Arc<ShipmentPoster>,
        cache: Option<SharedAtpCache>,
    ) -> Self {
        Self {
            pool,
            reservation_engine,
            shipment_poster,
            cache,
        }
    }
}
