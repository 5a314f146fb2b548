//! In-process ATP read cache.
//!
//! Optional and purely an optimization: every public mutation invalidates
//! the whole `(tenant, warehouse)` scope it touched rather than patching
//! individual entries, per spec.md §9 ("correctness matters more than
//! precision here"). Grounded on the teacher's `dashmap` dependency
//! (already used there for connection/session maps) rather than its
//! `cached`-crate TTL cache, which has no explicit-invalidation API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::core_types::{ItemId, LocationId, TenantId, WarehouseId};
use crate::money::ScaledQtySigned;

#[derive(Debug, Clone, Copy)]
pub struct CachedAvailability {
    pub available: ScaledQtySigned,
    pub cached_at: Instant,
}

/// Keyed at the granularity a `(tenant, warehouse)`-scoped invalidation can
/// wipe in one call: `(tenant, warehouse, item, location, uom)` entries all
/// live under the same `(tenant, warehouse)` prefix, tracked separately so
/// invalidation doesn't need a second index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    tenant: TenantId,
    warehouse: WarehouseId,
    item: ItemId,
    location: LocationId,
    uom: String,
}

/// Read-through cache for ATP availability lookups. Never consulted by any
/// write path in this crate — the reservation engine and shipment poster
/// always read balances under a row lock inside their transaction. This
/// exists for read-only ATP queries (a future reporting/quote endpoint)
/// that would otherwise hit the balance table on every call.
pub struct AtpCache {
    entries: DashMap<EntryKey, CachedAvailability>,
    ttl: Duration,
}

impl AtpCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(
        &self,
        tenant: TenantId,
        warehouse: WarehouseId,
        item: ItemId,
        location: LocationId,
        uom: &str,
    ) -> Option<ScaledQtySigned> {
        let key = EntryKey {
            tenant,
            warehouse,
            item,
            location,
            uom: uom.to_string(),
        };
        let entry = self.entries.get(&key)?;
        if entry.cached_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.available)
    }

    pub fn put(
        &self,
        tenant: TenantId,
        warehouse: WarehouseId,
        item: ItemId,
        location: LocationId,
        uom: &str,
        available: ScaledQtySigned,
    ) {
        let key = EntryKey {
            tenant,
            warehouse,
            item,
            location,
            uom: uom.to_string(),
        };
        self.entries.insert(
            key,
            CachedAvailability {
                available,
                cached_at: Instant::now(),
            },
        );
    }

    /// Whole-scope invalidation by `(tenant, warehouse)` — never patched
    /// from a delta. Called once per committing mutation, after commit.
    pub fn invalidate_scope(&self, tenant: TenantId, warehouse: WarehouseId) {
        self.entries
            .retain(|key, _| !(key.tenant == tenant && key.warehouse == warehouse));
    }
}

pub type SharedAtpCache = Arc<AtpCache>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = AtpCache::new(Duration::from_secs(30));
        let (t, w, i, l) = (
            TenantId::from(1),
            WarehouseId::from(1),
            ItemId::from(1),
            LocationId::from(1),
        );
        cache.put(t, w, i, l, "g", ScaledQtySigned::from_raw(500));
        assert_eq!(cache.get(t, w, i, l, "g"), Some(ScaledQtySigned::from_raw(500)));
    }

    #[test]
    fn invalidate_scope_clears_only_matching_warehouse() {
        let cache = AtpCache::new(Duration::from_secs(30));
        let t = TenantId::from(1);
        let i = ItemId::from(1);
        let l = LocationId::from(1);
        cache.put(t, WarehouseId::from(1), i, l, "g", ScaledQtySigned::from_raw(1));
        cache.put(t, WarehouseId::from(2), i, l, "g", ScaledQtySigned::from_raw(2));

        cache.invalidate_scope(t, WarehouseId::from(1));

        assert_eq!(cache.get(t, WarehouseId::from(1), i, l, "g"), None);
        assert_eq!(
            cache.get(t, WarehouseId::from(2), i, l, "g"),
            Some(ScaledQtySigned::from_raw(2))
        );
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let cache = AtpCache::new(Duration::from_millis(1));
        let (t, w, i, l) = (
            TenantId::from(1),
            WarehouseId::from(1),
            ItemId::from(1),
            LocationId::from(1),
        );
        cache.put(t, w, i, l, "g", ScaledQtySigned::from_raw(5));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(t, w, i, l, "g"), None);
    }
}
