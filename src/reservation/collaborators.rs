//! External master-data boundaries the reservation engine consults but
//! does not own: which warehouse a location or a piece of demand belongs
//! to, and whether a location is sellable. Same shape as [`crate::uom::UomCatalog`].

use std::collections::{HashMap, HashSet};

use crate::core_types::{DemandId, ItemId, LocationId, TenantId, WarehouseId};

use super::model::DemandType;

pub trait LocationCatalog: Send + Sync {
    fn warehouse_of(&self, tenant: TenantId, location: LocationId) -> Option<WarehouseId>;
    fn is_sellable(&self, tenant: TenantId, location: LocationId, warehouse: WarehouseId) -> bool;
}

pub trait DemandCatalog: Send + Sync {
    /// The warehouse implied by the demand line itself (e.g. a sales
    /// order's warehouse), when that information is already known at
    /// reservation time.
    fn warehouse_of_demand(
        &self,
        tenant: TenantId,
        demand_type: &DemandType,
        demand_id: DemandId,
        item: ItemId,
    ) -> Option<WarehouseId>;
}

#[derive(Default)]
pub struct InMemoryLocationCatalog {
    warehouse_of: HashMap<(i64, i64), WarehouseId>,
    sellable: HashSet<(i64, i64, i64)>,
}

impl InMemoryLocationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, tenant: TenantId, location: LocationId, warehouse: WarehouseId) -> Self {
        self.warehouse_of.insert((tenant.get(), location.get()), warehouse);
        self.sellable
            .insert((tenant.get(), location.get(), warehouse.get()));
        self
    }

    pub fn with_unsellable_location(
        mut self,
        tenant: TenantId,
        location: LocationId,
        warehouse: WarehouseId,
    ) -> Self {
        self.warehouse_of.insert((tenant.get(), location.get()), warehouse);
        self.sellable
            .remove(&(tenant.get(), location.get(), warehouse.get()));
        self
    }
}

impl LocationCatalog for InMemoryLocationCatalog {
    fn warehouse_of(&self, tenant: TenantId, location: LocationId) -> Option<WarehouseId> {
        self.warehouse_of.get(&(tenant.get(), location.get())).copied()
    }

    fn is_sellable(&self, tenant: TenantId, location: LocationId, warehouse: WarehouseId) -> bool {
        self.sellable
            .contains(&(tenant.get(), location.get(), warehouse.get()))
    }
}

/// Demand catalog that never knows a demand's warehouse — location
/// resolution alone decides it. A real deployment wires this to whatever
/// owns sales orders.
#[derive(Default)]
pub struct NoOpDemandCatalog;

impl DemandCatalog for NoOpDemandCatalog {
    fn warehouse_of_demand(
        &self,
        _tenant: TenantId,
        _demand_type: &DemandType,
        _demand_id: DemandId,
        _item: ItemId,
    ) -> Option<WarehouseId> {
        None
    }
}
