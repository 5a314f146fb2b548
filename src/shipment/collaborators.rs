//! External master-data boundary for the sales order a shipment fulfills.
//! Same shape as [`crate::reservation::collaborators::LocationCatalog`] —
//! this crate only ever reads a sales order's warehouse to guard against
//! cross-warehouse leakage (spec.md §4.6 step 3), never its other fields.

use std::collections::HashMap;

use crate::core_types::{TenantId, WarehouseId};

pub trait SalesOrderCatalog: Send + Sync {
    /// `None` when the sales order's warehouse is not resolvable by this
    /// peer (e.g. an order type that doesn't carry a warehouse) — in that
    /// case the leakage check has nothing to compare against and is
    /// skipped, matching how [`crate::reservation::collaborators::DemandCatalog`]
    /// treats an unknown demand warehouse.
    fn warehouse_of_sales_order(&self, tenant: TenantId, sales_order_id: &str) -> Option<WarehouseId>;
}

#[derive(Default)]
pub struct InMemorySalesOrderCatalog {
    warehouse_of: HashMap<(i64, String), WarehouseId>,
}

impl InMemorySalesOrderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, tenant: TenantId, sales_order_id: impl Into<String>, warehouse: WarehouseId) -> Self {
        self.warehouse_of.insert((tenant.get(), sales_order_id.into()), warehouse);
        self
    }
}

impl SalesOrderCatalog for InMemorySalesOrderCatalog {
    fn warehouse_of_sales_order(&self, tenant: TenantId, sales_order_id: &str) -> Option<WarehouseId> {
        self.warehouse_of
            .get(&(tenant.get(), sales_order_id.to_string()))
            .copied()
    }
}

/// Sales order catalog that never knows a warehouse — the leakage check
/// becomes a no-op and ship-from location alone governs scope. A real
/// deployment wires [`SalesOrderCatalog`] to whatever owns sales orders.
#[derive(Default)]
pub struct NoOpSalesOrderCatalog;

impl SalesOrderCatalog for NoOpSalesOrderCatalog {
    fn warehouse_of_sales_order(&self, _tenant: TenantId, _sales_order_id: &str) -> Option<WarehouseId> {
        None
    }
}
