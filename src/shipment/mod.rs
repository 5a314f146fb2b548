//! Shipment header/lines and the shipment poster (spec.md §4.6).

mod collaborators;
mod db;
mod model;
mod poster;

pub use collaborators::{InMemorySalesOrderCatalog, NoOpSalesOrderCatalog, SalesOrderCatalog};
pub use db::{NewShipment, NewShipmentLine, insert_draft, insert_line};
pub use model::{Shipment, ShipmentLine, ShipmentStatus};
pub use poster::{PostShipmentRequest, ShipmentLineView, ShipmentPoster, ShipmentView};

#[cfg(test)]
mod tests {
    use crate::core_types::{TenantId, WarehouseId};

    use super::*;

    #[test]
    fn sales_order_catalog_returns_registered_warehouse() {
        let catalog = InMemorySalesOrderCatalog::new().with_order(TenantId::from(1), "SO-1", WarehouseId::from(7));
        assert_eq!(
            catalog.warehouse_of_sales_order(TenantId::from(1), "SO-1"),
            Some(WarehouseId::from(7))
        );
    }

    #[test]
    fn sales_order_catalog_unknown_order_returns_none() {
        let catalog = InMemorySalesOrderCatalog::new();
        assert_eq!(catalog.warehouse_of_sales_order(TenantId::from(1), "SO-404"), None);
    }

    #[test]
    fn noop_sales_order_catalog_always_none() {
        assert_eq!(
            NoOpSalesOrderCatalog.warehouse_of_sales_order(TenantId::from(1), "SO-1"),
            None
        );
    }
}
