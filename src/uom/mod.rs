//! Unit-of-measure canonicalization.
//!
//! Item master data (which uom is canonical for an item, what dimension it
//! belongs to, and the conversion factors between units of that dimension)
//! is owned by the excluded master-data CRUD peer. This module only
//! consumes it, through the [`UomCatalog`] trait — the same shape as this
//! codebase's `ServiceAdapter` trait for account systems it does not own.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::core_types::{ItemId, TenantId};
use crate::error::EngineError;
use crate::money::{self, ScaledQty};

/// Per-item canonical uom and the dimension it belongs to (e.g. item X's
/// canonical uom is "g" in dimension "mass").
#[derive(Debug, Clone)]
pub struct CanonicalUom {
    pub uom: String,
    pub dimension: String,
}

/// Read-only view onto item uom master data.
pub trait UomCatalog: Send + Sync {
    fn canonical_uom(&self, tenant: TenantId, item: ItemId) -> Option<CanonicalUom>;
    /// Factor such that `1 <from_uom> == factor * <to_uom>`, within the
    /// dimension both units belong to. `None` means the units are not
    /// comparable (different dimension, or unknown unit).
    fn conversion_factor(&self, dimension: &str, from_uom: &str, to_uom: &str) -> Option<Decimal>;
}

/// A quantity that has been resolved to its canonical uom, plus the
/// originally-entered pair for audit (`getCanonicalMovementFields`).
#[derive(Debug, Clone)]
pub struct CanonicalQuantity {
    pub qty_entered: ScaledQty,
    pub uom_entered: String,
    pub qty_canonical: ScaledQty,
    pub canonical_uom: String,
    pub dimension: String,
}

/// `convertToCanonical(tenant, itemId, qty, uom) -> (qty', canonicalUom,
/// dimension)`. Fails with `ITEM_CANONICAL_UOM_MISSING` when the item has
/// no canonical uom configured, or `UOM_DIMENSION_MISMATCH` when `uom`
/// cannot be converted into that dimension.
pub fn convert_to_canonical(
    catalog: &dyn UomCatalog,
    tenant: TenantId,
    item: ItemId,
    qty: ScaledQty,
    uom: &str,
) -> Result<CanonicalQuantity, EngineError> {
    let canonical = catalog
        .canonical_uom(tenant, item)
        .ok_or_else(|| EngineError::ItemCanonicalUomMissing {
            item: item.to_string(),
        })?;

    if uom == canonical.uom {
        return Ok(CanonicalQuantity {
            qty_entered: qty,
            uom_entered: uom.to_string(),
            qty_canonical: qty,
            canonical_uom: canonical.uom,
            dimension: canonical.dimension,
        });
    }

    let factor = catalog
        .conversion_factor(&canonical.dimension, uom, &canonical.uom)
        .ok_or_else(|| EngineError::UomDimensionMismatch { uom: uom.to_string() })?;

    let canonical_decimal = qty.to_decimal() * factor;
    let qty_canonical = money::round_quantity(canonical_decimal)
        .map_err(|_| EngineError::UomDimensionMismatch { uom: uom.to_string() })?;

    Ok(CanonicalQuantity {
        qty_entered: qty,
        uom_entered: uom.to_string(),
        qty_canonical,
        canonical_uom: canonical.uom,
        dimension: canonical.dimension,
    })
}

/// Same as [`convert_to_canonical`] but named per spec.md's
/// `getCanonicalMovementFields`, which additionally documents the entered
/// triplet as distinct output for movement-line audit columns. The
/// returned [`CanonicalQuantity`] already carries both pairs.
pub fn get_canonical_movement_fields(
    catalog: &dyn UomCatalog,
    tenant: TenantId,
    item: ItemId,
    qty: ScaledQty,
    uom: &str,
) -> Result<CanonicalQuantity, EngineError> {
    convert_to_canonical(catalog, tenant, item, qty, uom)
}

/// In-memory [`UomCatalog`] for tests and for deployments where the
/// master-data peer is co-located and its catalog is small enough to
/// snapshot into memory. A real deployment wires [`UomCatalog`] to the
/// master-data service's query API instead.
#[derive(Default)]
pub struct InMemoryUomCatalog {
    items: HashMap<(i64, i64), CanonicalUom>,
    factors: HashMap<(String, String, String), Decimal>,
}

impl InMemoryUomCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, tenant: TenantId, item: ItemId, uom: &str, dimension: &str) -> Self {
        self.items.insert(
            (tenant.get(), item.get()),
            CanonicalUom {
                uom: uom.to_string(),
                dimension: dimension.to_string(),
            },
        );
        self
    }

    /// Registers a factor such that `1 from_uom == factor * to_uom`, and
    /// its inverse, within `dimension`.
    pub fn with_factor(mut self, dimension: &str, from_uom: &str, to_uom: &str, factor: Decimal) -> Self {
        self.factors.insert(
            (dimension.to_string(), from_uom.to_string(), to_uom.to_string()),
            factor,
        );
        if !factor.is_zero() {
            self.factors.insert(
                (dimension.to_string(), to_uom.to_string(), from_uom.to_string()),
                Decimal::ONE / factor,
            );
        }
        self
    }
}

impl UomCatalog for InMemoryUomCatalog {
    fn canonical_uom(&self, tenant: TenantId, item: ItemId) -> Option<CanonicalUom> {
        self.items.get(&(tenant.get(), item.get())).cloned()
    }

    fn conversion_factor(&self, dimension: &str, from_uom: &str, to_uom: &str) -> Option<Decimal> {
        if from_uom == to_uom {
            return Some(Decimal::ONE);
        }
        self.factors
            .get(&(dimension.to_string(), from_uom.to_string(), to_uom.to_string()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn mass_catalog() -> InMemoryUomCatalog {
        InMemoryUomCatalog::new()
            .with_item(TenantId::from(1), ItemId::from(1), "g", "mass")
            .with_factor("mass", "mg", "g", Decimal::from_str("0.001").unwrap())
    }

    #[test]
    fn converts_mg_to_canonical_grams() {
        let catalog = mass_catalog();
        let qty = money::round_quantity(Decimal::from_str("250").unwrap()).unwrap();
        let result =
            convert_to_canonical(&catalog, TenantId::from(1), ItemId::from(1), qty, "mg").unwrap();
        assert_eq!(result.qty_canonical, money::round_quantity(Decimal::from_str("0.25").unwrap()).unwrap());
        assert_eq!(result.canonical_uom, "g");
        assert_eq!(result.dimension, "mass");
        assert_eq!(result.uom_entered, "mg");
    }

    #[test]
    fn same_uom_as_canonical_is_a_passthrough() {
        let catalog = mass_catalog();
        let qty = money::round_quantity(Decimal::from_str("5").unwrap()).unwrap();
        let result =
            convert_to_canonical(&catalog, TenantId::from(1), ItemId::from(1), qty, "g").unwrap();
        assert_eq!(result.qty_canonical, qty);
    }

    #[test]
    fn missing_canonical_uom_fails() {
        let catalog = InMemoryUomCatalog::new();
        let qty = money::round_quantity(Decimal::from_str("5").unwrap()).unwrap();
        let err =
            convert_to_canonical(&catalog, TenantId::from(1), ItemId::from(99), qty, "g").unwrap_err();
        assert!(matches!(err, EngineError::ItemCanonicalUomMissing { .. }));
    }

    #[test]
    fn unconvertible_uom_fails_dimension_mismatch() {
        let catalog = mass_catalog();
        let qty = money::round_quantity(Decimal::from_str("5").unwrap()).unwrap();
        let err =
            convert_to_canonical(&catalog, TenantId::from(1), ItemId::from(1), qty, "mL").unwrap_err();
        assert!(matches!(err, EngineError::UomDimensionMismatch { .. }));
    }
}
