//! Core identifier types used throughout the engine.
//!
//! These are thin newtypes over `i64`/`Uuid` rather than bare primitives so
//! that a tenant id can never be passed where an item id is expected. Every
//! id is `Copy` and round-trips through Postgres as the wrapped primitive
//! type (`BIGINT` or `UUID`), matching how the rest of the system stores
//! keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! int_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            #[inline]
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[inline]
            pub fn get(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(v: Uuid) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Same wire shape as [`uuid_id`] (a `Uuid` newtype), but `new()` mints a
/// ULID-derived value instead of a random v4 — rows that are naturally
/// append-ordered (movements, cost layers, shipments) get ids that sort the
/// way they were created, which is a cheap win for index locality and for
/// reading `ORDER BY id` as "creation order" in ad-hoc queries.
macro_rules! sortable_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(ulid::Ulid::new().into())
            }

            #[inline]
            pub fn get(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(v: Uuid) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// Tenant and master-data scoping ids. These are owned by the excluded
// master-data CRUD peer; this crate only ever receives and stores them.
int_id!(TenantId);
int_id!(WarehouseId);
int_id!(ItemId);
int_id!(LocationId);

// Ids this crate itself mints.
uuid_id!(ReservationId);
sortable_id!(MovementId);
sortable_id!(CostLayerId);
sortable_id!(ShipmentId);
sortable_id!(ShipmentLineId);

/// Demand-side reference a reservation is held against (a sales order line,
/// a work order, etc.). The demand type/id pair is opaque to this crate —
/// it is never dereferenced, only matched on for reservation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DemandId(pub i64);

impl fmt::Display for DemandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_id_roundtrips_through_i64() {
        let t = TenantId::from(42);
        assert_eq!(t.get(), 42);
        assert_eq!(t.to_string(), "42");
    }

    #[test]
    fn uuid_id_generates_distinct_values() {
        let a = ReservationId::new();
        let b = ReservationId::new();
        assert_ne!(a, b);
    }
}
