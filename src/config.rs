//! Engine configuration, read once at process startup.
//!
//! Every key is read from the environment with a typed default, the same
//! `std::env::var(...).ok().and_then(|s| s.parse().ok()).unwrap_or(default)`
//! idiom used throughout this codebase — there is no external config-file
//! framework dependency.

use chrono::{DateTime, Utc};

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Typed, immutable configuration for the ATP engine, loaded once via
/// [`EngineConfig::from_env`] and shared behind an `Arc` from then on.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whether `createReservations` may split unmet demand into a
    /// `Backorder` row rather than failing outright.
    pub backorders_enabled: bool,
    /// Require `externalRef` on movement create.
    pub enforce_inventory_movement_external_ref: bool,
    /// Require entered+canonical triplets on movement lines for postings
    /// that occur after `canonical_movement_required_after`.
    pub enforce_canonical_movement_fields: bool,
    pub canonical_movement_required_after: Option<DateTime<Utc>>,
    /// Configures a peer module (work-order BOM expansion) that this crate
    /// does not implement. Read and stored so a deployment can size both
    /// services from one env file, but never consulted by this crate's
    /// logic.
    pub bom_expansion_max_depth: u32,
    /// Retry budget for every mutating reservation/shipment operation
    /// except `createReservations`.
    pub serializable_retries: u32,
    /// Retry budget specifically for `createReservations` (wider batches,
    /// more contention, hence a larger budget).
    pub reservation_create_retries: u32,

    // Ambient additions needed to run the crate as a service.
    pub database_url: String,
    pub pg_pool_size: u32,
    pub http_bind_addr: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            backorders_enabled: env_parsed("BACKORDERS_ENABLED", true),
            enforce_inventory_movement_external_ref: env_parsed(
                "ENFORCE_INVENTORY_MOVEMENT_EXTERNAL_REF",
                false,
            ),
            enforce_canonical_movement_fields: env_parsed(
                "ENFORCE_CANONICAL_MOVEMENT_FIELDS",
                false,
            ),
            canonical_movement_required_after: std::env::var("CANONICAL_MOVEMENT_REQUIRED_AFTER")
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            bom_expansion_max_depth: env_parsed("BOM_EXPANSION_MAX_DEPTH", 20),
            serializable_retries: env_parsed("ATP_SERIALIZABLE_RETRIES", 2),
            reservation_create_retries: env_parsed("ATP_RESERVATION_CREATE_RETRIES", 6),

            database_url: env_string("DATABASE_URL", ""),
            pg_pool_size: env_parsed("PG_POOL_SIZE", 10),
            http_bind_addr: env_string("HTTP_BIND_ADDR", "0.0.0.0:8080"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // SAFETY: tests run single-threaded within this module's scope for env vars.
        for key in [
            "BACKORDERS_ENABLED",
            "ENFORCE_INVENTORY_MOVEMENT_EXTERNAL_REF",
            "ATP_SERIALIZABLE_RETRIES",
            "ATP_RESERVATION_CREATE_RETRIES",
            "BOM_EXPANSION_MAX_DEPTH",
        ] {
            unsafe { std::env::remove_var(key) };
        }
        let cfg = EngineConfig::from_env();
        assert!(cfg.backorders_enabled);
        assert!(!cfg.enforce_inventory_movement_external_ref);
        assert_eq!(cfg.serializable_retries, 2);
        assert_eq!(cfg.reservation_create_retries, 6);
        assert_eq!(cfg.bom_expansion_max_depth, 20);
    }
}
