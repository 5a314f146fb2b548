//! Multi-tenant Available-to-Promise (ATP) reservation and
//! shipment-posting engine.
//!
//! Converts demand into durable reservations against stock balances under
//! a serializable concurrency protocol, advances reservations through a
//! strict lifecycle, and posts shipments that consume stock and
//! reservations under FIFO cost-layer accounting, all while keeping the
//! three-counter balance (on-hand, reserved, allocated) authoritative
//! under concurrent writers.
//!
//! # Modules
//!
//! - [`core_types`] - tenant/warehouse/item/reservation/shipment ids
//! - [`money`] - fixed-point scaled quantities
//! - [`config`] - engine configuration, loaded once from the environment
//! - [`db`] - connection pool and the SERIALIZABLE-retry transaction helper
//! - [`locks`] - application-level advisory lock ordering
//! - [`cache`] - optional in-process ATP read cache
//! - [`uom`] - unit-of-measure canonicalization
//! - [`balance`] - the (tenant, item, location, uom) balance store
//! - [`cost_layer`] - FIFO cost-layer accounting
//! - [`movement`] - inventory movement headers/lines
//! - [`idempotency`] - idempotency-record bookkeeping for client retries
//! - [`outbox`] - transactional outbox for downstream event delivery
//! - [`reservation`] - the reservation lifecycle engine
//! - [`shipment`] - the shipment poster
//! - [`validator`] - the negative-stock override policy
//! - [`audit`] - audit log writes
//! - [`gateway`] - the HTTP surface in front of the two engines

pub mod audit;
pub mod balance;
pub mod cache;
pub mod config;
pub mod core_types;
pub mod cost_layer;
pub mod db;
pub mod error;
pub mod gateway;
pub mod idempotency;
pub mod locks;
pub mod money;
pub mod movement;
pub mod outbox;
pub mod reservation;
pub mod shipment;
pub mod uom;
pub mod validator;

pub use config::EngineConfig;
pub use core_types::{DemandId, ItemId, LocationId, ReservationId, ShipmentId, TenantId, WarehouseId};
pub use db::Database;
pub use error::EngineError;
pub use reservation::{ReservationEngine, ReservationRequest, ReservationView};
pub use shipment::{PostShipmentRequest, ShipmentPoster, ShipmentView};
