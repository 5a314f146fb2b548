//! Reservation lifecycle: a four-hop state machine (`RESERVED -> ALLOCATED
//! -> FULFILLED`, with `CANCELLED`/`EXPIRED` reachable from the
//! non-terminal states) plus the batch-create operation that turns demand
//! into reservations under the advisory-lock ATP protocol.

pub mod collaborators;
pub mod db;
pub mod engine;
pub mod model;
pub mod state;

pub use collaborators::{DemandCatalog, InMemoryLocationCatalog, LocationCatalog, NoOpDemandCatalog};
pub use engine::{
    CreateReservationsOutcome, ReservationEngine, ReservationRequest, ReservationView,
};
pub use model::{DemandType, Reservation, ReservationEventType};
pub use state::ReservationState;
