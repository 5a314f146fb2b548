mod helpers;
mod health;
mod reservation;
mod shipment;

pub use health::{HealthResponse, health_check};
pub use reservation::{allocate, cancel, create_reservations, fulfill, get};
pub use shipment::post as post_shipment;
