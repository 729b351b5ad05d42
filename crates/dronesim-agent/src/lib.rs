//! Simulated drone agent: vehicle actor, transport glue and state persistence.

pub mod backoff;
pub mod config;
pub mod loops;
pub mod persistence;
pub mod registration;
pub mod transport;
pub mod vehicle;

pub use config::Config;
pub use vehicle::{Vehicle, VehicleError, VehicleHandle, VehicleRequest};
