//! Shared infrastructure for the simulated devices.
//!
//! - **errors**: per-operation failure injection
//! - **rng**: seeded random source for noise and failure decisions

pub mod errors;
pub mod rng;

pub use errors::{ErrorConfig, ErrorScenario};
pub use rng::MockRng;
