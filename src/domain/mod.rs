//! Domain layer: models, events, errors, and ports.

pub mod errors;
pub mod events;
pub mod models;
pub mod ports;
