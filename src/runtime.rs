//! Runtime glue that wires configuration, telemetry, run summaries, and the
//! run controller.

pub mod config;
pub mod controller;
pub mod error;
pub mod summary;
pub mod telemetry;
