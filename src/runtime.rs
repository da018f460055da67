//! Configuration, chain profiles, the error taxonomy, and tracing.

pub mod config;
pub mod error;
pub mod profile;
pub mod telemetry;
