//! Operations and observability.

pub mod telemetry;
