//! Tracing and OpenTelemetry setup shared by the Opsflow binaries.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};
