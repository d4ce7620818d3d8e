//! Tracing setup for cors-probe: fmt logging with optional OTLP export, plus
//! span macros shared by the relay and the evaluator.

pub mod config;
pub mod otlp;
pub mod spans;

pub use config::{LogFormat, OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
