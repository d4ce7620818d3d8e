//! cors-probe: a capturing relay plus CORS compliance analysis.
//!
//! Drivers send tagged traffic through the relay, which forwards it to the
//! real API and records every exchange under the run's correlation id. The
//! control API then settles the run, evaluates the origin/method/headers
//! negotiation and renders a sequence diagram of what happened.

pub mod classifier;
pub mod config;
pub mod diagram;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod presets;
pub mod relay;
pub mod runner;
pub mod runs;
pub mod server;
pub mod settle;
pub mod store;
pub mod telemetry;
