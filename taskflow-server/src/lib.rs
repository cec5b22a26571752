//! taskflow-server – HTTP API, configuration, and process wiring.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod service;
pub mod state;
pub mod telemetry;
