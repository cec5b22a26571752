//! taskflow-core – the task lifecycle engine.
//!
//! Layered as follows:
//! - [`broker`] wraps Redis with asynq-shaped queue semantics (pending /
//!   scheduled / retry / archived / completed sets, uniqueness windows,
//!   pause flags, cancellation fan-out).
//! - [`worker`] polls the broker with a concurrency limit and drives typed
//!   [`worker::Handler`]s through a recovery → logging → timeout middleware
//!   chain.
//! - [`rpc`] holds the managed gRPC executor clients used by the
//!   [`handlers::grpc_task`] handler.
//! - [`progress`] is the per-task append-only event log (Redis streams) with
//!   blocking subscriptions.

pub mod broker;
pub mod error;
pub mod handlers;
pub mod payload;
pub mod progress;
pub mod rpc;
pub mod task;
pub mod worker;

pub use error::BrokerError;
pub use task::{TaskKind, TaskState};
