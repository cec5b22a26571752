//! Remote executor integration over gRPC.
//!
//! A `grpc_task` delegates work to a remote executor implementing
//! `taskflow.executor.v1.TaskExecutorService`: one server-streaming
//! `ExecuteTask` call that yields progress / result / error variants, plus
//! unary `CancelTask` and `HealthCheck`.
//!
//! [`ManagedClient`] wraps one long-lived connection per configured service
//! with keepalive, a background health probe, and bounded unary retries.
//! [`ClientManager`] is the shared name → client registry.

pub mod client;
pub mod errors;
pub mod manager;
pub mod proto;

pub use client::{ClientConfig, ExecuteEvent, ManagedClient};
pub use errors::RpcError;
pub use manager::{ClientManager, ServiceHealth};
