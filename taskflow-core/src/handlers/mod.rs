//! Built-in task handlers.

pub mod demo;
pub mod grpc_task;

pub use demo::DemoHandler;
pub use grpc_task::GrpcTaskHandler;
