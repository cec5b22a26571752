//! Engine-level error types.

use thiserror::Error;

/// Errors surfaced by the broker adapter.
///
/// `AlreadyExists` and `NotFound` are stable classification points for the
/// HTTP layer (409 / 404); everything else is internal.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Enqueue collided with a live uniqueness window or a known task id.
    #[error("task already exists")]
    AlreadyExists,

    /// The referenced task is not known to the broker.
    #[error("task not found")]
    NotFound,

    /// The requested operation is invalid for the task's current state.
    #[error("invalid task state: {0}")]
    InvalidState(String),

    /// A stored task record could not be decoded.
    #[error("corrupt task record: {0}")]
    Corrupt(String),

    /// Transport or server error from Redis.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
