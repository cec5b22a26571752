//! Worker runtime: typed handlers, middleware, and the dispatch loop.

mod middleware;
mod registry;
mod runtime;

pub use middleware::{with_logging, with_recovery, with_timeout};
pub use registry::Registry;
pub use runtime::{WorkerConfig, WorkerRuntime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::DequeuedTask;

/// Failure modes a handler can report.
///
/// `Retry` feeds the broker's backoff schedule; `SkipRetry` archives the task
/// immediately regardless of its retry budget; `Cancelled` records that the
/// handler observed its context being cancelled.
#[derive(Debug)]
pub enum HandlerError {
    Retry(anyhow::Error),
    SkipRetry(anyhow::Error),
    Cancelled,
}

impl HandlerError {
    pub fn skip_retry(msg: impl Into<String>) -> Self {
        HandlerError::SkipRetry(anyhow::anyhow!(msg.into()))
    }

    pub fn retry(msg: impl Into<String>) -> Self {
        HandlerError::Retry(anyhow::anyhow!(msg.into()))
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Retry(e) => write!(f, "{e}"),
            HandlerError::SkipRetry(e) => write!(f, "{e} (skip retry)"),
            HandlerError::Cancelled => f.write_str("task cancelled"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(e: anyhow::Error) -> Self {
        HandlerError::Retry(e)
    }
}

pub type ProcessResult = Result<(), HandlerError>;

/// Per-invocation context handed to a handler.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub queue: String,
    /// Number of times this task has already failed.
    pub retry_count: u32,
    pub max_retry: u32,
    /// Cancelled on task cancellation, timeout, or worker shutdown; handlers
    /// must observe it at every suspension point.
    pub cancel: CancellationToken,
}

/// A typed task processor.
///
/// Implementations are registered in a [`Registry`] and selected by
/// [`Self::kind`] at dispatch time.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The task kind this handler processes.
    fn kind(&self) -> &'static str;

    async fn process(&self, ctx: TaskContext, task: DequeuedTask) -> ProcessResult;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn anyhow_errors_default_to_retry() {
        let err: HandlerError = anyhow::anyhow!("transient").into();
        assert!(matches!(err, HandlerError::Retry(_)));
    }

    #[test]
    fn display_marks_skip_retry() {
        let err = HandlerError::skip_retry("bad payload");
        assert!(err.to_string().contains("skip retry"));
        assert_eq!(HandlerError::Cancelled.to_string(), "task cancelled");
    }
}
