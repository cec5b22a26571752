//! Middleware wrappers composed around every handler invocation.
//!
//! The runtime nests them recovery → logging → timeout (outermost first):
//! recovery isolates panics, logging records start/end/duration/attempt, and
//! timeout bounds the handler to the task's own deadline.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{HandlerError, ProcessResult};

/// Isolate the handler in its own task so a panic archives the task instead
/// of taking the worker down. A panicking handler is a logic bug; it maps to
/// `SkipRetry`.
pub async fn with_recovery<F>(kind: &str, task_id: &str, fut: F) -> ProcessResult
where
    F: Future<Output = ProcessResult> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(join) if join.is_panic() => {
            error!(kind, task_id, "handler panicked");
            Err(HandlerError::skip_retry("handler panicked"))
        }
        Err(_) => Err(HandlerError::retry("handler task aborted")),
    }
}

/// Record start, end, duration, and attempt number around the handler.
pub async fn with_logging<F>(kind: String, task_id: String, attempt: u32, fut: F) -> ProcessResult
where
    F: Future<Output = ProcessResult>,
{
    let start = Instant::now();
    info!(kind = %kind, task_id = %task_id, attempt, "processing task");

    let result = fut.await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(()) => info!(kind = %kind, task_id = %task_id, duration_ms, "task completed"),
        Err(HandlerError::Cancelled) => {
            info!(kind = %kind, task_id = %task_id, duration_ms, "task cancelled")
        }
        Err(e) => error!(kind = %kind, task_id = %task_id, duration_ms, error = %e, "task failed"),
    }
    result
}

/// Bound the handler to `timeout`; on expiry, cancel its context and return
/// a retryable error.
pub async fn with_timeout<F>(timeout: Duration, cancel: CancellationToken, fut: F) -> ProcessResult
where
    F: Future<Output = ProcessResult>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            cancel.cancel();
            Err(HandlerError::retry(format!(
                "handler timed out after {}ms",
                timeout.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn recovery_converts_panics_to_skip_retry() {
        let result = with_recovery("demo", "t1", async { panic!("boom") }).await;
        assert!(matches!(result, Err(HandlerError::SkipRetry(_))));
    }

    #[tokio::test]
    async fn recovery_passes_results_through() {
        let ok = with_recovery("demo", "t1", async { Ok(()) }).await;
        assert!(ok.is_ok());

        let err = with_recovery("demo", "t1", async {
            Err(HandlerError::retry("transient"))
        })
        .await;
        assert!(matches!(err, Err(HandlerError::Retry(_))));
    }

    #[tokio::test]
    async fn timeout_cancels_context_and_retries() {
        let cancel = CancellationToken::new();
        let result = with_timeout(Duration::from_millis(10), cancel.clone(), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(HandlerError::Retry(_))));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn timeout_leaves_fast_handlers_alone() {
        let cancel = CancellationToken::new();
        let result = with_timeout(Duration::from_secs(5), cancel.clone(), async { Ok(()) }).await;
        assert!(result.is_ok());
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn logging_is_transparent() {
        let ok = with_logging("demo".into(), "t1".into(), 0, async { Ok(()) }).await;
        assert!(ok.is_ok());
        let err = with_logging("demo".into(), "t1".into(), 1, async {
            Err(HandlerError::Cancelled)
        })
        .await;
        assert!(matches!(err, Err(HandlerError::Cancelled)));
    }
}
