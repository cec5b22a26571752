//! Demo handler: simulates stepped work to exercise the engine end-to-end.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::broker::DequeuedTask;
use crate::payload::DemoPayload;
use crate::task::TaskKind;
use crate::worker::{Handler, HandlerError, ProcessResult, TaskContext};

pub struct DemoHandler;

#[async_trait]
impl Handler for DemoHandler {
    fn kind(&self) -> &'static str {
        TaskKind::Demo.as_str()
    }

    async fn process(&self, ctx: TaskContext, task: DequeuedTask) -> ProcessResult {
        let payload: DemoPayload = serde_json::from_slice(&task.payload)
            .map_err(|e| HandlerError::Retry(anyhow::anyhow!("invalid demo payload: {e}")))?;

        info!(
            task_id = %ctx.task_id,
            queue = %ctx.queue,
            message = %payload.message,
            count = payload.count,
            attempt = ctx.retry_count,
            max_retry = ctx.max_retry,
            "demo task started"
        );

        for step in 1..=payload.count {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    warn!(task_id = %ctx.task_id, step, "demo task cancelled");
                    return Err(HandlerError::Cancelled);
                }
                _ = tokio::time::sleep(Duration::from_millis(500)) => {
                    info!(task_id = %ctx.task_id, step, total = payload.count, "processing step");
                }
            }
        }

        info!(task_id = %ctx.task_id, "demo task completed");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    fn task(payload: &str) -> DequeuedTask {
        DequeuedTask {
            id: "t1".to_owned(),
            queue: "default".to_owned(),
            kind: "demo".to_owned(),
            payload: payload.as_bytes().to_vec(),
            max_retries: 3,
            retried: 0,
            timeout: Duration::from_secs(60),
            metadata: HashMap::new(),
            cancel_requested: false,
        }
    }

    fn ctx() -> TaskContext {
        TaskContext {
            task_id: "t1".to_owned(),
            queue: "default".to_owned(),
            retry_count: 0,
            max_retry: 3,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn completes_with_zero_steps() {
        let result = DemoHandler.process(ctx(), task(r#"{"message":"hi"}"#)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_malformed_payload() {
        let result = DemoHandler.process(ctx(), task("not json")).await;
        assert!(matches!(result, Err(HandlerError::Retry(_))));
    }

    #[tokio::test]
    async fn observes_cancellation_between_steps() {
        let ctx = ctx();
        ctx.cancel.cancel();
        let result = DemoHandler
            .process(ctx, task(r#"{"message":"hi","count":3}"#))
            .await;
        assert!(matches!(result, Err(HandlerError::Cancelled)));
    }
}
