//! The `grpc_task` handler: delegates a task to a remote executor over a
//! server-streamed call, relaying progress into the task's log.
//!
//! The response stream is consumed as a state machine: any number of
//! `progress` variants, then exactly one terminal `result`. An `error`
//! variant or transport failure fails the task, classified into retry vs
//! archive by the central table in [`crate::rpc::errors`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::broker::DequeuedTask;
use crate::payload::{GrpcTaskOptions, GrpcTaskPayload};
use crate::progress::{Progress, Publisher};
use crate::rpc::proto::{json_map_to_struct, ExecuteTaskRequest, ExecutionOptions, TaskStatus};
use crate::rpc::{ClientConfig, ClientManager, ExecuteEvent, ManagedClient, RpcError};
use crate::task::TaskKind;
use crate::worker::{Handler, HandlerError, ProcessResult, TaskContext};

/// Last-resort bound when neither payload, service config, nor defaults name
/// a timeout.
const FLOOR_TIMEOUT: Duration = Duration::from_secs(300);

pub struct GrpcTaskHandler {
    manager: Arc<ClientManager>,
    defaults: ClientConfig,
    publisher: Publisher,
}

impl GrpcTaskHandler {
    pub fn new(manager: Arc<ClientManager>, defaults: ClientConfig, publisher: Publisher) -> Self {
        Self {
            manager,
            defaults,
            publisher,
        }
    }

    fn build_request(
        &self,
        ctx: &TaskContext,
        payload: &GrpcTaskPayload,
        timeout: Duration,
    ) -> ExecuteTaskRequest {
        let options = payload.options.clone().unwrap_or_default();
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("service".to_owned(), payload.service.clone());
        metadata.insert("queue".to_owned(), ctx.queue.clone());
        metadata.insert("retry_count".to_owned(), ctx.retry_count.to_string());
        metadata.insert("max_retry".to_owned(), ctx.max_retry.to_string());

        ExecuteTaskRequest {
            task_id: ctx.task_id.clone(),
            task_type: payload.method.clone(),
            payload: Some(json_map_to_struct(&payload.data)),
            metadata,
            options: Some(ExecutionOptions {
                timeout_ms: timeout.as_millis() as i64,
                enable_progress: options.enable_progress.unwrap_or(true),
                progress_interval_ms: options.progress_interval_ms.unwrap_or(1000) as i32,
            }),
        }
    }

    /// Publish one relayed progress report; failures are logged and
    /// swallowed because the log is observational.
    async fn relay_progress(&self, ctx: &TaskContext, progress: crate::rpc::proto::Progress) {
        let entry = Progress::new(
            ctx.task_id.clone(),
            progress.percentage,
            progress.stage,
            progress.message,
        );
        if let Err(e) = self.publisher.publish(&entry).await {
            warn!(task_id = %ctx.task_id, error = %e, "failed to publish relayed progress");
        }
    }

    /// Fire a best-effort remote cancellation without blocking the handler.
    fn cancel_remote(&self, client: Arc<ManagedClient>, task_id: String) {
        tokio::spawn(async move {
            if let Err(e) = client.cancel_task(&task_id, "task context cancelled").await {
                warn!(task_id = %task_id, error = %e, "remote cancel failed");
            }
        });
    }
}

#[async_trait]
impl Handler for GrpcTaskHandler {
    fn kind(&self) -> &'static str {
        TaskKind::GrpcTask.as_str()
    }

    async fn process(&self, ctx: TaskContext, task: DequeuedTask) -> ProcessResult {
        // Malformed or incomplete payloads can never succeed; archive.
        let payload: GrpcTaskPayload = match serde_json::from_slice(&task.payload) {
            Ok(p) => p,
            Err(e) => {
                error!(task_id = %ctx.task_id, error = %e, "failed to parse grpc_task payload");
                return Err(HandlerError::skip_retry(format!("invalid payload: {e}")));
            }
        };
        if let Err(e) = payload.validate() {
            error!(task_id = %ctx.task_id, error = %e, "invalid grpc_task payload");
            return Err(HandlerError::skip_retry(e));
        }

        let Some(client) = self.manager.get(&payload.service).await else {
            error!(task_id = %ctx.task_id, service = %payload.service, "unknown service");
            return Err(HandlerError::skip_retry(format!(
                "unknown service {}",
                payload.service
            )));
        };

        if !client.is_healthy() {
            warn!(task_id = %ctx.task_id, service = %payload.service, "service unhealthy, will retry");
            return Err(HandlerError::retry(format!(
                "service {} unavailable",
                payload.service
            )));
        }

        let timeout = resolve_timeout(
            payload.options.as_ref(),
            client.config().timeout,
            self.defaults.timeout,
        );
        let request = self.build_request(&ctx, &payload, timeout);

        let stream = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(HandlerError::Cancelled),
            opened = client.execute_task(request, timeout) => match opened {
                Ok(s) => s,
                Err(_) if ctx.cancel.is_cancelled() => return Err(HandlerError::Cancelled),
                Err(e) => return Err(classify(e)),
            },
        };
        tokio::pin!(stream);

        let mut result: Option<crate::rpc::proto::TaskResult> = None;
        loop {
            let event = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    // Dropping the stream aborts the call; tell the remote too.
                    self.cancel_remote(Arc::clone(&client), ctx.task_id.clone());
                    return Err(HandlerError::Cancelled);
                }
                event = stream.next() => event,
            };

            match event {
                None => break,
                Some(Ok(ExecuteEvent::Progress(progress))) => {
                    // Published before the next read so log backpressure
                    // throttles the remote naturally.
                    self.relay_progress(&ctx, progress).await;
                }
                Some(Ok(ExecuteEvent::Result(r))) => {
                    if result.is_some() {
                        warn!(task_id = %ctx.task_id, "duplicate result from executor");
                    }
                    result = Some(r);
                }
                Some(Ok(ExecuteEvent::Error(e))) => {
                    error!(
                        task_id = %ctx.task_id,
                        service = %payload.service,
                        code = %e.code,
                        message = %e.message,
                        retryable = e.retryable,
                        "executor reported error"
                    );
                    return Err(classify(RpcError::application(e.code, e.message, e.retryable)));
                }
                Some(Err(e)) => {
                    if ctx.cancel.is_cancelled() {
                        // Expected fallout of our own cancellation.
                        return Err(HandlerError::Cancelled);
                    }
                    error!(
                        task_id = %ctx.task_id,
                        service = %payload.service,
                        code = %e.code,
                        retryable = e.retryable,
                        "stream error"
                    );
                    return Err(classify(e));
                }
            }
        }

        let Some(result) = result else {
            return Err(HandlerError::retry("no result received from stream"));
        };

        let status = TaskStatus::try_from(result.status).unwrap_or(TaskStatus::Unspecified);
        info!(
            task_id = %ctx.task_id,
            service = %payload.service,
            status = status.as_str_name(),
            duration_ms = result.duration_ms,
            "executor result received"
        );

        match status {
            TaskStatus::Completed => Ok(()),
            TaskStatus::Cancelled => Err(HandlerError::retry("task cancelled on executor service")),
            _ => Err(HandlerError::retry("task failed on executor service")),
        }
    }
}

/// Timeout precedence: payload option > per-service config > global default
/// > 300s floor.
fn resolve_timeout(
    options: Option<&GrpcTaskOptions>,
    service_timeout: Duration,
    default_timeout: Duration,
) -> Duration {
    if let Some(ms) = options.and_then(|o| o.timeout_ms) {
        if ms > 0 {
            return Duration::from_millis(ms);
        }
    }
    if !service_timeout.is_zero() {
        return service_timeout;
    }
    if !default_timeout.is_zero() {
        return default_timeout;
    }
    FLOOR_TIMEOUT
}

/// Map a classified executor error onto the retry policy.
fn classify(err: RpcError) -> HandlerError {
    let cause = anyhow::anyhow!("{}: {}", err.code, err.message);
    if err.retryable {
        HandlerError::Retry(cause)
    } else {
        HandlerError::SkipRetry(cause)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timeout_prefers_payload_option() {
        let opts = GrpcTaskOptions {
            timeout_ms: Some(7000),
            ..GrpcTaskOptions::default()
        };
        assert_eq!(
            resolve_timeout(Some(&opts), Duration::from_secs(60), Duration::from_secs(120)),
            Duration::from_millis(7000)
        );
    }

    #[test]
    fn timeout_falls_back_through_service_then_defaults() {
        assert_eq!(
            resolve_timeout(None, Duration::from_secs(60), Duration::from_secs(120)),
            Duration::from_secs(60)
        );
        assert_eq!(
            resolve_timeout(None, Duration::ZERO, Duration::from_secs(120)),
            Duration::from_secs(120)
        );
        assert_eq!(
            resolve_timeout(None, Duration::ZERO, Duration::ZERO),
            FLOOR_TIMEOUT
        );
    }

    #[test]
    fn zero_payload_timeout_is_ignored() {
        let opts = GrpcTaskOptions {
            timeout_ms: Some(0),
            ..GrpcTaskOptions::default()
        };
        assert_eq!(
            resolve_timeout(Some(&opts), Duration::from_secs(60), Duration::ZERO),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn classification_follows_retryable_flag() {
        let retry = classify(RpcError::application(
            "UNAVAILABLE".into(),
            "down".into(),
            true,
        ));
        assert!(matches!(retry, HandlerError::Retry(_)));

        let skip = classify(RpcError::application(
            "INVALID_ARGUMENT".into(),
            "bad".into(),
            false,
        ));
        assert!(matches!(skip, HandlerError::SkipRetry(_)));
    }
}
