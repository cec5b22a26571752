//! The dispatch loop: weighted queue selection, bounded concurrency, retry
//! and archive transitions, cancellation fan-in, and graceful drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{retry_backoff, DequeuedTask, RedisBroker};
use crate::progress::{CompletionStatus, Publisher};

use super::{middleware, HandlerError, Registry, TaskContext};

/// How long the loop sleeps when every queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(500);
/// Interval of the scheduled/retry → pending mover.
const FORWARD_INTERVAL: Duration = Duration::from_secs(1);

/// Runtime tuning: concurrency limit and the weighted queue set.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of handlers executing in parallel.
    pub concurrency: usize,
    /// Queue names with their dispatch weights; heavier queues obtain
    /// proportionally more slots over time.
    pub queues: Vec<(String, u32)>,
}

/// Polls the broker and drives handlers to completion.
pub struct WorkerRuntime {
    broker: RedisBroker,
    registry: Arc<Registry>,
    publisher: Publisher,
    config: WorkerConfig,
    cancels: Arc<Mutex<HashMap<String, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl WorkerRuntime {
    pub fn new(
        broker: RedisBroker,
        registry: Arc<Registry>,
        publisher: Publisher,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            registry,
            publisher,
            config,
            cancels: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the dispatch loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown, then drain in-flight handlers.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            kinds = ?self.registry.kinds(),
            "worker runtime starting"
        );

        self.spawn_forwarder();
        self.spawn_cancel_listener().await?;

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            match self.next_task().await {
                Ok(Some(task)) => {
                    let runtime = Arc::clone(&self);
                    tokio::spawn(async move {
                        runtime.process(task).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, "dequeue failed, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        // Drain: wait until every permit is back.
        info!("worker draining in-flight tasks");
        let _ = semaphore
            .acquire_many(self.config.concurrency as u32)
            .await;
        info!("worker runtime stopped");
        Ok(())
    }

    /// Try each queue in weighted random order and lease the first hit.
    async fn next_task(&self) -> Result<Option<DequeuedTask>, crate::BrokerError> {
        // Draw the order before awaiting; the rng must not live across a
        // suspension point.
        let order = weighted_order(&self.config.queues, &mut rand::thread_rng());
        for queue in order {
            if let Some(task) = self.broker.dequeue(&queue).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    fn spawn_forwarder(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = runtime.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(FORWARD_INTERVAL) => {}
                }
                for (queue, _) in &runtime.config.queues {
                    if let Err(e) = runtime.broker.forward_due(queue).await {
                        warn!(%queue, error = %e, "failed to forward due tasks");
                    }
                }
            }
        });
    }

    async fn spawn_cancel_listener(self: &Arc<Self>) -> anyhow::Result<()> {
        let cancellations = self.broker.cancellations().await?;
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            tokio::pin!(cancellations);
            loop {
                let task_id = tokio::select! {
                    _ = runtime.shutdown.cancelled() => return,
                    msg = cancellations.next() => match msg {
                        Some(id) => id,
                        None => {
                            warn!("cancellation channel closed");
                            return;
                        }
                    },
                };
                if let Some(token) = runtime.cancels.lock().await.get(&task_id) {
                    info!(task_id = %task_id, "cancelling active task");
                    token.cancel();
                }
            }
        });
        Ok(())
    }

    /// Drive one task through the middleware chain and record the outcome.
    async fn process(&self, task: DequeuedTask) {
        let Some(handler) = self.registry.get(&task.kind) else {
            error!(kind = %task.kind, task_id = %task.id, "no handler registered");
            self.finish(
                &task,
                Err(HandlerError::skip_retry(format!(
                    "no handler for kind {}",
                    task.kind
                ))),
            )
            .await;
            return;
        };

        let cancel = CancellationToken::new();
        if task.cancel_requested {
            // Cancellation raced the dequeue; honor it immediately.
            cancel.cancel();
        }
        self.cancels
            .lock()
            .await
            .insert(task.id.clone(), cancel.clone());

        let ctx = TaskContext {
            task_id: task.id.clone(),
            queue: task.queue.clone(),
            retry_count: task.retried,
            max_retry: task.max_retries,
            cancel: cancel.clone(),
        };

        let kind = task.kind.clone();
        let inner = {
            let handler = Arc::clone(&handler);
            let ctx = ctx.clone();
            let task = task.clone();
            async move {
                let timeout = task.timeout;
                let attempt = ctx.retry_count;
                middleware::with_logging(
                    task.kind.clone(),
                    task.id.clone(),
                    attempt,
                    middleware::with_timeout(timeout, ctx.cancel.clone(), async move {
                        handler.process(ctx.clone(), task).await
                    }),
                )
                .await
            }
        };
        let result = middleware::with_recovery(&kind, &task.id, inner).await;

        self.cancels.lock().await.remove(&task.id);
        self.finish(&task, result).await;
    }

    /// Apply the broker transition for a handler outcome and, when the
    /// task's progress log has no terminal entry yet, publish one.
    async fn finish(&self, task: &DequeuedTask, result: Result<(), HandlerError>) {
        match result {
            Ok(()) => {
                if let Err(e) = self.broker.complete(&task.queue, &task.id).await {
                    error!(task_id = %task.id, error = %e, "failed to mark task completed");
                }
                self.finalize_progress(task, CompletionStatus::Completed, "task completed")
                    .await;
            }
            Err(HandlerError::Cancelled) => {
                if let Err(e) = self
                    .broker
                    .archive(&task.queue, &task.id, "task cancelled")
                    .await
                {
                    error!(task_id = %task.id, error = %e, "failed to archive cancelled task");
                }
                self.finalize_progress(task, CompletionStatus::Cancelled, "task cancelled")
                    .await;
            }
            Err(HandlerError::SkipRetry(cause)) => {
                let msg = cause.to_string();
                if let Err(e) = self.broker.archive(&task.queue, &task.id, &msg).await {
                    error!(task_id = %task.id, error = %e, "failed to archive task");
                }
                self.finalize_progress(task, CompletionStatus::Failed, &msg).await;
            }
            Err(HandlerError::Retry(cause)) => {
                let msg = cause.to_string();
                if task.retried < task.max_retries {
                    let delay = retry_backoff(task.retried);
                    debug!(
                        task_id = %task.id,
                        retried = task.retried,
                        delay_secs = delay.as_secs(),
                        "scheduling retry"
                    );
                    if let Err(e) = self.broker.retry(&task.queue, &task.id, &msg, delay).await {
                        error!(task_id = %task.id, error = %e, "failed to schedule retry");
                    }
                } else {
                    let msg = format!("retries exhausted: {msg}");
                    if let Err(e) = self.broker.archive(&task.queue, &task.id, &msg).await {
                        error!(task_id = %task.id, error = %e, "failed to archive task");
                    }
                    self.finalize_progress(task, CompletionStatus::Failed, &msg).await;
                }
            }
        }
    }

    /// Publish a synthetic terminal entry unless the handler already did.
    /// The log is observational; failures here never affect the task.
    async fn finalize_progress(&self, task: &DequeuedTask, status: CompletionStatus, message: &str) {
        match self.publisher.is_finalized(&task.id).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self
                    .publisher
                    .publish_completion(&task.id, status, message)
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "failed to publish completion");
                }
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "failed to inspect progress log");
            }
        }
    }
}

/// A weighted random permutation of the queue names: each position is drawn
/// from the remaining queues with probability proportional to its weight.
fn weighted_order<R: Rng>(queues: &[(String, u32)], rng: &mut R) -> Vec<String> {
    let mut remaining: Vec<(&str, u32)> = queues
        .iter()
        .map(|(name, weight)| (name.as_str(), (*weight).max(1)))
        .collect();
    let mut order = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let total: u64 = remaining.iter().map(|(_, w)| u64::from(*w)).sum();
        let roll = rng.gen_range(0..total);
        let idx = pick_index(&remaining, roll);
        order.push(remaining.remove(idx).0.to_owned());
    }
    order
}

/// Map a roll in `[0, sum(weights))` onto the index owning that slot.
fn pick_index(weighted: &[(&str, u32)], roll: u64) -> usize {
    let mut acc = 0u64;
    for (idx, (_, weight)) in weighted.iter().enumerate() {
        acc += u64::from(*weight);
        if roll < acc {
            return idx;
        }
    }
    weighted.len().saturating_sub(1)
}

#[cfg(test)]
mod test {
    use super::*;

    fn queues() -> Vec<(String, u32)> {
        vec![
            ("critical".to_owned(), 6),
            ("high".to_owned(), 3),
            ("default".to_owned(), 2),
            ("low".to_owned(), 1),
        ]
    }

    #[test]
    fn pick_index_respects_weight_boundaries() {
        let weighted = [("a", 6u32), ("b", 3), ("c", 1)];
        assert_eq!(pick_index(&weighted, 0), 0);
        assert_eq!(pick_index(&weighted, 5), 0);
        assert_eq!(pick_index(&weighted, 6), 1);
        assert_eq!(pick_index(&weighted, 8), 1);
        assert_eq!(pick_index(&weighted, 9), 2);
    }

    #[test]
    fn weighted_order_is_a_permutation() {
        let mut rng = rand::thread_rng();
        let order = weighted_order(&queues(), &mut rng);
        assert_eq!(order.len(), 4);
        for name in ["critical", "high", "default", "low"] {
            assert!(order.contains(&name.to_owned()), "missing {name}");
        }
    }

    #[test]
    fn heavier_queues_lead_more_often() {
        let mut rng = rand::thread_rng();
        let mut critical_first = 0;
        let mut low_first = 0;
        for _ in 0..2000 {
            let order = weighted_order(&queues(), &mut rng);
            match order[0].as_str() {
                "critical" => critical_first += 1,
                "low" => low_first += 1,
                _ => {}
            }
        }
        // critical holds 6/12 of the weight, low 1/12; even a generous margin
        // keeps this stable across seeds.
        assert!(critical_first > low_first * 2);
    }

    #[test]
    fn zero_weights_are_clamped() {
        let mut rng = rand::thread_rng();
        let order = weighted_order(&[("only".to_owned(), 0)], &mut rng);
        assert_eq!(order, vec!["only".to_owned()]);
    }
}
