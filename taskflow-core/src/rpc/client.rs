//! Managed client for one remote executor service.
//!
//! Owns a single long-lived channel with HTTP/2 keepalive, a background
//! health probe that maintains a liveness flag, bounded retries for unary
//! calls, and outbound metadata tagging every request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use super::errors::{is_retryable, RpcError};
use super::proto::task_executor_service_client::TaskExecutorServiceClient;
use super::proto::{
    execute_task_response, CancelTaskRequest, ExecuteTaskRequest, HealthCheckRequest, HealthStatus,
    Progress, TaskError, TaskResult,
};

/// Per-service client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: String,
    /// Default bound of a single remote stream; per-task options override it.
    pub timeout: Duration,
    pub health_check_interval: Duration,
    /// Retry bound for unary calls (cancel, health probes on demand).
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Bound of one health probe, independent of the probe interval.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One element of an executor response stream.
#[derive(Debug, Clone)]
pub enum ExecuteEvent {
    Progress(Progress),
    Result(TaskResult),
    Error(TaskError),
}

/// A long-lived connection to one executor service.
pub struct ManagedClient {
    name: String,
    config: ClientConfig,
    channel: Channel,
    healthy: AtomicBool,
    probe: CancellationToken,
}

impl std::fmt::Debug for ManagedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedClient")
            .field("name", &self.name)
            .field("address", &self.config.address)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

impl ManagedClient {
    /// Create the client and start its health probe loop.
    ///
    /// The channel connects lazily; the first probe settles the liveness
    /// flag.
    pub fn connect(name: &str, config: ClientConfig) -> anyhow::Result<std::sync::Arc<Self>> {
        if config.address.is_empty() {
            anyhow::bail!("service {name}: address is required");
        }

        let endpoint = Endpoint::from_shared(format!("http://{}", config.address))
            .with_context(|| format!("service {name}: invalid address {}", config.address))?
            .connect_timeout(Duration::from_secs(5))
            .http2_keep_alive_interval(Duration::from_secs(10))
            .keep_alive_timeout(Duration::from_secs(3))
            .keep_alive_while_idle(true);
        let channel = endpoint.connect_lazy();

        let client = std::sync::Arc::new(Self {
            name: name.to_owned(),
            config,
            channel,
            healthy: AtomicBool::new(true),
            probe: CancellationToken::new(),
        });

        client.clone().spawn_probe_loop();
        info!(service = %client.name, address = %client.config.address, "executor client created");
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Stop the health probe loop. Idempotent.
    pub fn close(&self) {
        self.probe.cancel();
        debug!(service = %self.name, "executor client closed");
    }

    fn spawn_probe_loop(self: std::sync::Arc<Self>) {
        let interval = self.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = self.probe.cancelled() => return,
                    _ = ticker.tick() => self.probe_once().await,
                }
            }
        });
    }

    async fn probe_once(&self) {
        let mut client = self.grpc();
        let request = self.request(HealthCheckRequest {});
        let result =
            tokio::time::timeout(PROBE_TIMEOUT, client.health_check(request)).await;

        let healthy = match result {
            Ok(Ok(resp)) => {
                let resp = resp.into_inner();
                let status = HealthStatus::try_from(resp.status).unwrap_or(HealthStatus::Unspecified);
                if status != HealthStatus::Healthy {
                    warn!(
                        service = %self.name,
                        status = status.as_str_name(),
                        message = %resp.message,
                        "service reported unhealthy"
                    );
                }
                status == HealthStatus::Healthy
            }
            Ok(Err(status)) => {
                warn!(service = %self.name, error = %status, "health check failed");
                false
            }
            Err(_) => {
                warn!(service = %self.name, "health check timed out");
                false
            }
        };
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    fn grpc(&self) -> TaskExecutorServiceClient<Channel> {
        TaskExecutorServiceClient::new(self.channel.clone())
    }

    /// Build a request tagged with the worker's outbound metadata.
    fn request<M>(&self, message: M) -> tonic::Request<M> {
        let mut request = tonic::Request::new(message);
        if let Ok(v) = MetadataValue::try_from("taskflow-worker") {
            request.metadata_mut().insert("x-client-name", v);
        }
        if let Ok(v) = MetadataValue::try_from(chrono::Utc::now().to_rfc3339()) {
            request.metadata_mut().insert("x-request-time", v);
        }
        request
    }

    /// Open the server-streamed execution call.
    ///
    /// Returns a lazy sequence of tagged events; transport failures surface
    /// as classified [`RpcError`]s in the stream.
    pub async fn execute_task(
        &self,
        req: ExecuteTaskRequest,
        timeout: Duration,
    ) -> Result<impl Stream<Item = Result<ExecuteEvent, RpcError>> + Send + 'static, RpcError>
    {
        let mut client = self.grpc();
        let mut request = self.request(req);
        request.set_timeout(timeout);

        debug!(service = %self.name, timeout_ms = timeout.as_millis() as u64, "opening execute stream");
        let stream = client
            .execute_task(request)
            .await
            .map_err(|s| RpcError::from_status(&s))?
            .into_inner();

        Ok(stream.filter_map(|msg| async move {
            match msg {
                Ok(resp) => resp.response.map(|r| {
                    Ok(match r {
                        execute_task_response::Response::Progress(p) => ExecuteEvent::Progress(p),
                        execute_task_response::Response::Result(r) => ExecuteEvent::Result(r),
                        execute_task_response::Response::Error(e) => ExecuteEvent::Error(e),
                    })
                }),
                Err(status) => Some(Err(RpcError::from_status(&status))),
            }
        }))
    }

    /// Ask the remote to cancel a running task. Bounded by 10s.
    pub async fn cancel_task(&self, task_id: &str, reason: &str) -> Result<(), RpcError> {
        let resp = self
            .retry_unary("CancelTask", || {
                let mut client = self.grpc();
                let mut request = self.request(CancelTaskRequest {
                    task_id: task_id.to_owned(),
                    reason: reason.to_owned(),
                });
                request.set_timeout(Duration::from_secs(10));
                async move { client.cancel_task(request).await.map(|r| r.into_inner()) }
            })
            .await?;

        if !resp.success {
            return Err(RpcError::application(
                "CANCEL_FAILED".to_owned(),
                resp.message,
                false,
            ));
        }
        Ok(())
    }

    /// One on-demand health check with the standard retry policy.
    pub async fn check_health(&self) -> Result<bool, RpcError> {
        let resp = self
            .retry_unary("HealthCheck", || {
                let mut client = self.grpc();
                let mut request = self.request(HealthCheckRequest {});
                request.set_timeout(PROBE_TIMEOUT);
                async move { client.health_check(request).await.map(|r| r.into_inner()) }
            })
            .await?;
        Ok(HealthStatus::try_from(resp.status) == Ok(HealthStatus::Healthy))
    }

    /// Retry a unary call up to `max_retries` times with a fixed delay,
    /// stopping early on non-retryable codes.
    async fn retry_unary<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, tonic::Status>>,
    {
        let mut last: Option<RpcError> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                warn!(
                    service = %self.name,
                    call = what,
                    attempt = attempt + 1,
                    max_attempts = self.config.max_retries + 1,
                    "retrying unary call"
                );
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match call().await {
                Ok(value) => return Ok(value),
                Err(status) => {
                    let err = RpcError::from_status(&status);
                    if !is_retryable(status.code()) {
                        return Err(err);
                    }
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| {
            RpcError::application("UNKNOWN".to_owned(), "no attempts made".to_owned(), true)
        }))
    }
}

impl Drop for ManagedClient {
    fn drop(&mut self) {
        self.probe.cancel();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_matches_contract() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.timeout, Duration::from_secs(300));
        assert_eq!(cfg.health_check_interval, Duration::from_secs(30));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn connect_rejects_empty_address() {
        let result = ManagedClient::connect("llm", ClientConfig::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn lazy_client_starts_healthy_until_probed() {
        let client = ManagedClient::connect(
            "llm",
            ClientConfig {
                address: "127.0.0.1:50051".to_owned(),
                ..ClientConfig::default()
            },
        )
        .unwrap();
        assert!(client.is_healthy());
        client.close();
    }
}
