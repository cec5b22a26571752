//! taskflow worker – dispatch loop entry point.
//!
//! Startup order:
//! 1. Load configuration from environment variables.
//! 2. Initialise structured tracing.
//! 3. Connect the Redis broker and the progress publisher.
//! 4. Register handlers (demo always, grpc_task when services are enabled).
//! 5. Run the worker runtime, optionally with a standalone health listener.
//! 6. On SIGINT/SIGTERM, stop dequeuing, drain in-flight handlers, and close
//!    every executor client once.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use taskflow_core::broker::RedisBroker;
use taskflow_core::handlers::{DemoHandler, GrpcTaskHandler};
use taskflow_core::progress::{Publisher, Subscriber};
use taskflow_core::rpc::ClientManager;
use taskflow_core::worker::{Registry, WorkerConfig, WorkerRuntime};

use taskflow_server::config::Config;
use taskflow_server::routes;
use taskflow_server::service::TaskService;
use taskflow_server::state::AppState;
use taskflow_server::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();
    cfg.validate()?;

    telemetry::init(&cfg.logging);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %cfg.app.env,
        concurrency = cfg.worker.concurrency,
        "taskflow worker starting"
    );

    let broker = Arc::new(
        RedisBroker::connect(&cfg.redis.addr, &cfg.redis.password, cfg.redis.db)
            .await
            .context("failed to connect to redis")?,
    );
    let publisher = Publisher::new(broker.connection(), cfg.stream_options());

    let mut registry = Registry::new();
    registry.register(Arc::new(DemoHandler));

    let mut clients: Option<Arc<ClientManager>> = None;
    if cfg.grpc.enabled && !cfg.grpc.services.is_empty() {
        let manager = ClientManager::new(cfg.grpc.services.clone())
            .context("failed to create executor client manager")?;
        registry.register(Arc::new(GrpcTaskHandler::new(
            Arc::clone(&manager),
            cfg.grpc.defaults.clone(),
            publisher.clone(),
        )));
        info!(services = ?manager.services().await, "executor services initialized");
        clients = Some(manager);
    }

    let runtime = Arc::new(WorkerRuntime::new(
        broker.as_ref().clone(),
        Arc::new(registry),
        publisher.clone(),
        WorkerConfig {
            concurrency: cfg.worker.concurrency,
            queues: cfg.queues.as_vec(),
        },
    ));
    let shutdown = runtime.shutdown_token();
    let runtime_handle = tokio::spawn(Arc::clone(&runtime).run());

    // Standalone health listener for orchestrators probing the worker.
    if cfg.worker.health.enabled {
        let state = AppState {
            config: Arc::new(cfg.clone()),
            service: TaskService::new(Arc::clone(&broker)),
            subscriber: Subscriber::new(broker.client(), broker.connection(), cfg.stream_options()),
            broker: Arc::clone(&broker),
            clients: clients.clone(),
        };
        let app = routes::build_health_only(state);
        let addr = cfg.worker_health_addr();
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!(%addr, "worker health server listening");
                    if let Err(e) = axum::serve(listener, app).await {
                        warn!(error = %e, "worker health server exited");
                    }
                }
                Err(e) => warn!(%addr, error = %e, "failed to bind worker health server"),
            }
        });
    }

    shutdown_signal().await;
    info!("shutting down worker");
    shutdown.cancel();

    match runtime_handle.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "worker runtime task failed"),
    }

    if let Some(manager) = clients {
        manager.close().await;
    }
    info!("worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
