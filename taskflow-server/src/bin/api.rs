//! taskflow api – HTTP entry point.
//!
//! Startup order:
//! 1. Load configuration from environment variables.
//! 2. Initialise structured tracing.
//! 3. Connect the Redis broker and verify it with a ping.
//! 4. Build the task service, progress subscriber, and router.
//! 5. Serve HTTP with graceful shutdown on SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use taskflow_core::broker::RedisBroker;
use taskflow_core::progress::Subscriber;

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
        addr = %cfg.http_addr(),
        "taskflow api starting"
    );

    let broker = Arc::new(
        RedisBroker::connect(&cfg.redis.addr, &cfg.redis.password, cfg.redis.db)
            .await
            .context("failed to connect to redis")?,
    );
    tokio::time::timeout(Duration::from_secs(5), broker.ping())
        .await
        .context("redis ping timed out")?
        .context("redis ping failed")?;

    let subscriber = Subscriber::new(broker.client(), broker.connection(), cfg.stream_options());
    let state = AppState {
        config: Arc::new(cfg.clone()),
        service: TaskService::new(Arc::clone(&broker)),
        broker,
        subscriber,
        clients: None,
    };

    let app = routes::build(state);
    let listener = tokio::net::TcpListener::bind(cfg.http_addr())
        .await
        .with_context(|| format!("failed to bind {}", cfg.http_addr()))?;
    info!(addr = %cfg.http_addr(), "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
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
