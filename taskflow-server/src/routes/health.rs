//! Health / readiness / liveness endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

const PING_TIMEOUT: Duration = Duration::from_secs(3);

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
}

/// Component health overview: Redis plus every managed executor client.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let mut services: HashMap<String, &'static str> = HashMap::new();
    let mut healthy = true;

    let redis_ok = tokio::time::timeout(PING_TIMEOUT, state.broker.ping())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    services.insert("redis".to_owned(), if redis_ok { "healthy" } else { "unhealthy" });
    healthy &= redis_ok;

    if let Some(clients) = &state.clients {
        for svc in clients.health_status().await {
            let label = if svc.healthy { "healthy" } else { "unhealthy" };
            services.insert(format!("grpc:{}", svc.name), label);
            healthy &= svc.healthy;
        }
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "timestamp": Utc::now().to_rfc3339(),
            "services": services,
        })),
    )
}

/// Readiness: 503 while the broker is unreachable or any executor client is
/// unhealthy.
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let redis_ok = tokio::time::timeout(PING_TIMEOUT, state.broker.ping())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    if !redis_ok {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready", "reason": "redis unavailable"})),
        );
    }

    if let Some(clients) = &state.clients {
        if !clients.unhealthy_services().await.is_empty() {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not ready", "reason": "grpc services unavailable"})),
            );
        }
    }

    (StatusCode::OK, Json(json!({"status": "ready"})))
}

pub async fn live() -> Json<Value> {
    Json(json!({"status": "alive"}))
}
