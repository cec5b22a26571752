//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - `/health`, `/ready`, `/live` healthchecks at the root
//! - the task and progress API under `/api/v1`
//! - CORS and request-id middleware as the outermost layers

mod health;
mod progress;
mod tasks;

use std::sync::Arc;

use axum::middleware;
use axum::Router;
use tower::ServiceBuilder;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the API process.
pub fn build(state: AppState) -> Router {
    let api = Router::new().merge(tasks::router()).merge(progress::router());

    Router::new()
        .merge(health::router())
        .nest("/api/v1", api)
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer()))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(Arc::new(state))
}

/// Router for the worker's standalone health listener: healthchecks only.
pub fn build_health_only(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .with_state(Arc::new(state))
}
