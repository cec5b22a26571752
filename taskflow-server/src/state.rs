//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use taskflow_core::broker::RedisBroker;
use taskflow_core::progress::Subscriber;
use taskflow_core::rpc::ClientManager;

use crate::config::Config;
use crate::service::TaskService;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broker: Arc<RedisBroker>,
    pub service: TaskService,
    pub subscriber: Subscriber,
    /// Present only in the worker's health server; the API process does not
    /// own executor clients.
    pub clients: Option<Arc<ClientManager>>,
}
