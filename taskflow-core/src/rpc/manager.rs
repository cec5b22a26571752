//! Shared registry of managed executor clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use super::client::{ClientConfig, ManagedClient};

/// Health summary for one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub address: String,
    pub healthy: bool,
}

/// Thread-safe mapping from service name to its managed client.
///
/// Mutated only at startup or via explicit add/remove under the write lock;
/// request paths take the read lock.
#[derive(Debug)]
pub struct ClientManager {
    clients: RwLock<HashMap<String, Arc<ManagedClient>>>,
    closed: AtomicBool,
}

impl ClientManager {
    /// Create a manager with one client per configured service.
    ///
    /// Any construction failure tears down the clients created so far.
    pub fn new(configs: HashMap<String, ClientConfig>) -> anyhow::Result<Arc<Self>> {
        let mut clients: HashMap<String, Arc<ManagedClient>> = HashMap::with_capacity(configs.len());
        for (name, config) in configs {
            let client = match ManagedClient::connect(&name, config)
                .with_context(|| format!("failed to create client for {name}"))
            {
                Ok(client) => client,
                Err(e) => {
                    for created in clients.values() {
                        created.close();
                    }
                    return Err(e);
                }
            };
            info!(service = %name, address = %client.address(), "initialized executor client");
            clients.insert(name, client);
        }

        Ok(Arc::new(Self {
            clients: RwLock::new(clients),
            closed: AtomicBool::new(false),
        }))
    }

    pub async fn get(&self, service: &str) -> Option<Arc<ManagedClient>> {
        self.clients.read().await.get(service).cloned()
    }

    pub async fn has_service(&self, service: &str) -> bool {
        self.clients.read().await.contains_key(service)
    }

    pub async fn service_config(&self, service: &str) -> Option<ClientConfig> {
        self.clients
            .read()
            .await
            .get(service)
            .map(|c| c.config().clone())
    }

    /// Names of every registered service.
    pub async fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn unhealthy_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .clients
            .read()
            .await
            .iter()
            .filter(|(_, c)| !c.is_healthy())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Health snapshot across all services.
    pub async fn health_status(&self) -> Vec<ServiceHealth> {
        let mut out: Vec<ServiceHealth> = self
            .clients
            .read()
            .await
            .iter()
            .map(|(name, client)| ServiceHealth {
                name: name.clone(),
                address: client.address().to_owned(),
                healthy: client.is_healthy(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Register a new service at runtime.
    pub async fn add_client(&self, name: &str, config: ClientConfig) -> anyhow::Result<()> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(name) {
            anyhow::bail!("client {name} already exists");
        }
        let client = ManagedClient::connect(name, config)?;
        clients.insert(name.to_owned(), client);
        info!(service = %name, "added executor client");
        Ok(())
    }

    /// Remove and close a service's client.
    pub async fn remove_client(&self, name: &str) -> anyhow::Result<()> {
        let mut clients = self.clients.write().await;
        let client = clients
            .remove(name)
            .with_context(|| format!("client {name} not found"))?;
        client.close();
        info!(service = %name, "removed executor client");
        Ok(())
    }

    /// Close every client exactly once; later calls are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut clients = self.clients.write().await;
        for (_, client) in clients.drain() {
            client.close();
        }
        info!("closed all executor clients");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config(address: &str) -> ClientConfig {
        ClientConfig {
            address: address.to_owned(),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn lookup_and_listing() {
        let mut configs = HashMap::new();
        configs.insert("llm".to_owned(), config("127.0.0.1:50051"));
        configs.insert("data".to_owned(), config("127.0.0.1:50052"));
        let manager = ClientManager::new(configs).unwrap();

        assert!(manager.has_service("llm").await);
        assert!(!manager.has_service("missing").await);
        assert_eq!(manager.services().await, vec!["data", "llm"]);
        assert!(manager.get("data").await.is_some());
        manager.close().await;
    }

    #[tokio::test]
    async fn add_rejects_duplicates_and_remove_unknown_fails() {
        let manager = ClientManager::new(HashMap::new()).unwrap();
        manager
            .add_client("llm", config("127.0.0.1:50051"))
            .await
            .unwrap();
        assert!(manager.add_client("llm", config("127.0.0.1:50051")).await.is_err());
        assert!(manager.remove_client("other").await.is_err());
        manager.remove_client("llm").await.unwrap();
        assert!(!manager.has_service("llm").await);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut configs = HashMap::new();
        configs.insert("llm".to_owned(), config("127.0.0.1:50051"));
        let manager = ClientManager::new(configs).unwrap();
        manager.close().await;
        manager.close().await;
        assert!(manager.services().await.is_empty());
    }

    #[tokio::test]
    async fn construction_fails_on_invalid_service() {
        let mut configs = HashMap::new();
        configs.insert("bad".to_owned(), ClientConfig::default());
        assert!(ClientManager::new(configs).is_err());
    }
}
