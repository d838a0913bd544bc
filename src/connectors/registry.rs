//! Connector registry
//!
//! Owns the set of configured connectors. Each record pairs the persisted
//! metadata with the driver implementing the uniform capability surface, so
//! callers (the device lifecycle manager in particular) never branch on
//! connector kind.

use super::{
    Connector, ConnectorConfig, ConnectorHealth, ConnectorKind, DirectConnector, EgressSpec,
    ExitNodeConnector, Route, StaticProxyConnector,
};
use crate::error::AppError;
use crate::store::FleetStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Persisted connector metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorMeta {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Connector kind
    pub kind: ConnectorKind,
    /// Kind-specific configuration
    pub config: ConnectorConfig,
    /// Whether the connector may be attached and used
    pub enabled: bool,
    /// Last-known connectivity state
    pub connectivity: ConnectorHealth,
    /// Last observed public egress address
    pub public_address: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// A registered connector: metadata plus its driver
struct ConnectorRecord {
    meta: ConnectorMeta,
    driver: Arc<dyn Connector>,
}

/// Registry of configured connectors
///
/// One record per connector id. Many devices may reference one connector;
/// connector lifetime is independent of any device.
pub struct ConnectorRegistry {
    records: Arc<RwLock<HashMap<String, ConnectorRecord>>>,
    http: reqwest::Client,
    store: Arc<FleetStore>,
}

impl ConnectorRegistry {
    /// Create an empty registry
    pub fn new(http: reqwest::Client, store: Arc<FleetStore>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            http,
            store,
        }
    }

    /// Build the driver for a configuration
    fn build_driver(&self, config: &ConnectorConfig) -> Arc<dyn Connector> {
        match config {
            ConnectorConfig::Direct => Arc::new(DirectConnector::new(self.http.clone())),
            ConnectorConfig::StaticProxy {
                url,
                username,
                password,
            } => Arc::new(StaticProxyConnector::new(
                url.clone(),
                username.clone(),
                password.clone(),
            )),
            ConnectorConfig::ExitNode {
                api_url,
                access_token,
                preferred_route,
            } => Arc::new(ExitNodeConnector::new(
                api_url.clone(),
                access_token.clone(),
                preferred_route.clone(),
                self.http.clone(),
            )),
        }
    }

    /// Register a new connector in the disabled state
    pub async fn create(&self, name: String, config: ConnectorConfig) -> Result<ConnectorMeta, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidInput("connector name cannot be empty".to_string()));
        }

        let now = Utc::now();
        let meta = ConnectorMeta {
            id: Uuid::new_v4().to_string(),
            name,
            kind: config.kind(),
            config: config.clone(),
            enabled: false,
            connectivity: ConnectorHealth {
                connected: false,
                healthy: false,
                detail: "not yet checked".to_string(),
            },
            public_address: None,
            created_at: now,
            updated_at: now,
        };

        self.store.upsert_connector(&meta).await?;

        let driver = self.build_driver(&config);
        let mut records = self.records.write().await;
        records.insert(
            meta.id.clone(),
            ConnectorRecord {
                meta: meta.clone(),
                driver,
            },
        );

        info!(connector_id = %meta.id, kind = ?meta.kind, "Connector registered");
        Ok(meta)
    }

    /// Re-register a connector loaded from the store at boot
    pub async fn adopt(&self, meta: ConnectorMeta) {
        let driver = self.build_driver(&meta.config);
        let mut records = self.records.write().await;
        records.insert(meta.id.clone(), ConnectorRecord { meta, driver });
    }

    /// List all connector metadata, sorted by name
    pub async fn list(&self) -> Vec<ConnectorMeta> {
        let records = self.records.read().await;
        let mut metas: Vec<ConnectorMeta> = records.values().map(|r| r.meta.clone()).collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        metas
    }

    /// Get a connector's metadata
    pub async fn get(&self, id: &str) -> Result<ConnectorMeta, AppError> {
        let records = self.records.read().await;
        records
            .get(id)
            .map(|r| r.meta.clone())
            .ok_or_else(|| AppError::ConnectorNotFound(id.to_string()))
    }

    /// Whether the connector exists and is enabled
    pub async fn is_enabled(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.get(id).await?.enabled)
    }

    /// Replace a connector's configuration; only legal while disabled
    pub async fn configure(&self, id: &str, config: ConnectorConfig) -> Result<ConnectorMeta, AppError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| AppError::ConnectorNotFound(id.to_string()))?;

        if record.meta.enabled {
            return Err(AppError::InvalidState(
                "configuration may only be replaced while the connector is disabled".to_string(),
            ));
        }

        record.meta.kind = config.kind();
        record.meta.config = config.clone();
        record.meta.updated_at = Utc::now();
        record.driver = self.build_driver(&config);

        self.store.upsert_connector(&record.meta).await?;
        info!(connector_id = %id, kind = ?record.meta.kind, "Connector reconfigured");
        Ok(record.meta.clone())
    }

    /// Enable a connector for attachment and use
    pub async fn enable(&self, id: &str) -> Result<ConnectorMeta, AppError> {
        self.set_enabled(id, true).await
    }

    /// Disable a connector, dropping any session it holds
    pub async fn disable(&self, id: &str) -> Result<ConnectorMeta, AppError> {
        let driver = self.driver(id).await?;
        if let Err(e) = driver.disconnect().await {
            warn!(connector_id = %id, error = %e, "Disconnect during disable failed");
        }
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<ConnectorMeta, AppError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| AppError::ConnectorNotFound(id.to_string()))?;

        record.meta.enabled = enabled;
        record.meta.updated_at = Utc::now();
        if !enabled {
            record.meta.connectivity = ConnectorHealth {
                connected: false,
                healthy: false,
                detail: "disabled".to_string(),
            };
        }

        self.store.upsert_connector(&record.meta).await?;
        info!(connector_id = %id, enabled = enabled, "Connector enabled flag changed");
        Ok(record.meta.clone())
    }

    /// Establish a session; failures are reported, never retried here
    pub async fn connect(&self, id: &str) -> Result<(), AppError> {
        let meta = self.get(id).await?;
        if !meta.enabled {
            return Err(AppError::InvalidState(
                "connector must be enabled before connecting".to_string(),
            ));
        }
        let driver = self.driver(id).await?;
        driver.connect().await?;
        self.refresh_status(id).await?;
        Ok(())
    }

    /// Tear down the session, if any
    pub async fn disconnect(&self, id: &str) -> Result<(), AppError> {
        let driver = self.driver(id).await?;
        driver.disconnect().await?;
        self.refresh_status(id).await?;
        Ok(())
    }

    /// Live status check; records connectivity and observed public address
    pub async fn status(&self, id: &str) -> Result<ConnectorHealth, AppError> {
        self.refresh_status(id).await
    }

    /// Available egress routes of the connector
    pub async fn list_routes(&self, id: &str) -> Result<Vec<Route>, AppError> {
        let driver = self.driver(id).await?;
        Ok(driver.list_routes().await?)
    }

    /// The public address traffic currently egresses from
    pub async fn current_public_address(&self, id: &str) -> Result<String, AppError> {
        let driver = self.driver(id).await?;
        let address = driver.current_public_address().await?;

        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(id) {
            record.meta.public_address = Some(address.clone());
            record.meta.updated_at = Utc::now();
            self.store.upsert_connector(&record.meta).await?;
        }

        Ok(address)
    }

    /// Resolve the egress spec a starting device needs
    ///
    /// Called by the device lifecycle manager; the connector must be enabled.
    pub async fn resolve_egress(&self, id: &str) -> Result<EgressSpec, AppError> {
        let meta = self.get(id).await?;
        if !meta.enabled {
            return Err(AppError::InvalidState(format!(
                "connector '{}' is disabled",
                meta.name
            )));
        }
        let driver = self.driver(id).await?;
        Ok(driver.egress_spec().await?)
    }

    async fn driver(&self, id: &str) -> Result<Arc<dyn Connector>, AppError> {
        let records = self.records.read().await;
        records
            .get(id)
            .map(|r| r.driver.clone())
            .ok_or_else(|| AppError::ConnectorNotFound(id.to_string()))
    }

    async fn refresh_status(&self, id: &str) -> Result<ConnectorHealth, AppError> {
        let driver = self.driver(id).await?;
        let health = driver.status().await;

        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| AppError::ConnectorNotFound(id.to_string()))?;
        record.meta.connectivity = health.clone();
        record.meta.updated_at = Utc::now();
        self.store.upsert_connector(&record.meta).await?;

        Ok(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_registry() -> ConnectorRegistry {
        let store = Arc::new(FleetStore::in_memory().await.unwrap());
        ConnectorRegistry::new(reqwest::Client::new(), store)
    }

    #[tokio::test]
    async fn test_create_starts_disabled() {
        let registry = test_registry().await;
        let meta = registry
            .create("home-proxy".to_string(), ConnectorConfig::Direct)
            .await
            .unwrap();
        assert!(!meta.enabled);
        assert_eq!(meta.kind, ConnectorKind::Direct);
    }

    #[tokio::test]
    async fn test_configure_rejected_while_enabled() {
        let registry = test_registry().await;
        let meta = registry
            .create("proxy".to_string(), ConnectorConfig::Direct)
            .await
            .unwrap();
        registry.enable(&meta.id).await.unwrap();

        let result = registry
            .configure(
                &meta.id,
                ConnectorConfig::StaticProxy {
                    url: "http://proxy:3128".to_string(),
                    username: None,
                    password: None,
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_configure_while_disabled_changes_kind() {
        let registry = test_registry().await;
        let meta = registry
            .create("proxy".to_string(), ConnectorConfig::Direct)
            .await
            .unwrap();

        let updated = registry
            .configure(
                &meta.id,
                ConnectorConfig::StaticProxy {
                    url: "http://proxy:3128".to_string(),
                    username: None,
                    password: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.kind, ConnectorKind::StaticProxy);
    }

    #[tokio::test]
    async fn test_connect_requires_enabled() {
        let registry = test_registry().await;
        let meta = registry
            .create("proxy".to_string(), ConnectorConfig::Direct)
            .await
            .unwrap();
        let result = registry.connect(&meta.id).await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_resolve_egress_for_disabled_connector_fails() {
        let registry = test_registry().await;
        let meta = registry
            .create("proxy".to_string(), ConnectorConfig::Direct)
            .await
            .unwrap();
        let result = registry.resolve_egress(&meta.id).await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_unknown_connector_is_not_found() {
        let registry = test_registry().await;
        let result = registry.get("missing").await;
        assert!(matches!(result, Err(AppError::ConnectorNotFound(_))));
    }
}
