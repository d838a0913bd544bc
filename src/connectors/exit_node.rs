//! Exit-node connector
//!
//! Session-based egress through a node advertised by an external provider
//! API. `connect` selects a route (the configured preference when present,
//! otherwise the first advertised node) and holds it as the session;
//! `disconnect` drops it. Route selection failures are reported to the
//! caller and never retried here.

use super::{Connector, ConnectorError, ConnectorHealth, ConnectorKind, EgressSpec, Route};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Node descriptor returned by the provider API
#[derive(Debug, Deserialize)]
struct ProviderNode {
    id: String,
    location: String,
    /// Proxy endpoint URL of the node, e.g. `socks5://203.0.113.7:1080`
    address: String,
}

/// Connector for provider-advertised exit nodes
pub struct ExitNodeConnector {
    api_url: String,
    access_token: String,
    preferred_route: Option<String>,
    http: reqwest::Client,
    session: RwLock<Option<Route>>,
}

impl ExitNodeConnector {
    /// Create an exit-node connector from its configuration
    pub fn new(
        api_url: String,
        access_token: String,
        preferred_route: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            api_url,
            access_token,
            preferred_route,
            http,
            session: RwLock::new(None),
        }
    }

    /// Fetch the advertised node list from the provider
    async fn fetch_nodes(&self) -> Result<Vec<Route>, ConnectorError> {
        let url = format!("{}/v1/nodes", self.api_url.trim_end_matches('/'));
        debug!(url = %url, "Fetching exit node list");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ConnectorError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Unreachable(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let nodes: Vec<ProviderNode> = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

        Ok(nodes
            .into_iter()
            .map(|n| Route {
                id: n.id,
                location: n.location,
                address: n.address,
            })
            .collect())
    }

    /// Probe the public address through the given node endpoint
    async fn probe_address(&self, node_address: &str) -> Result<String, ConnectorError> {
        let proxy = reqwest::Proxy::all(node_address)
            .map_err(|e| ConnectorError::InvalidResponse(format!("bad node address: {}", e)))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .build()
            .map_err(|e| ConnectorError::Unreachable(e.to_string()))?;

        let response = client
            .get(super::IP_ECHO_URL)
            .send()
            .await
            .map_err(|e| ConnectorError::Unreachable(e.to_string()))?;

        let address = response
            .text()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

        Ok(address.trim().to_string())
    }
}

#[async_trait]
impl Connector for ExitNodeConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::ExitNode
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        let routes = self.fetch_nodes().await?;

        let route = match &self.preferred_route {
            Some(preferred) => routes
                .into_iter()
                .find(|r| &r.id == preferred)
                .ok_or_else(|| {
                    ConnectorError::SessionFailed(format!(
                        "preferred route '{}' not advertised",
                        preferred
                    ))
                })?,
            None => routes
                .into_iter()
                .next()
                .ok_or_else(|| ConnectorError::SessionFailed("no routes advertised".to_string()))?,
        };

        info!(route_id = %route.id, location = %route.location, "Exit node session established");
        *self.session.write().await = Some(route);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        let mut session = self.session.write().await;
        if session.take().is_some() {
            info!("Exit node session dropped");
        }
        Ok(())
    }

    async fn status(&self) -> ConnectorHealth {
        let session = self.session.read().await.clone();
        match session {
            Some(route) => match self.probe_address(&route.address).await {
                Ok(address) => ConnectorHealth {
                    connected: true,
                    healthy: true,
                    detail: format!("egress via {} ({})", address, route.location),
                },
                Err(e) => ConnectorHealth {
                    connected: true,
                    healthy: false,
                    detail: e.to_string(),
                },
            },
            None => ConnectorHealth {
                connected: false,
                healthy: false,
                detail: "no active session".to_string(),
            },
        }
    }

    async fn list_routes(&self) -> Result<Vec<Route>, ConnectorError> {
        self.fetch_nodes().await
    }

    async fn current_public_address(&self) -> Result<String, ConnectorError> {
        let session = self.session.read().await.clone();
        let route = session.ok_or(ConnectorError::NoSession)?;
        self.probe_address(&route.address).await
    }

    async fn egress_spec(&self) -> Result<EgressSpec, ConnectorError> {
        let session = self.session.read().await.clone();
        let route = session.ok_or(ConnectorError::NoSession)?;
        Ok(EgressSpec {
            proxy_url: Some(route.address),
        })
    }
}
