//! Direct egress connector
//!
//! Traffic leaves through the host network unmodified. There is no session;
//! `connect`/`disconnect` are no-ops and the route list is empty.

use super::{Connector, ConnectorError, ConnectorHealth, ConnectorKind, EgressSpec, Route};
use async_trait::async_trait;

/// Connector for unrouted host-network egress
pub struct DirectConnector {
    http: reqwest::Client,
    echo_url: String,
}

impl DirectConnector {
    /// Create a direct connector using the shared HTTP client
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            echo_url: super::IP_ECHO_URL.to_string(),
        }
    }

    /// Override the address-echo endpoint (used by tests)
    #[allow(dead_code)]
    pub fn with_echo_url(mut self, echo_url: String) -> Self {
        self.echo_url = echo_url;
        self
    }
}

#[async_trait]
impl Connector for DirectConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Direct
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn status(&self) -> ConnectorHealth {
        match self.current_public_address().await {
            Ok(address) => ConnectorHealth {
                connected: true,
                healthy: true,
                detail: format!("egress via {}", address),
            },
            Err(e) => ConnectorHealth {
                connected: true,
                healthy: false,
                detail: e.to_string(),
            },
        }
    }

    async fn list_routes(&self) -> Result<Vec<Route>, ConnectorError> {
        Ok(Vec::new())
    }

    async fn current_public_address(&self) -> Result<String, ConnectorError> {
        let response = self
            .http
            .get(&self.echo_url)
            .send()
            .await
            .map_err(|e| ConnectorError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Unreachable(format!(
                "address echo returned {}",
                response.status()
            )));
        }

        let address = response
            .text()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

        Ok(address.trim().to_string())
    }

    async fn egress_spec(&self) -> Result<EgressSpec, ConnectorError> {
        Ok(EgressSpec { proxy_url: None })
    }
}
