//! Network egress connectors
//!
//! A connector is a pluggable egress route a device can be attached to.
//! Every kind exposes the same capability surface through the [`Connector`]
//! trait, so the device lifecycle manager never branches on kind; new kinds
//! are additive.

mod direct;
mod exit_node;
mod registry;
mod static_proxy;

pub use direct::DirectConnector;
pub use exit_node::ExitNodeConnector;
pub use registry::{ConnectorMeta, ConnectorRegistry};
pub use static_proxy::StaticProxyConnector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Public address lookup service used for egress identity checks
pub(crate) const IP_ECHO_URL: &str = "https://api.ipify.org";

/// Connector kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    /// No routing; traffic leaves via the host network
    Direct,
    /// Fixed upstream HTTP/SOCKS proxy
    StaticProxy,
    /// Session-based routing through a provider-advertised exit node
    ExitNode,
}

/// Kind-specific connector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorConfig {
    /// Direct egress needs no parameters
    Direct,
    /// Static proxy parameters
    StaticProxy {
        /// Proxy URL, e.g. `http://host:port` or `socks5://host:port`
        url: String,
        /// Optional proxy username
        username: Option<String>,
        /// Optional proxy password
        password: Option<String>,
    },
    /// Exit-node provider parameters
    ExitNode {
        /// Provider API base URL
        api_url: String,
        /// Provider API access token
        access_token: String,
        /// Route to prefer when connecting, by route id
        preferred_route: Option<String>,
    },
}

impl ConnectorConfig {
    /// The kind this configuration belongs to
    pub fn kind(&self) -> ConnectorKind {
        match self {
            ConnectorConfig::Direct => ConnectorKind::Direct,
            ConnectorConfig::StaticProxy { .. } => ConnectorKind::StaticProxy,
            ConnectorConfig::ExitNode { .. } => ConnectorKind::ExitNode,
        }
    }
}

/// One available egress route advertised by a connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Route identifier, unique within the connector
    pub id: String,
    /// Human-readable location, e.g. a country or city
    pub location: String,
    /// Endpoint address traffic is routed through
    pub address: String,
}

/// Composite health report for a connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorHealth {
    /// Whether a session is established (always true for sessionless kinds)
    pub connected: bool,
    /// Whether the last egress check succeeded
    pub healthy: bool,
    /// Human-readable detail about the last check
    pub detail: String,
}

/// What a device start needs in order to route its traffic through a connector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EgressSpec {
    /// Proxy URL injected into the device container, `None` for direct egress
    pub proxy_url: Option<String>,
}

/// Errors surfaced by connector drivers
///
/// The registry reports these to the caller and never retries on its own.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The egress endpoint or provider API could not be reached
    #[error("Connector unreachable: {0}")]
    Unreachable(String),

    /// The provider rejected a session operation
    #[error("Session failed: {0}")]
    SessionFailed(String),

    /// The operation requires an established session
    #[error("No active session")]
    NoSession,

    /// The provider response could not be interpreted
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Uniform capability surface implemented by every connector kind
///
/// `connect`/`disconnect` are no-ops for kinds without a session concept.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The kind of this connector
    fn kind(&self) -> ConnectorKind;

    /// Establish a session (no-op for sessionless kinds)
    async fn connect(&self) -> Result<(), ConnectorError>;

    /// Tear down the session (no-op for sessionless kinds)
    async fn disconnect(&self) -> Result<(), ConnectorError>;

    /// Live health check; performs a real egress probe
    async fn status(&self) -> ConnectorHealth;

    /// Available egress routes; empty for static kinds
    async fn list_routes(&self) -> Result<Vec<Route>, ConnectorError>;

    /// The public address traffic currently egresses from
    async fn current_public_address(&self) -> Result<String, ConnectorError>;

    /// Resolve what a starting device needs to route through this connector
    async fn egress_spec(&self) -> Result<EgressSpec, ConnectorError>;
}

impl From<ConnectorError> for crate::error::AppError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::NoSession => {
                crate::error::AppError::InvalidState("connector has no active session".to_string())
            }
            other => crate::error::AppError::ExternalCollaborator(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_kind_mapping() {
        assert_eq!(ConnectorConfig::Direct.kind(), ConnectorKind::Direct);
        let proxy = ConnectorConfig::StaticProxy {
            url: "http://proxy:3128".to_string(),
            username: None,
            password: None,
        };
        assert_eq!(proxy.kind(), ConnectorKind::StaticProxy);
    }

    #[test]
    fn test_config_serde_tagging() {
        let json = r#"{"kind":"exit_node","api_url":"https://nodes.example","access_token":"t","preferred_route":null}"#;
        let config: ConnectorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind(), ConnectorKind::ExitNode);
    }

    #[test]
    fn test_no_session_maps_to_invalid_state() {
        let app_err: crate::error::AppError = ConnectorError::NoSession.into();
        assert!(matches!(app_err, crate::error::AppError::InvalidState(_)));
    }
}
