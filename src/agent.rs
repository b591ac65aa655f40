//! Agent records exchanged during discovery
//!
//! [`AgentDetails`] is what a responder advertises about the local agent,
//! [`DiscoveredAgent`] is what a requestor collects from each response.

use crate::{
    config::DiscoveryConfig,
    error::{DiscoveryError, Result},
    message::{DiscoveryMessage, Payload},
    types::ServerInfo,
    utils::network::guess_local_address,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use tracing::debug;

/// Confidence for a URL set explicitly in the configuration
pub const CONFIDENCE_CONFIGURED: u8 = 100;
/// Confidence for a URL built from a guessed interface address
pub const CONFIDENCE_GUESSED: u8 = 50;
/// Confidence for a URL that falls back to loopback
pub const CONFIDENCE_LOOPBACK: u8 = 10;

/// Facts the local agent advertises in discovery responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDetails {
    url: Option<String>,
    confidence: Option<u8>,
    secured: Option<bool>,
    version: String,
}

impl AgentDetails {
    /// Agent without a known URL
    pub fn new<S: Into<String>>(version: S) -> Self {
        Self {
            url: None,
            confidence: None,
            secured: None,
            version: version.into(),
        }
    }

    /// Derive the advertised facts from configuration
    ///
    /// A configured URL is trusted fully. Otherwise the URL is built from the
    /// first non-loopback interface address, or from loopback with a low
    /// confidence when no other interface exists.
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        let details = Self::new(config.agent_version());
        let details = match config.secured() {
            Some(secured) => details.with_secured(secured),
            None => details,
        };

        if let Some(url) = config.agent_url() {
            return details.with_url(url, CONFIDENCE_CONFIGURED);
        }

        let (address, confidence) = match guess_local_address() {
            Some(address) => (address, CONFIDENCE_GUESSED),
            None => {
                debug!("No routable interface found, advertising loopback");
                (IpAddr::V4(Ipv4Addr::LOCALHOST), CONFIDENCE_LOOPBACK)
            }
        };
        let scheme = if config.secured() == Some(true) { "https" } else { "http" };
        let url = format!(
            "{}://{}{}",
            scheme,
            SocketAddr::new(address, config.agent_port()),
            config.agent_path()
        );
        details.with_url(url, confidence)
    }

    /// Set the URL and the confidence in it; confidence is capped at 100
    pub fn with_url<S: Into<String>>(mut self, url: S, confidence: u8) -> Self {
        self.url = Some(url.into());
        self.confidence = Some(confidence.min(100));
        self
    }

    /// Set whether the URL requires authentication
    pub fn with_secured(mut self, secured: bool) -> Self {
        self.secured = Some(secured);
        self
    }

    /// Advertised URL
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Confidence in the advertised URL
    pub fn confidence(&self) -> Option<u8> {
        self.confidence
    }

    /// Whether the URL is secured, if known
    pub fn secured(&self) -> Option<bool> {
        self.secured
    }

    /// Agent version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Payload fields of a response describing this agent
    ///
    /// Unknown facts are left out rather than sent empty.
    pub fn to_payload(&self, server: Option<&ServerInfo>) -> Vec<(Payload, String)> {
        let mut fields = Vec::new();
        if let Some(url) = &self.url {
            fields.push((Payload::Url, url.clone()));
        }
        if let Some(confidence) = self.confidence {
            fields.push((Payload::Confidence, confidence.to_string()));
        }
        if let Some(secured) = self.secured {
            fields.push((Payload::Secured, if secured { "1" } else { "0" }.to_string()));
        }
        if let Some(server) = server {
            let known = [
                (Payload::ServerVendor, &server.vendor),
                (Payload::ServerProduct, &server.product),
                (Payload::ServerVersion, &server.version),
            ];
            for (key, value) in known {
                if let Some(value) = value {
                    fields.push((key, value.clone()));
                }
            }
        }
        fields.push((Payload::Version, self.version.clone()));
        fields
    }
}

/// An agent found by a discovery request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredAgent {
    /// Address the response came from
    pub source: SocketAddr,
    /// When the response was received
    pub discovered_at: DateTime<Utc>,
    /// Advertised agent URL
    pub url: Option<String>,
    /// Confidence in the URL (0-100)
    pub confidence: Option<u8>,
    /// Whether the URL is secured
    pub secured: Option<bool>,
    /// Server the agent runs in
    pub server: ServerInfo,
    /// Agent version
    pub agent_version: Option<String>,
    /// Fields this library does not interpret
    pub extra: BTreeMap<String, String>,
}

impl DiscoveredAgent {
    /// Build the record for a response received from `source`
    pub fn from_message(message: &DiscoveryMessage, source: SocketAddr) -> Result<Self> {
        if !message.is_response() {
            return Err(DiscoveryError::malformed(format!(
                "expected a response from {source}, got {}",
                message.kind()
            )));
        }

        let text = |key: Payload| message.get(&key).map(str::to_string);
        let extra = message
            .payload()
            .iter()
            .filter_map(|(key, value)| match key {
                Payload::Other(name) => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect();

        Ok(Self {
            source,
            discovered_at: Utc::now(),
            url: text(Payload::Url),
            confidence: message.confidence(),
            secured: message.secured(),
            server: ServerInfo {
                vendor: text(Payload::ServerVendor),
                product: text(Payload::ServerProduct),
                version: text(Payload::ServerVersion),
            },
            agent_version: text(Payload::Version),
            extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_url() {
        let config = DiscoveryConfig::new()
            .with_agent_url("http://10.0.0.5:8778/agent")
            .with_secured(false);
        let details = AgentDetails::from_config(&config);
        assert_eq!(details.url(), Some("http://10.0.0.5:8778/agent"));
        assert_eq!(details.confidence(), Some(CONFIDENCE_CONFIGURED));
        assert_eq!(details.secured(), Some(false));
        assert_eq!(details.version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_guessed_url() {
        let details = AgentDetails::from_config(&DiscoveryConfig::new().with_agent_port(9999));
        let url = details.url().unwrap_or_default();
        assert!(url.starts_with("http://"));
        assert!(url.ends_with(":9999/agent"));
        match details.confidence() {
            Some(CONFIDENCE_LOOPBACK) => assert!(url.contains("127.0.0.1")),
            Some(confidence) => assert_eq!(confidence, CONFIDENCE_GUESSED),
            None => panic!("guessed URL without confidence"),
        }
    }

    #[test]
    fn test_payload_omits_unknown() {
        let details = AgentDetails::new("1.2.3").with_url("http://a:1/agent", 250);
        let fields = details.to_payload(Some(&ServerInfo::new().with_product("tomcat")));
        assert_eq!(
            fields,
            vec![
                (Payload::Url, "http://a:1/agent".to_string()),
                (Payload::Confidence, "100".to_string()),
                (Payload::ServerProduct, "tomcat".to_string()),
                (Payload::Version, "1.2.3".to_string()),
            ]
        );
    }

    #[test]
    fn test_discovered_agent_from_response() -> Result<()> {
        let message = DiscoveryMessage::from_bytes(
            b"type:RESPONSE\nURL:http://10.0.0.5:8778/agent\nCONFIDENCE:50\nSECURED:1\n\
              SERVER_VENDOR:Apache\nVERSION:2.0.0\nX_ZONE:eu\n",
        )?;
        let source: SocketAddr = "10.0.0.5:40000".parse().unwrap();
        let agent = DiscoveredAgent::from_message(&message, source)?;

        assert_eq!(agent.source, source);
        assert_eq!(agent.url.as_deref(), Some("http://10.0.0.5:8778/agent"));
        assert_eq!(agent.confidence, Some(50));
        assert_eq!(agent.secured, Some(true));
        assert_eq!(agent.server.vendor.as_deref(), Some("Apache"));
        assert!(agent.server.product.is_none());
        assert_eq!(agent.agent_version.as_deref(), Some("2.0.0"));
        assert_eq!(agent.extra.get("X_ZONE").map(String::as_str), Some("eu"));
        Ok(())
    }

    #[test]
    fn test_query_is_not_an_agent() -> Result<()> {
        let source: SocketAddr = "10.0.0.5:40000".parse().unwrap();
        let err = DiscoveredAgent::from_message(&DiscoveryMessage::query()?, source).unwrap_err();
        assert!(matches!(err, DiscoveryError::MalformedMessage(_)));
        Ok(())
    }
}
