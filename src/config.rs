//! Configuration types for agent discovery

use crate::{
    error::{DiscoveryError, Result},
    utils::network::is_multicast_group,
};
use serde::{Deserialize, Serialize};
use std::{net::Ipv4Addr, time::Duration};
use url::Url;

pub mod env;

/// Default multicast group for discovery traffic
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 192, 0, 100);

/// Default UDP port for discovery traffic
pub const DEFAULT_MULTICAST_PORT: u16 = 24884;

/// Configuration for the discovery responder and requestor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Multicast group queries are sent to
    multicast_group: Ipv4Addr,
    /// UDP port of the group
    multicast_port: u16,
    /// Local interface address used to join the group
    interface: Option<Ipv4Addr>,
    /// How long a requestor collects responses
    timeout: Duration,
    /// Time-to-live of outgoing multicast queries
    multicast_ttl: u32,
    /// URL advertised by the responder; guessed when unset
    agent_url: Option<String>,
    /// Port of the agent endpoint, used when guessing the URL
    agent_port: u16,
    /// Path of the agent endpoint, used when guessing the URL
    agent_path: String,
    /// Whether the advertised URL requires authentication
    secured: Option<bool>,
    /// Agent version advertised in responses
    agent_version: String,
    /// Responses allowed per second; unlimited when unset
    response_rate_limit: Option<u32>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_port: DEFAULT_MULTICAST_PORT,
            interface: None,
            timeout: Duration::from_secs(1),
            multicast_ttl: 4,
            agent_url: None,
            agent_port: 8778,
            agent_path: "/agent".to_string(),
            secured: None,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            response_rate_limit: Some(20),
        }
    }
}

impl DiscoveryConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the multicast group
    pub fn with_multicast_group(mut self, group: Ipv4Addr) -> Self {
        self.multicast_group = group;
        self
    }

    /// Get the multicast group
    pub fn multicast_group(&self) -> Ipv4Addr {
        self.multicast_group
    }

    /// Set the discovery port
    pub fn with_multicast_port(mut self, port: u16) -> Self {
        self.multicast_port = port;
        self
    }

    /// Get the discovery port
    pub fn multicast_port(&self) -> u16 {
        self.multicast_port
    }

    /// Set the interface used for multicast
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Get the interface used for multicast
    pub fn interface(&self) -> Option<Ipv4Addr> {
        self.interface
    }

    /// Set the response collection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the response collection timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the multicast TTL
    pub fn with_multicast_ttl(mut self, ttl: u32) -> Self {
        self.multicast_ttl = ttl;
        self
    }

    /// Get the multicast TTL
    pub fn multicast_ttl(&self) -> u32 {
        self.multicast_ttl
    }

    /// Set the URL advertised by the responder
    pub fn with_agent_url<S: Into<String>>(mut self, url: S) -> Self {
        self.agent_url = Some(url.into());
        self
    }

    /// Get the configured agent URL
    pub fn agent_url(&self) -> Option<&str> {
        self.agent_url.as_deref()
    }

    /// Set the agent endpoint port
    pub fn with_agent_port(mut self, port: u16) -> Self {
        self.agent_port = port;
        self
    }

    /// Get the agent endpoint port
    pub fn agent_port(&self) -> u16 {
        self.agent_port
    }

    /// Set the agent endpoint path
    pub fn with_agent_path<S: Into<String>>(mut self, path: S) -> Self {
        self.agent_path = path.into();
        self
    }

    /// Get the agent endpoint path
    pub fn agent_path(&self) -> &str {
        &self.agent_path
    }

    /// Set whether the agent URL is secured
    pub fn with_secured(mut self, secured: bool) -> Self {
        self.secured = Some(secured);
        self
    }

    /// Whether the agent URL is secured, if known
    pub fn secured(&self) -> Option<bool> {
        self.secured
    }

    /// Set the advertised agent version
    pub fn with_agent_version<S: Into<String>>(mut self, version: S) -> Self {
        self.agent_version = version.into();
        self
    }

    /// Get the advertised agent version
    pub fn agent_version(&self) -> &str {
        &self.agent_version
    }

    /// Set the response rate limit per second
    pub fn with_response_rate_limit(mut self, per_second: u32) -> Self {
        self.response_rate_limit = Some(per_second);
        self
    }

    /// Remove the response rate limit
    pub fn without_response_rate_limit(mut self) -> Self {
        self.response_rate_limit = None;
        self
    }

    /// Get the response rate limit per second
    pub fn response_rate_limit(&self) -> Option<u32> {
        self.response_rate_limit
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !is_multicast_group(&self.multicast_group) {
            return Err(DiscoveryError::configuration(format!(
                "{} is not a multicast address",
                self.multicast_group
            )));
        }

        if self.multicast_port == 0 {
            return Err(DiscoveryError::configuration("Port must be greater than 0"));
        }

        if self.timeout.is_zero() {
            return Err(DiscoveryError::configuration("Timeout must be greater than 0"));
        }

        if self.multicast_ttl == 0 || self.multicast_ttl > 255 {
            return Err(DiscoveryError::configuration(
                "Multicast TTL must be between 1 and 255",
            ));
        }

        if let Some(url) = &self.agent_url {
            Url::parse(url).map_err(|e| {
                DiscoveryError::configuration(format!("Invalid agent URL '{url}': {e}"))
            })?;
        }

        if !self.agent_path.starts_with('/') {
            return Err(DiscoveryError::configuration(format!(
                "Agent path '{}' must start with '/'",
                self.agent_path
            )));
        }

        if self.agent_version.trim().is_empty() {
            return Err(DiscoveryError::configuration("Agent version must not be empty"));
        }

        if self.response_rate_limit == Some(0) {
            return Err(DiscoveryError::configuration(
                "Response rate limit must be greater than 0",
            ));
        }

        Ok(())
    }
}
