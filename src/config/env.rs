//! Environment overrides for [`DiscoveryConfig`]
//!
//! Every setting can be overridden with an `AGENT_DISCOVERY_` prefixed
//! variable, e.g. `AGENT_DISCOVERY_MULTICAST_PORT=24885` or
//! `AGENT_DISCOVERY_AGENT_URL=http://10.0.0.5:8778/agent`.

use super::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::{net::Ipv4Addr, time::Duration};
use tracing::debug;

/// Prefix of all recognised environment variables
pub const ENV_PREFIX: &str = "AGENT_DISCOVERY";

/// Overrides read from the environment; unset values leave the base untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    /// `AGENT_DISCOVERY_MULTICAST_GROUP`
    pub multicast_group: Option<String>,
    /// `AGENT_DISCOVERY_MULTICAST_PORT`
    pub multicast_port: Option<u16>,
    /// `AGENT_DISCOVERY_INTERFACE`
    pub interface: Option<String>,
    /// `AGENT_DISCOVERY_TIMEOUT_MS`
    pub timeout_ms: Option<u64>,
    /// `AGENT_DISCOVERY_MULTICAST_TTL`
    pub multicast_ttl: Option<u32>,
    /// `AGENT_DISCOVERY_AGENT_URL`
    pub agent_url: Option<String>,
    /// `AGENT_DISCOVERY_AGENT_PORT`
    pub agent_port: Option<u16>,
    /// `AGENT_DISCOVERY_AGENT_PATH`
    pub agent_path: Option<String>,
    /// `AGENT_DISCOVERY_SECURED`
    pub secured: Option<bool>,
    /// `AGENT_DISCOVERY_AGENT_VERSION`
    pub agent_version: Option<String>,
    /// `AGENT_DISCOVERY_RESPONSE_RATE_LIMIT`
    pub response_rate_limit: Option<u32>,
}

impl EnvSettings {
    /// Read overrides from the process environment
    pub fn load() -> Result<Self> {
        let source = Config::builder()
            .add_source(Self::environment())
            .build()?;
        Self::from_config(source)
    }

    /// Environment source for the `AGENT_DISCOVERY_` prefix
    ///
    /// Values stay strings so a version such as `2.0` is kept verbatim;
    /// numeric and boolean fields are converted during deserialization.
    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
    }

    /// Read overrides from an already assembled configuration source
    pub fn from_config(source: Config) -> Result<Self> {
        Ok(source.try_deserialize()?)
    }

    /// Apply the overrides to `base` and validate the result
    pub fn apply(&self, base: DiscoveryConfig) -> Result<DiscoveryConfig> {
        let mut config = base;

        if let Some(group) = &self.multicast_group {
            config = config.with_multicast_group(parse_addr("multicast_group", group)?);
        }
        if let Some(port) = self.multicast_port {
            config = config.with_multicast_port(port);
        }
        if let Some(interface) = &self.interface {
            config = config.with_interface(parse_addr("interface", interface)?);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(ttl) = self.multicast_ttl {
            config = config.with_multicast_ttl(ttl);
        }
        if let Some(url) = &self.agent_url {
            config = config.with_agent_url(url.clone());
        }
        if let Some(port) = self.agent_port {
            config = config.with_agent_port(port);
        }
        if let Some(path) = &self.agent_path {
            config = config.with_agent_path(path.clone());
        }
        if let Some(secured) = self.secured {
            config = config.with_secured(secured);
        }
        if let Some(version) = &self.agent_version {
            config = config.with_agent_version(version.clone());
        }
        if let Some(limit) = self.response_rate_limit {
            config = config.with_response_rate_limit(limit);
        }

        config.validate()?;
        debug!("Applied environment overrides: {:?}", self);
        Ok(config)
    }
}

impl DiscoveryConfig {
    /// Default configuration with `AGENT_DISCOVERY_*` overrides applied
    pub fn from_env() -> Result<Self> {
        EnvSettings::load()?.apply(Self::default())
    }
}

fn parse_addr(setting: &str, value: &str) -> Result<Ipv4Addr> {
    value.trim().parse().map_err(|_| {
        DiscoveryError::configuration(format!("{setting}: '{value}' is not an IPv4 address"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source() -> Result<()> {
        let settings = EnvSettings::from_config(Config::builder().build()?)?;
        assert_eq!(settings, EnvSettings::default());
        assert_eq!(settings.apply(DiscoveryConfig::default())?, DiscoveryConfig::default());
        Ok(())
    }

    #[test]
    fn test_overrides_applied() -> Result<()> {
        let source = Config::builder()
            .set_override("multicast_group", "239.192.0.101")?
            .set_override("multicast_port", 30000)?
            .set_override("timeout_ms", 250)?
            .set_override("agent_url", "http://10.0.0.5:8778/agent")?
            .set_override("secured", true)?
            .build()?;

        let config = EnvSettings::from_config(source)?.apply(DiscoveryConfig::default())?;
        assert_eq!(config.multicast_group(), Ipv4Addr::new(239, 192, 0, 101));
        assert_eq!(config.multicast_port(), 30000);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.agent_url(), Some("http://10.0.0.5:8778/agent"));
        assert_eq!(config.secured(), Some(true));
        Ok(())
    }

    #[test]
    fn test_environment_values_kept_verbatim() -> Result<()> {
        let vars = [
            ("AGENT_DISCOVERY_AGENT_VERSION", "2.0"),
            ("AGENT_DISCOVERY_MULTICAST_PORT", "24885"),
            ("AGENT_DISCOVERY_TIMEOUT_MS", "300"),
            ("AGENT_DISCOVERY_SECURED", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<config::Map<String, String>>();

        let source = Config::builder()
            .add_source(EnvSettings::environment().source(Some(vars)))
            .build()?;
        let settings = EnvSettings::from_config(source)?;
        assert_eq!(settings.agent_version.as_deref(), Some("2.0"));

        let config = settings.apply(DiscoveryConfig::default())?;
        assert_eq!(config.agent_version(), "2.0");
        assert_eq!(config.multicast_port(), 24885);
        assert_eq!(config.timeout(), Duration::from_millis(300));
        assert_eq!(config.secured(), Some(true));
        Ok(())
    }

    #[test]
    fn test_invalid_override_rejected() {
        let settings = EnvSettings {
            multicast_group: Some("10.0.0.1".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            settings.apply(DiscoveryConfig::default()),
            Err(DiscoveryError::Configuration(_))
        ));

        let settings = EnvSettings {
            interface: Some("eth0".to_string()),
            ..Default::default()
        };
        assert!(settings.apply(DiscoveryConfig::default()).is_err());
    }
}
