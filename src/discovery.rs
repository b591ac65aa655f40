//! Discovery responder and requestor
//!
//! The responder answers multicast queries with a description of the local
//! agent. The requestor sends one query and gathers the responses that arrive
//! before its timeout.

use crate::{
    agent::{AgentDetails, DiscoveredAgent},
    config::DiscoveryConfig,
    error::{DiscoveryError, Result},
    message::DiscoveryMessage,
    registry::ResourceAggregator,
    transport::MulticastSocket,
    utils::time::duration_to_string,
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, trace, warn};

type ResponseLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const RECEIVE_BACKOFF_BASE: Duration = Duration::from_millis(50);
const RECEIVE_BACKOFF_MAX: Duration = Duration::from_secs(2);

#[cfg(feature = "metrics")]
fn count(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn count(_name: &'static str) {}

/// Delay before retrying after `failures` consecutive receive errors
fn receive_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(6);
    (RECEIVE_BACKOFF_BASE * 2u32.pow(exponent)).min(RECEIVE_BACKOFF_MAX)
}

/// Answers discovery queries for the local agent
pub struct DiscoveryResponder {
    details: AgentDetails,
    aggregator: Option<Arc<ResourceAggregator>>,
    limiter: Option<Arc<ResponseLimiter>>,
}

impl DiscoveryResponder {
    /// Create a responder advertising the agent described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        config.validate()?;

        let limiter = config
            .response_rate_limit()
            .and_then(NonZeroU32::new)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));

        Ok(Self {
            details: AgentDetails::from_config(config),
            aggregator: None,
            limiter,
        })
    }

    /// Report server metadata from `aggregator` in responses
    pub fn with_aggregator(mut self, aggregator: Arc<ResourceAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Replace the advertised agent facts
    pub fn with_details(mut self, details: AgentDetails) -> Self {
        self.details = details;
        self
    }

    /// Advertised agent facts
    pub fn details(&self) -> &AgentDetails {
        &self.details
    }

    /// Process one received datagram
    ///
    /// Returns the encoded response for a query and `None` for anything that
    /// needs no answer. Undecodable input is an error; the caller drops it.
    pub fn handle_incoming(&self, data: &[u8]) -> Result<Option<Vec<u8>>> {
        let message = DiscoveryMessage::from_bytes(data)?;
        if !message.is_query() {
            trace!("Ignoring {} message", message.kind());
            return Ok(None);
        }

        let server = self.aggregator.as_ref().and_then(|a| a.server_info());
        let response = DiscoveryMessage::response(self.details.to_payload(server.as_ref()))?;
        Ok(Some(response.into_data()))
    }

    /// Answer queries arriving on `socket` until `shutdown` fires
    pub async fn serve(
        &self,
        socket: &MulticastSocket,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("Discovery responder listening on {}", socket.local_addr()?);
        let mut failures: u32 = 0;

        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => break,
                received = socket.recv() => received,
            };

            match received {
                Ok((data, from)) => {
                    failures = 0;
                    self.answer(socket, &data, from).await;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = receive_backoff(failures);
                    warn!(
                        "Failed to receive discovery datagram ({} in a row, retrying in {}): {}",
                        failures,
                        duration_to_string(delay),
                        e
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Discovery responder stopped");
        Ok(())
    }

    async fn answer(&self, socket: &MulticastSocket, data: &[u8], from: SocketAddr) {
        count("discovery_datagrams_received");

        let reply = match self.handle_incoming(data) {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", from, e);
                count("discovery_datagrams_dropped");
                return;
            }
        };

        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                warn!("Response rate limit reached, not answering {}", from);
                count("discovery_datagrams_dropped");
                return;
            }
        }

        match socket.send_to(&reply, from).await {
            Ok(()) => {
                debug!("Answered discovery query from {}", from);
                count("discovery_queries_answered");
            }
            Err(e) => warn!("Failed to answer {}: {}", from, e),
        }
    }
}

/// Locates agents on the network
#[derive(Debug, Clone)]
pub struct DiscoveryRequestor {
    config: DiscoveryConfig,
}

impl DiscoveryRequestor {
    /// Create a requestor
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Query the multicast group and collect responses until the timeout
    pub async fn discover(&self) -> Result<Vec<DiscoveredAgent>> {
        let socket = MulticastSocket::bind_sender(&self.config)?;
        socket.send_to_group(DiscoveryMessage::query()?.data()).await?;
        self.collect(&socket, socket.group()).await
    }

    /// Query a single address and collect responses until the timeout
    pub async fn discover_at(&self, target: SocketAddr) -> Result<Vec<DiscoveredAgent>> {
        let local = match target {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = MulticastSocket::bind_unicast(local, &self.config)?;
        socket.send_to(DiscoveryMessage::query()?.data(), target).await?;
        self.collect(&socket, target).await
    }

    /// Gather responses to the query already sent to `target`
    async fn collect(
        &self,
        socket: &MulticastSocket,
        target: SocketAddr,
    ) -> Result<Vec<DiscoveredAgent>> {
        debug!(
            "Sent discovery query to {}, collecting responses for {}",
            target,
            duration_to_string(self.config.timeout())
        );

        let deadline = Instant::now() + self.config.timeout();
        let mut agents = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let (data, from) = match socket.recv_timeout(remaining).await {
                Ok(received) => received,
                Err(DiscoveryError::Timeout(_)) => break,
                Err(e) => {
                    debug!("Receive failed while collecting responses: {}", e);
                    continue;
                }
            };

            let message = match DiscoveryMessage::from_bytes(&data) {
                Ok(message) if message.is_response() => message,
                Ok(_) => {
                    trace!("Skipping query from {}", from);
                    continue;
                }
                Err(e) => {
                    debug!("Skipping malformed datagram from {}: {}", from, e);
                    continue;
                }
            };

            match DiscoveredAgent::from_message(&message, from) {
                Ok(agent) => {
                    debug!("Discovered agent at {:?} via {}", agent.url, from);
                    count("discovery_agents_found");
                    agents.push(agent);
                }
                Err(e) => debug!("Skipping response from {}: {}", from, e),
            }
        }

        info!("Discovery to {} found {} agents", target, agents.len());
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{MessageType, Payload},
        provider::local::LocalRegistry,
        types::ServerInfo,
    };

    fn configured() -> DiscoveryConfig {
        DiscoveryConfig::new()
            .with_agent_url("http://10.0.0.5:8778/agent")
            .with_secured(true)
    }

    #[test]
    fn test_query_answered() -> Result<()> {
        let responder = DiscoveryResponder::new(&configured())?;
        let reply = responder
            .handle_incoming(b"type:QUERY\n")?
            .expect("query must be answered");

        let message = DiscoveryMessage::from_bytes(&reply)?;
        assert_eq!(message.kind(), MessageType::Response);
        assert_eq!(message.url(), Some("http://10.0.0.5:8778/agent"));
        assert_eq!(message.confidence(), Some(100));
        assert_eq!(message.secured(), Some(true));
        assert_eq!(message.agent_version(), Some(env!("CARGO_PKG_VERSION")));
        assert!(message.get(&Payload::ServerVendor).is_none());
        Ok(())
    }

    #[test]
    fn test_response_ignored() -> Result<()> {
        let responder = DiscoveryResponder::new(&configured())?;
        assert!(responder.handle_incoming(b"type:RESPONSE\nURL:http://x\n")?.is_none());
        Ok(())
    }

    #[test]
    fn test_malformed_rejected() -> Result<()> {
        let responder = DiscoveryResponder::new(&configured())?;
        assert!(matches!(
            responder.handle_incoming(b"hello"),
            Err(DiscoveryError::MalformedMessage(_))
        ));
        Ok(())
    }

    #[test]
    fn test_server_info_from_aggregator() -> Result<()> {
        let primary = LocalRegistry::new("agent").with_server_info(
            ServerInfo::new()
                .with_vendor("Apache")
                .with_product("tomcat")
                .with_version("10.1"),
        );
        let aggregator = Arc::new(ResourceAggregator::with_primary(Arc::new(primary))?);
        let responder = DiscoveryResponder::new(&configured())?.with_aggregator(aggregator);

        let reply = responder.handle_incoming(b"type:QUERY\n")?.unwrap_or_default();
        let message = DiscoveryMessage::from_bytes(&reply)?;
        assert_eq!(message.get(&Payload::ServerVendor), Some("Apache"));
        assert_eq!(message.get(&Payload::ServerProduct), Some("tomcat"));
        assert_eq!(message.get(&Payload::ServerVersion), Some("10.1"));
        Ok(())
    }

    #[test]
    fn test_secondary_server_info_not_advertised() -> Result<()> {
        let primary = LocalRegistry::new("agent");
        let platform = LocalRegistry::new("platform")
            .with_server_info(ServerInfo::new().with_vendor("Other").with_product("platform"));
        let aggregator = Arc::new(ResourceAggregator::new(
            Arc::new(primary),
            [Arc::new(platform) as Arc<dyn crate::provider::RegistryProvider>],
        )?);
        let responder = DiscoveryResponder::new(&configured())?.with_aggregator(aggregator);

        let reply = responder.handle_incoming(b"type:QUERY\n")?.unwrap_or_default();
        let message = DiscoveryMessage::from_bytes(&reply)?;
        assert!(message.get(&Payload::ServerVendor).is_none());
        assert!(message.get(&Payload::ServerProduct).is_none());
        assert!(message.get(&Payload::ServerVersion).is_none());
        Ok(())
    }

    #[test]
    fn test_receive_backoff_grows_and_caps() {
        assert_eq!(receive_backoff(1), RECEIVE_BACKOFF_BASE);
        assert_eq!(receive_backoff(2), RECEIVE_BACKOFF_BASE * 2);
        assert!(receive_backoff(4) > receive_backoff(3));
        assert_eq!(receive_backoff(50), RECEIVE_BACKOFF_MAX);
        assert_eq!(receive_backoff(u32::MAX), RECEIVE_BACKOFF_MAX);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DiscoveryConfig::new().with_agent_url("::nope");
        assert!(DiscoveryResponder::new(&config).is_err());
        assert!(DiscoveryRequestor::new(config).is_err());
    }
}
