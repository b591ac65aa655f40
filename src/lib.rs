//! # Agent Discovery
//!
//! Discovery and resource aggregation for management agents.
//!
//! This crate provides two cooperating pieces:
//!
//! - a small UDP multicast protocol through which agents announce themselves
//!   and clients locate them, and
//! - a [`ResourceAggregator`] presenting several in-process resource
//!   registries as one, with strict priority rules on overlapping names.
//!
//! ## Features
//!
//! - Bounded text wire format with forward-compatible unknown fields
//! - Async responder and requestor using Tokio
//! - Lock-free reads of the provider list, monotonic change detection
//! - Per-provider failure isolation during bulk enumeration
//! - Rate-limited responses and optional `metrics` counters
//!
//! ## Aggregating registries
//!
//! ```rust
//! use agent_discovery::{
//!     provider::{RegistryProvider, local::{LocalRegistry, LocalResource}},
//!     registry::ResourceAggregator,
//!     types::ResourceId,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> agent_discovery::Result<()> {
//! let agent = LocalRegistry::new("agent");
//! let platform = LocalRegistry::new("platform");
//! let id = ResourceId::new("app:type=Cache")?;
//! agent.register(id.clone(), LocalResource::new().with_attribute("Size", json!(10)))?;
//! platform.register(id.clone(), LocalResource::new().with_attribute("Size", json!(99)))?;
//!
//! let aggregator = ResourceAggregator::new(
//!     Arc::new(agent),
//!     [Arc::new(platform) as Arc<dyn RegistryProvider>],
//! )?;
//!
//! // The primary registry wins on conflicting names
//! let size = aggregator.execute(&id, |conn, id, _| conn.get_attribute(id, "Size"), &[])?;
//! assert_eq!(size, json!(10));
//! # Ok(())
//! # }
//! ```
//!
//! ## Discovering agents
//!
//! ```rust,no_run
//! use agent_discovery::{DiscoveryConfig, DiscoveryRequestor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DiscoveryConfig::from_env()?.with_timeout(Duration::from_secs(2));
//!     let requestor = DiscoveryRequestor::new(config)?;
//!
//!     for agent in requestor.discover().await? {
//!         println!("{:?} (confidence {:?})", agent.url, agent.confidence);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Answering queries
//!
//! ```rust,no_run
//! use agent_discovery::{DiscoveryConfig, DiscoveryResponder, transport::MulticastSocket};
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DiscoveryConfig::new().with_agent_url("http://10.0.0.5:8778/agent");
//!     let responder = DiscoveryResponder::new(&config)?;
//!     let socket = MulticastSocket::bind_group(&config)?;
//!
//!     let (shutdown, rx) = broadcast::channel(1);
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         let _ = shutdown.send(());
//!     });
//!     responder.serve(&socket, rx).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod config;
pub mod discovery;
pub mod error;
pub mod message;
pub mod provider;
pub mod registry;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use agent::{AgentDetails, DiscoveredAgent};
pub use config::DiscoveryConfig;
pub use discovery::{DiscoveryRequestor, DiscoveryResponder};
pub use error::{DiscoveryError, Result};
pub use message::{DiscoveryMessage, MessageType, Payload};
pub use provider::{RegistryProvider, ResourceConnection};
pub use registry::{ErrorMode, ResourceAggregator};
pub use types::{ResourceId, ResourcePattern, ServerInfo};
