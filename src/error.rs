//! Error types for the agent discovery library

use std::io;
use thiserror::Error;

/// The primary error type for the agent-discovery crate
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A discovery datagram or message could not be parsed or built
    #[error("Malformed discovery message: {0}")]
    MalformedMessage(String),

    /// Encoding would exceed the UDP payload ceiling
    #[error("Message of {size} bytes is longer than maximum size of {max} bytes")]
    MessageTooLarge {
        /// Encoded size in bytes
        size: usize,
        /// Maximum allowed size in bytes
        max: usize,
    },

    /// No registered provider owns the resource
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A provider could not be reached
    #[error("Provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable {
        /// Name of the failing provider
        provider: String,
        /// Why the provider could not be reached
        reason: String,
    },

    /// A resource with the same identifier is already registered
    #[error("Resource already registered: {0}")]
    ResourceExists(String),

    /// The resource exists but has no such attribute
    #[error("No attribute '{attribute}' on resource {resource}")]
    AttributeNotFound {
        /// Identifier of the resource
        resource: String,
        /// Requested attribute name
        attribute: String,
    },

    /// An operation invoked on a resource failed
    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// A resource identifier or pattern could not be parsed
    #[error("Invalid resource identifier: {0}")]
    InvalidIdentifier(String),

    /// No provider with the given name is registered
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// A provider with the same name is already registered
    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    /// The primary provider cannot be removed
    #[error("Primary provider '{0}' cannot be unregistered")]
    PrimaryProvider(String),

    /// A change listener is not installed on the provider
    #[error("Listener not found: {0}")]
    ListenerNotFound(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network operation error
    #[error("Network error: {0}")]
    Network(String),

    /// Operation timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<config::ConfigError> for DiscoveryError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Fatal error requiring immediate attention
    Fatal,
    /// Error condition
    Error,
    /// Warning condition
    Warning,
    /// Informational message
    Info,
}

/// Common result type for library operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

impl DiscoveryError {
    /// Create a new malformed message error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Create a new resource not found error for an identifier
    pub fn resource_not_found<S: ToString>(id: S) -> Self {
        Self::ResourceNotFound(id.to_string())
    }

    /// Create a new provider unavailable error
    pub fn provider_unavailable<P: Into<String>, S: Into<String>>(provider: P, reason: S) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Create a new attribute not found error
    pub fn attribute_not_found<R: ToString, A: Into<String>>(resource: R, attribute: A) -> Self {
        Self::AttributeNotFound {
            resource: resource.to_string(),
            attribute: attribute.into(),
        }
    }

    /// Create a new invocation error
    pub fn invocation<S: Into<String>>(msg: S) -> Self {
        Self::Invocation(msg.into())
    }

    /// Create a new invalid identifier error
    pub fn invalid_identifier<S: Into<String>>(msg: S) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::ProviderUnavailable { .. }
        )
    }

    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration(_) | Self::MessageTooLarge { .. } => ErrorSeverity::Fatal,
            Self::ProviderUnavailable { .. } | Self::Io(_) => ErrorSeverity::Error,
            Self::Network(_) | Self::MalformedMessage(_) => ErrorSeverity::Warning,
            Self::Timeout(_) => ErrorSeverity::Info,
            _ => ErrorSeverity::Warning,
        }
    }
}
