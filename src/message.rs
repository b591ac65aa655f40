//! Discovery message codec
//!
//! A discovery message is a small UTF-8 text document sent as a single UDP
//! datagram:
//!
//! ```text
//! type:RESPONSE
//! URL:http://10.0.0.5:8778/agent
//! CONFIDENCE:100
//! VERSION:0.1.0
//! ```
//!
//! The first line carries the [`MessageType`]; every further line is one
//! `KEY:value` payload field. Fields are written in [`Payload`] declaration
//! order, followed by unrecognized keys in lexicographic order. Unrecognized
//! keys survive decoding untouched so that newer agents can add fields
//! without breaking older requestors.

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use tracing::trace;

/// Maximum size supported for a UDP discovery message
pub const MAX_MSG_SIZE: usize = 8972;

const TYPE_PREFIX: &str = "type:";

/// Type of a discovery message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Discovery query
    Query,
    /// Response to a discovery query
    Response,
}

impl MessageType {
    /// Wire token of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Query => "QUERY",
            MessageType::Response => "RESPONSE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "QUERY" => Ok(MessageType::Query),
            "RESPONSE" => Ok(MessageType::Response),
            other => Err(DiscoveryError::malformed(format!("unknown message type '{other}'"))),
        }
    }
}

/// Keys of the payload fields carried in a discovery message
///
/// The variant names are written literally on the wire. `Other` holds any key
/// this version does not know about and always sorts after the known keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Payload {
    /// Type of message, only ever written as the leading `type:` line
    Type,
    /// Agent URL as the agent sees itself
    Url,
    /// Heuristic certainty (0-100) that the URL is reachable
    Confidence,
    /// Whether authentication is required (0 or 1); absent when not known
    Secured,
    /// Vendor of the detected container
    ServerVendor,
    /// Product in which the agent is running
    ServerProduct,
    /// Version of the server
    ServerVersion,
    /// Agent version
    Version,
    /// Unrecognized key, stored upper-cased
    Other(String),
}

impl Payload {
    const KNOWN: [Payload; 8] = [
        Payload::Type,
        Payload::Url,
        Payload::Confidence,
        Payload::Secured,
        Payload::ServerVendor,
        Payload::ServerProduct,
        Payload::ServerVersion,
        Payload::Version,
    ];

    /// Map a wire key onto a payload key, case-insensitively
    pub fn from_key(key: &str) -> Result<Self> {
        let upper = key.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return Err(DiscoveryError::malformed("empty field key"));
        }
        if upper.contains([':', '\n', '\r']) {
            return Err(DiscoveryError::malformed(format!("invalid field key '{key}'")));
        }

        Ok(Self::KNOWN
            .into_iter()
            .find(|known| known.key() == upper)
            .unwrap_or(Payload::Other(upper)))
    }

    /// Upper-case key as written on the wire
    pub fn key(&self) -> &str {
        match self {
            Payload::Type => "TYPE",
            Payload::Url => "URL",
            Payload::Confidence => "CONFIDENCE",
            Payload::Secured => "SECURED",
            Payload::ServerVendor => "SERVER_VENDOR",
            Payload::ServerProduct => "SERVER_PRODUCT",
            Payload::ServerVersion => "SERVER_VERSION",
            Payload::Version => "VERSION",
            Payload::Other(key) => key,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A discovery query or response
///
/// Messages are validated when built: a message that exists always encodes
/// within [`MAX_MSG_SIZE`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMessage {
    kind: MessageType,
    payload: BTreeMap<Payload, String>,
    data: Vec<u8>,
}

impl DiscoveryMessage {
    /// Build a message, failing if it cannot be encoded
    pub fn new<I, V>(kind: MessageType, payload: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Payload, V)>,
        V: Into<String>,
    {
        let mut fields = BTreeMap::new();
        for (key, value) in payload {
            // Keys built by hand rather than through from_key need validating
            let key = match key {
                Payload::Other(name) => Payload::from_key(&name)?,
                key => key,
            };
            if key != Payload::Type {
                fields.insert(key, value.into());
            }
        }

        for value in fields.values() {
            if value.contains(['\n', '\r']) {
                return Err(DiscoveryError::malformed("field value contains a line break"));
            }
        }

        let data = encode(kind, &fields)?;
        Ok(Self {
            kind,
            payload: fields,
            data,
        })
    }

    /// Build a query message
    pub fn query() -> Result<Self> {
        Self::new(MessageType::Query, std::iter::empty::<(Payload, String)>())
    }

    /// Build a response message carrying the given fields
    pub fn response<I, V>(payload: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Payload, V)>,
        V: Into<String>,
    {
        Self::new(MessageType::Response, payload)
    }

    /// Decode a received datagram
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (kind, payload) = decode(data)?;
        Self::new(kind, payload)
    }

    /// Type of this message
    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Whether this message is a query
    pub fn is_query(&self) -> bool {
        self.kind == MessageType::Query
    }

    /// Whether this message is a response
    pub fn is_response(&self) -> bool {
        self.kind == MessageType::Response
    }

    /// Encoded form of this message
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the message, returning its encoded form
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// All payload fields
    pub fn payload(&self) -> &BTreeMap<Payload, String> {
        &self.payload
    }

    /// Raw value of a field
    pub fn get(&self, key: &Payload) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Agent URL
    pub fn url(&self) -> Option<&str> {
        self.get(&Payload::Url)
    }

    /// Confidence in the URL, if present and within 0-100
    pub fn confidence(&self) -> Option<u8> {
        self.get(&Payload::Confidence)
            .and_then(|value| value.trim().parse::<u8>().ok())
            .filter(|value| *value <= 100)
    }

    /// Whether the agent is secured; `None` when not known
    pub fn secured(&self) -> Option<bool> {
        match self.get(&Payload::Secured).map(str::trim) {
            Some("1") | Some("true") => Some(true),
            Some("0") | Some("false") => Some(false),
            _ => None,
        }
    }

    /// Agent version
    pub fn agent_version(&self) -> Option<&str> {
        self.get(&Payload::Version)
    }
}

/// Encode a message type and payload fields
///
/// A `TYPE` entry in `fields` is not written as a field line; the type is
/// always carried by the leading `type:` line.
pub fn encode(kind: MessageType, fields: &BTreeMap<Payload, String>) -> Result<Vec<u8>> {
    let mut out = String::with_capacity(64);
    out.push_str(TYPE_PREFIX);
    out.push_str(kind.as_str());
    out.push('\n');

    for (key, value) in fields {
        if *key == Payload::Type {
            continue;
        }
        out.push_str(key.key());
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }

    let data = out.into_bytes();
    if data.len() > MAX_MSG_SIZE {
        return Err(DiscoveryError::MessageTooLarge {
            size: data.len(),
            max: MAX_MSG_SIZE,
        });
    }
    Ok(data)
}

/// Decode a datagram into its message type and payload fields
pub fn decode(data: &[u8]) -> Result<(MessageType, BTreeMap<Payload, String>)> {
    if data.len() > MAX_MSG_SIZE {
        return Err(DiscoveryError::MessageTooLarge {
            size: data.len(),
            max: MAX_MSG_SIZE,
        });
    }

    let text = std::str::from_utf8(data)
        .map_err(|e| DiscoveryError::malformed(format!("message is not valid UTF-8: {e}")))?;

    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));

    let first = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| DiscoveryError::malformed("empty first line"))?;
    let kind = first
        .strip_prefix(TYPE_PREFIX)
        .ok_or_else(|| DiscoveryError::malformed(format!("missing 'type:' line, got '{first}'")))?
        .parse::<MessageType>()?;

    let mut fields = BTreeMap::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let Some((key, value)) = line.split_once(':') else {
            trace!("Skipping discovery line without separator: {}", line);
            continue;
        };
        let key = match Payload::from_key(key) {
            Ok(Payload::Type) => continue,
            Ok(key) => key,
            Err(e) => {
                trace!("Skipping discovery line with invalid key: {}", e);
                continue;
            }
        };
        fields.insert(key, value.to_string());
    }

    Ok((kind, fields))
}
