//! Type definitions for resource identifiers, patterns and server metadata

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Name of a manageable resource, e.g. `java.lang:type=Memory`
///
/// Identifiers consist of a domain and a non-empty set of key properties.
/// Two identifiers are equal when their domains and property sets are equal;
/// the order in which properties were written does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    domain: String,
    properties: BTreeMap<String, String>,
}

impl ResourceId {
    /// Parse an identifier of the form `domain:key=value[,key=value...]`
    pub fn new<S: AsRef<str>>(name: S) -> Result<Self> {
        let name = name.as_ref();
        let (domain, props) = name
            .split_once(':')
            .ok_or_else(|| DiscoveryError::invalid_identifier(format!("missing ':' in '{name}'")))?;

        if domain.is_empty() {
            return Err(DiscoveryError::invalid_identifier(format!("empty domain in '{name}'")));
        }
        if domain.contains(['*', '?']) {
            return Err(DiscoveryError::invalid_identifier(format!(
                "wildcards are only allowed in patterns: '{name}'"
            )));
        }

        let properties = parse_properties(name, props, false)?.0;
        if properties.is_empty() {
            return Err(DiscoveryError::invalid_identifier(format!(
                "no key properties in '{name}'"
            )));
        }

        Ok(Self {
            domain: domain.to_string(),
            properties,
        })
    }

    /// Build an identifier from a domain and key properties
    pub fn from_parts<D, I, K, V>(domain: D, properties: I) -> Result<Self>
    where
        D: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let domain = domain.into();
        let mut rendered = String::new();
        for (key, value) in properties {
            if !rendered.is_empty() {
                rendered.push(',');
            }
            rendered.push_str(&key.into());
            rendered.push('=');
            rendered.push_str(&value.into());
        }
        Self::new(format!("{domain}:{rendered}"))
    }

    /// Get the domain part
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get a single key property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Get all key properties, sorted by key
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

impl FromStr for ResourceId {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceId::new(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = DiscoveryError;

    fn try_from(value: String) -> Result<Self> {
        ResourceId::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.domain)?;
        write_properties(f, &self.properties)
    }
}

/// Pattern selecting resource identifiers
///
/// The domain and the listed property values may contain `*` (any run of
/// characters) and `?` (any single character). A property list ending in `*`
/// matches identifiers carrying at least the listed properties; `*:*` matches
/// everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePattern {
    domain: String,
    properties: BTreeMap<String, String>,
    property_list_pattern: bool,
}

impl ResourcePattern {
    /// Parse a pattern such as `test:*` or `jol*:type=one,*`
    pub fn new<S: AsRef<str>>(pattern: S) -> Result<Self> {
        let pattern = pattern.as_ref();
        let (domain, props) = pattern.split_once(':').ok_or_else(|| {
            DiscoveryError::invalid_identifier(format!("missing ':' in pattern '{pattern}'"))
        })?;

        if domain.is_empty() {
            return Err(DiscoveryError::invalid_identifier(format!(
                "empty domain in pattern '{pattern}'"
            )));
        }

        let (properties, property_list_pattern) = parse_properties(pattern, props, true)?;
        if properties.is_empty() && !property_list_pattern {
            return Err(DiscoveryError::invalid_identifier(format!(
                "no key properties in pattern '{pattern}'"
            )));
        }

        Ok(Self {
            domain: domain.to_string(),
            properties,
            property_list_pattern,
        })
    }

    /// Pattern matching every identifier
    pub fn all() -> Self {
        Self {
            domain: "*".to_string(),
            properties: BTreeMap::new(),
            property_list_pattern: true,
        }
    }

    /// Whether the pattern can match more than one identifier
    pub fn is_pattern(&self) -> bool {
        self.property_list_pattern
            || self.domain.contains(['*', '?'])
            || self.properties.values().any(|v| v.contains(['*', '?']))
    }

    /// Check whether an identifier is selected by this pattern
    pub fn matches(&self, id: &ResourceId) -> bool {
        if !wildcard_match(&self.domain, id.domain()) {
            return false;
        }

        let listed_match = self
            .properties
            .iter()
            .all(|(key, value)| id.property(key).is_some_and(|v| wildcard_match(value, v)));

        if self.property_list_pattern {
            listed_match
        } else {
            listed_match && id.properties().len() == self.properties.len()
        }
    }
}

impl FromStr for ResourcePattern {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        ResourcePattern::new(s)
    }
}

impl From<&ResourceId> for ResourcePattern {
    fn from(id: &ResourceId) -> Self {
        Self {
            domain: id.domain.clone(),
            properties: id.properties.clone(),
            property_list_pattern: false,
        }
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.domain)?;
        write_properties(f, &self.properties)?;
        if self.property_list_pattern {
            if self.properties.is_empty() {
                write!(f, "*")?;
            } else {
                write!(f, ",*")?;
            }
        }
        Ok(())
    }
}

/// Metadata about the server environment the agent runs in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Vendor of the detected container
    pub vendor: Option<String>,
    /// Product name of the detected container
    pub product: Option<String>,
    /// Version of the detected container
    pub version: Option<String>,
}

impl ServerInfo {
    /// Create empty server metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the vendor
    pub fn with_vendor<S: Into<String>>(mut self, vendor: S) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    /// Set the product
    pub fn with_product<S: Into<String>>(mut self, product: S) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Set the version
    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Whether no field is known
    pub fn is_empty(&self) -> bool {
        self.vendor.is_none() && self.product.is_none() && self.version.is_none()
    }
}

fn parse_properties(
    full: &str,
    props: &str,
    allow_pattern: bool,
) -> Result<(BTreeMap<String, String>, bool)> {
    let mut properties = BTreeMap::new();
    let mut list_pattern = false;

    for part in props.split(',') {
        if list_pattern {
            return Err(DiscoveryError::invalid_identifier(format!(
                "'*' must be the last key property in '{full}'"
            )));
        }
        if part == "*" && allow_pattern {
            list_pattern = true;
            continue;
        }

        let (key, value) = part.split_once('=').ok_or_else(|| {
            DiscoveryError::invalid_identifier(format!("key property without '=' in '{full}'"))
        })?;
        if key.is_empty() {
            return Err(DiscoveryError::invalid_identifier(format!("empty key in '{full}'")));
        }
        if !allow_pattern && value.contains(['*', '?']) {
            return Err(DiscoveryError::invalid_identifier(format!(
                "wildcards are only allowed in patterns: '{full}'"
            )));
        }
        if properties.insert(key.to_string(), value.to_string()).is_some() {
            return Err(DiscoveryError::invalid_identifier(format!(
                "duplicate key '{key}' in '{full}'"
            )));
        }
    }

    Ok((properties, list_pattern))
}

fn write_properties(f: &mut fmt::Formatter<'_>, properties: &BTreeMap<String, String>) -> fmt::Result {
    for (i, (key, value)) in properties.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{key}={value}")?;
    }
    Ok(())
}

/// Glob match supporting `*` and `?`
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, mark)) = backtrack {
            pi = star + 1;
            ti = mark + 1;
            backtrack = Some((star, mark + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id() -> Result<()> {
        let id = ResourceId::new("test:type=one,name=cache")?;
        assert_eq!(id.domain(), "test");
        assert_eq!(id.property("type"), Some("one"));
        assert_eq!(id.to_string(), "test:name=cache,type=one");
        Ok(())
    }

    #[test]
    fn test_resource_id_structural_equality() -> Result<()> {
        let a = ResourceId::new("test:type=update,id=1")?;
        let b = ResourceId::new("test:id=1,type=update")?;
        assert_eq!(a, b);
        assert_eq!(a, ResourceId::from_parts("test", [("id", "1"), ("type", "update")])?);
        Ok(())
    }

    #[test]
    fn test_invalid_resource_id() {
        assert!(ResourceId::new("").is_err());
        assert!(ResourceId::new("test").is_err());
        assert!(ResourceId::new(":type=one").is_err());
        assert!(ResourceId::new("test:").is_err());
        assert!(ResourceId::new("test:type").is_err());
        assert!(ResourceId::new("test:=one").is_err());
        assert!(ResourceId::new("test:type=one,type=two").is_err());
        assert!(ResourceId::new("te*t:type=one").is_err());
        assert!(ResourceId::new("test:type=on?").is_err());
        assert!(ResourceId::new("test:type=one,*").is_err());
    }

    #[test]
    fn test_resource_id_serde() -> Result<()> {
        let id = ResourceId::new("test:type=one")?;
        let json = serde_json::to_string(&id).map_err(|e| DiscoveryError::malformed(e.to_string()))?;
        assert_eq!(json, "\"test:type=one\"");
        let back: ResourceId =
            serde_json::from_str(&json).map_err(|e| DiscoveryError::malformed(e.to_string()))?;
        assert_eq!(back, id);
        Ok(())
    }

    #[test]
    fn test_pattern_matching() -> Result<()> {
        let one = ResourceId::new("test:type=one")?;
        let update = ResourceId::new("test:type=update,id=2")?;
        let memory = ResourceId::new("java.lang:type=Memory")?;

        let all = ResourcePattern::new("*:*")?;
        assert!(all.matches(&one) && all.matches(&update) && all.matches(&memory));
        assert_eq!(all, ResourcePattern::all());

        let test_domain = ResourcePattern::new("test:*")?;
        assert!(test_domain.matches(&one));
        assert!(!test_domain.matches(&memory));

        let updates = ResourcePattern::new("test:type=update,*")?;
        assert!(updates.matches(&update));
        assert!(!updates.matches(&one));

        let exact = ResourcePattern::new("test:type=one")?;
        assert!(!exact.is_pattern());
        assert!(exact.matches(&one));
        assert!(!exact.matches(&update));

        let glob = ResourcePattern::new("java.*:type=Mem?ry")?;
        assert!(glob.is_pattern());
        assert!(glob.matches(&memory));
        assert!(!glob.matches(&one));

        let values = ResourcePattern::new("test:type=up*,*")?;
        assert!(values.matches(&update));
        assert!(!values.matches(&one));
        assert!(!ResourcePattern::new("test:type=o?")?.matches(&one));
        Ok(())
    }

    #[test]
    fn test_pattern_display() -> Result<()> {
        assert_eq!(ResourcePattern::new("test:*")?.to_string(), "test:*");
        assert_eq!(ResourcePattern::new("test:type=a,*")?.to_string(), "test:type=a,*");
        assert!(ResourcePattern::new("test:*,type=a").is_err());
        Ok(())
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(wildcard_match("a*c", "abcbc"));
        assert!(!wildcard_match("a*d", "abc"));
        assert!(wildcard_match("a?c", "abc"));
    }

    #[test]
    fn test_server_info() {
        assert!(ServerInfo::new().is_empty());
        let info = ServerInfo::new().with_vendor("Apache").with_product("tomcat");
        assert_eq!(info.vendor.as_deref(), Some("Apache"));
        assert!(info.version.is_none());
        assert!(!info.is_empty());
    }
}
