//! Utility functions for the agent-discovery library

use std::{
    net::{IpAddr, Ipv4Addr},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::debug;

/// Network utility functions
pub mod network {
    use super::*;

    /// Pick the address other hosts are most likely to reach this agent on
    ///
    /// Returns the first non-loopback IPv4 address of a local interface, or
    /// `None` when only loopback is available.
    pub fn guess_local_address() -> Option<IpAddr> {
        match local_ip_address::local_ip() {
            Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => return Some(ip),
            Ok(ip) => debug!("Default route address {} not usable", ip),
            Err(e) => debug!("Failed to look up default route address: {}", e),
        }

        let interfaces = match local_ip_address::list_afinet_netifas() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!("Failed to list network interfaces: {}", e);
                return None;
            }
        };

        interfaces
            .into_iter()
            .map(|(_, ip)| ip)
            .find(|ip| ip.is_ipv4() && !ip.is_loopback() && !ip.is_unspecified())
    }

    /// Check if an address can be used as a multicast group
    pub fn is_multicast_group(addr: &Ipv4Addr) -> bool {
        addr.is_multicast()
    }
}

/// Time utility functions
pub mod time {
    use super::*;

    /// Get current timestamp as seconds since Unix epoch
    ///
    /// This is the granularity used for resource change detection.
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    /// Convert duration to human-readable string
    pub fn duration_to_string(duration: Duration) -> String {
        let total_secs = duration.as_secs();
        let minutes = total_secs / 60;
        let seconds = total_secs % 60;
        let millis = duration.subsec_millis();

        if minutes > 0 {
            format!("{minutes}m {seconds}s")
        } else if seconds > 0 {
            format!("{seconds}.{millis:03}s")
        } else {
            format!("{}ms", duration.as_millis())
        }
    }
}
