//! UDP transport for discovery datagrams

use crate::{
    config::DiscoveryConfig,
    error::{DiscoveryError, Result},
    message::MAX_MSG_SIZE,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};
use tokio::{net::UdpSocket, time::timeout};
use tracing::{debug, trace};

/// Async UDP socket used by the responder and the requestor
#[derive(Debug)]
pub struct MulticastSocket {
    socket: UdpSocket,
    group: SocketAddr,
}

impl MulticastSocket {
    /// Bind to the configured port and join the multicast group
    ///
    /// This is the socket a responder listens on.
    pub fn bind_group(config: &DiscoveryConfig) -> Result<Self> {
        let group = config.multicast_group();
        let interface = config.interface().unwrap_or(Ipv4Addr::UNSPECIFIED);

        let socket = new_socket()?;
        socket
            .set_reuse_address(true)
            .map_err(|e| DiscoveryError::network(format!("Failed to set SO_REUSEADDR: {e}")))?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.multicast_port());
        socket
            .bind(&bind_addr.into())
            .map_err(|e| DiscoveryError::network(format!("Failed to bind {bind_addr}: {e}")))?;
        socket.join_multicast_v4(&group, &interface).map_err(|e| {
            DiscoveryError::network(format!("Failed to join {group} on {interface}: {e}"))
        })?;
        debug!("Joined multicast group {} on {}", group, interface);

        Self::from_socket(socket, config)
    }

    /// Bind an ephemeral port for sending queries to the group
    pub fn bind_sender(config: &DiscoveryConfig) -> Result<Self> {
        let socket = new_socket()?;
        socket
            .set_multicast_ttl_v4(config.multicast_ttl())
            .map_err(|e| DiscoveryError::network(format!("Failed to set multicast TTL: {e}")))?;
        if let Some(interface) = config.interface() {
            socket.set_multicast_if_v4(&interface).map_err(|e| {
                DiscoveryError::network(format!("Failed to select interface {interface}: {e}"))
            })?;
        }
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| DiscoveryError::network(format!("Failed to bind {bind_addr}: {e}")))?;

        Self::from_socket(socket, config)
    }

    /// Bind a plain unicast socket, without any group membership
    pub fn bind_unicast(addr: SocketAddr, config: &DiscoveryConfig) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| DiscoveryError::network(format!("Failed to create socket: {e}")))?;
        socket
            .bind(&addr.into())
            .map_err(|e| DiscoveryError::network(format!("Failed to bind {addr}: {e}")))?;

        Self::from_socket(socket, config)
    }

    fn from_socket(socket: Socket, config: &DiscoveryConfig) -> Result<Self> {
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;
        let group = SocketAddr::V4(SocketAddrV4::new(
            config.multicast_group(),
            config.multicast_port(),
        ));
        Ok(Self { socket, group })
    }

    /// Address of the discovery group this socket belongs to
    pub fn group(&self) -> SocketAddr {
        self.group
    }

    /// Local address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send a datagram
    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        let sent = self
            .socket
            .send_to(data, target)
            .await
            .map_err(|e| DiscoveryError::network(format!("Failed to send to {target}: {e}")))?;
        trace!("Sent {} bytes to {}", sent, target);
        Ok(())
    }

    /// Send a datagram to the discovery group
    pub async fn send_to_group(&self, data: &[u8]) -> Result<()> {
        self.send_to(data, self.group).await
    }

    /// Receive one datagram
    ///
    /// The buffer is one byte larger than the message ceiling so oversized
    /// datagrams are detected instead of silently truncated.
    pub async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_MSG_SIZE + 1];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        trace!("Received {} bytes from {}", len, from);
        Ok((buf, from))
    }

    /// Receive one datagram, giving up after `wait`
    pub async fn recv_timeout(&self, wait: Duration) -> Result<(Vec<u8>, SocketAddr)> {
        timeout(wait, self.recv())
            .await
            .map_err(|_| DiscoveryError::timeout(format!("no datagram within {wait:?}")))?
    }
}

fn new_socket() -> Result<Socket> {
    Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| DiscoveryError::network(format!("Failed to create socket: {e}")))
}
