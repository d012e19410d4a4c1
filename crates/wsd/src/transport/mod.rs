// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP transport for discovery traffic.
//!
//! Two sockets:
//! - multicast socket bound to the discovery port and joined to the group
//!   (Hello/Bye/Probe/Resolve arrive here)
//! - unicast socket on an ephemeral port (all sends, and the replies to our
//!   own queries)

pub mod receiver;

pub use receiver::{DatagramReceiver, ReceiverMetrics};

use crate::config::{DiscoveryConfig, MAX_DATAGRAM_SIZE};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

/// Outbound datagram path.
///
/// Each call is an independent send; implementations do not batch.
pub trait DatagramSender: Send + Sync {
    fn send_to(&self, datagram: &[u8], destination: SocketAddr) -> io::Result<()>;
}

/// How a datagram reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reception {
    Multicast,
    Unicast,
}

impl std::fmt::Display for Reception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Multicast => write!(f, "multicast"),
            Self::Unicast => write!(f, "unicast"),
        }
    }
}

/// Multicast + unicast UDP sockets for one discovery node.
pub struct UdpTransport {
    multicast: Arc<UdpSocket>,
    unicast: Arc<UdpSocket>,
    group: SocketAddr,
}

impl UdpTransport {
    /// Open both sockets as described by `config`.
    ///
    /// # Errors
    /// Any socket creation, bind, or group join failure.
    pub fn open(config: &DiscoveryConfig) -> io::Result<Self> {
        let interface = match config.bind_address {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "IPv6 bind addresses are not supported",
                ))
            }
        };

        let multicast = Self::bind_multicast(interface, config.port, config.multicast_group)?;
        multicast.set_multicast_loop_v4(config.multicast_loop)?;

        let unicast = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        unicast.set_multicast_ttl_v4(1)?;
        unicast.set_multicast_loop_v4(config.multicast_loop)?;
        if !interface.is_unspecified() {
            unicast.set_multicast_if_v4(&interface)?;
        }
        unicast.bind(&SocketAddr::from((interface, 0)).into())?;
        let unicast: UdpSocket = unicast.into();

        log::debug!(
            "[UDP] discovery sockets ready: multicast {}:{} group {}, unicast {}",
            interface,
            config.port,
            config.multicast_group,
            unicast
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string())
        );

        Ok(Self {
            multicast: Arc::new(multicast),
            unicast: Arc::new(unicast),
            group: config.multicast_destination(),
        })
    }

    fn bind_multicast(interface: Ipv4Addr, port: u16, group: Ipv4Addr) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;

        match socket.join_multicast_v4(&group, &interface) {
            Ok(()) => log::debug!("[UDP] join_multicast_v4({}) on {}", group, interface),
            // EADDRINUSE: already joined on this interface
            Err(e) if e.raw_os_error() == Some(98) => {
                log::debug!("[UDP] join_multicast_v4({}) on {} already joined", group, interface)
            }
            Err(e) => return Err(e),
        }
        socket.set_multicast_ttl_v4(1)?;

        Ok(socket.into())
    }

    pub fn multicast_socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.multicast)
    }

    pub fn unicast_socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.unicast)
    }

    /// Group address messages are multicast to.
    pub fn group(&self) -> SocketAddr {
        self.group
    }

    pub fn local_unicast_addr(&self) -> io::Result<SocketAddr> {
        self.unicast.local_addr()
    }
}

impl DatagramSender for UdpTransport {
    fn send_to(&self, datagram: &[u8], destination: SocketAddr) -> io::Result<()> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("datagram of {} bytes exceeds UDP limit", datagram.len()),
            ));
        }
        let sent = self.unicast.send_to(datagram, destination)?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, datagram.len()),
            ));
        }
        Ok(())
    }
}
