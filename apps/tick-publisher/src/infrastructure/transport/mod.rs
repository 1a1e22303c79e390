//! Multicast UDP Transport
//!
//! Receives datagrams from a multicast group. The socket is prepared with
//! `socket2` (address reuse, receive buffer sizing, group membership) and
//! then driven by tokio.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::application::ports::{DatagramSource, TransportError};

/// Largest UDP payload.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Multicast subscription settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastSettings {
    /// Group address to join.
    pub group: Ipv4Addr,
    /// UDP port.
    pub port: u16,
    /// Local interface used for the join.
    pub interface: Ipv4Addr,
    /// Requested kernel receive buffer size.
    pub recv_buffer_bytes: usize,
}

impl Default for MulticastSettings {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(239, 255, 0, 1),
            port: 30001,
            interface: Ipv4Addr::UNSPECIFIED,
            recv_buffer_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Datagram source over a UDP socket.
#[derive(Debug)]
pub struct MulticastReceiver {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl MulticastReceiver {
    /// Bind the port and join the multicast group.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket cannot be configured, bound, or
    /// joined to the group.
    pub fn join(settings: &MulticastSettings) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if let Err(e) = socket.set_recv_buffer_size(settings.recv_buffer_bytes) {
            tracing::warn!(
                requested = settings.recv_buffer_bytes,
                error = %e,
                "Could not size receive buffer"
            );
        }

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.port);
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(&settings.group, &settings.interface)?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        tracing::info!(
            group = %settings.group,
            port = settings.port,
            interface = %settings.interface,
            "Joined multicast group"
        );
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already bound socket.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: vec![0; MAX_DATAGRAM_SIZE],
        }
    }

    /// Local address of the socket.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramSource for MulticastReceiver {
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let (len, _from) = self.socket.recv_from(&mut self.buf).await?;
        Ok(self.buf[..len].to_vec())
    }
}
