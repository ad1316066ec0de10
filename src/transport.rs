//! UDP transport for one session.
//!
//! The socket is created through `socket2` and handed to tokio, bound to the
//! wildcard address of the peer's family; the kernel picks the local TID on
//! the first send. Receives are bounded by a caller-supplied wait so the
//! session can run its retransmit timer and hard deadline on top.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, TftpError};
use crate::wire::RecvBuf;

pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    /// Binds a datagram socket matching the peer's address family.
    pub fn bind(peer: SocketAddr) -> Result<Self> {
        let (domain, bind_addr): (Domain, SocketAddr) = if peer.is_ipv4() {
            (Domain::IPV4, SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0))
        } else {
            (Domain::IPV6, SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0))
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TftpError::Tftp(format!("Failed to create socket: {}", e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TftpError::Tftp(format!("Failed to set non-blocking: {}", e)))?;
        socket
            .bind(&bind_addr.into())
            .map_err(|e| TftpError::Tftp(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TftpError::Tftp(format!("Failed to convert to tokio socket: {}", e)))?;

        debug!("bound UDP socket on {:?}", socket.local_addr().ok());
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// One `sendto` of the prepared datagram. Treated as atomic.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        let sent = self.socket.send_to(data, addr).await?;
        if sent != data.len() {
            return Err(TftpError::Tftp(format!(
                "short send: {} of {} bytes",
                sent,
                data.len()
            )));
        }
        Ok(())
    }

    /// Waits up to `wait` for one datagram. `None` signals the timer expiry
    /// to the retry layer; socket errors are fatal to the session.
    pub async fn recv_from(
        &self,
        buf: &mut RecvBuf,
        wait: Duration,
    ) -> Result<Option<(usize, SocketAddr)>> {
        match timeout(wait, self.socket.recv_from(buf.storage_mut())).await {
            Ok(Ok((len, src))) => {
                buf.set_datagram_len(len);
                Ok(Some((len, src)))
            }
            Ok(Err(e)) => Err(TftpError::Io(e)),
            Err(_) => Ok(None),
        }
    }
}
