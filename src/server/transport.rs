//! Datagram transport seam between workers and the network

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Unreliable datagram transport
///
/// Shared by every worker of a server; implementations must allow concurrent
/// receives and sends through `&self`.
pub trait Transport: Send + Sync + 'static {
    /// Receive one datagram into `buf`, returning its length and sender
    fn recv_from(&self, buf: &mut [u8])
    -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    /// Send one datagram to `target`
    fn send_to(&self, buf: &[u8], target: SocketAddr)
    -> impl Future<Output = io::Result<usize>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Transport for UdpSocket {
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send {
        UdpSocket::recv_from(self, buf)
    }

    fn send_to(&self, buf: &[u8], target: SocketAddr) -> impl Future<Output = io::Result<usize>> + Send {
        UdpSocket::send_to(self, buf, target)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
