//! Single-shot UDP request/response exchange.
//! No connection state and no retransmission; retry policy belongs to the caller.

use crate::error::{GreeError, Result};
use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{Duration, timeout};

const RECV_BUFFER_LEN: usize = 4096;

/// Sends one framed request and yields one framed reply.
pub trait Transport: Send + Sync {
    /// Send `frame` and wait up to `limit` for the reply.
    fn exchange(
        &self,
        frame: Vec<u8>,
        limit: Duration,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn exchange(
        &self,
        frame: Vec<u8>,
        limit: Duration,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send {
        (**self).exchange(frame, limit)
    }
}

/// UDP transport addressing one appliance.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    host: String,
    port: u16,
}

impl UdpTransport {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host(self.address()).await?;
        addrs
            .next()
            .ok_or_else(|| GreeError::Io(format!("cannot resolve {}", self.address())))
    }

    /// Create an unconnected socket on an ephemeral port of the right family.
    fn create_socket(remote: &SocketAddr) -> Result<UdpSocket> {
        let local: SocketAddr = match remote.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set reuse_address for {}: {}", remote, e);
        }
        socket.bind(&SockAddr::from(local))?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        Ok(UdpSocket::from_std(std_socket)?)
    }
}

impl Transport for UdpTransport {
    async fn exchange(&self, frame: Vec<u8>, limit: Duration) -> Result<Vec<u8>> {
        let remote = self.resolve().await?;
        let socket = Self::create_socket(&remote)?;
        socket.connect(remote).await?;

        debug!("Sending {} bytes to {}", frame.len(), remote);
        timeout(limit, socket.send(&frame))
            .await
            .map_err(|_| GreeError::Timeout)??;

        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let len = timeout(limit, socket.recv(&mut buf))
            .await
            .map_err(|_| GreeError::Timeout)??;
        debug!("Received {} bytes from {}", len, remote);

        buf.truncate(len);
        Ok(buf)
    }
}
