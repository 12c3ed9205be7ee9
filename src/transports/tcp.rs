//! TCP transport.
//!
//! Produces [`TcpConn`] pipes for `/ip4/<addr>/tcp/<port>` multiaddrs.
//! DNS multiaddrs are out of scope; addresses must be literal.

use async_std::net::{TcpListener, TcpStream};
use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};
use log::{debug, trace};
use multiaddr::Protocol;
use strand_core::transport::{ConnectionInfo, Transport, TransportError, TransportListener};
use strand_core::Multiaddr;
use strand_traits::SplitEx;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Transport for plain TCP connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

fn multiaddr_to_socketaddr(addr: &Multiaddr) -> Option<SocketAddr> {
    let mut iter = addr.iter();
    let ip = iter.next()?;
    let port = iter.next()?;
    if iter.next().is_some() {
        return None;
    }
    match (ip, port) {
        (Protocol::Ip4(ip), Protocol::Tcp(port)) => Some(SocketAddr::new(ip.into(), port)),
        (Protocol::Ip6(ip), Protocol::Tcp(port)) => Some(SocketAddr::new(ip.into(), port)),
        _ => None,
    }
}

fn socketaddr_to_multiaddr(addr: &SocketAddr) -> Multiaddr {
    let mut out = Multiaddr::empty();
    match addr.ip() {
        std::net::IpAddr::V4(ip) => out.push(Protocol::Ip4(ip)),
        std::net::IpAddr::V6(ip) => out.push(Protocol::Ip6(ip)),
    }
    out.push(Protocol::Tcp(addr.port()));
    out
}

#[async_trait]
impl Transport for TcpTransport {
    type Output = TcpConn;
    type Listener = TcpTransportListener;

    fn listen_on(self, addr: Multiaddr) -> Result<Self::Listener, TransportError> {
        let socket_addr = multiaddr_to_socketaddr(&addr)
            .ok_or_else(|| TransportError::MultiaddrNotSupported(addr.clone()))?;
        // bind synchronously so the chosen port is known right away
        let listener = std::net::TcpListener::bind(socket_addr)?;
        debug!("listening on {:?}", listener.local_addr());
        Ok(TcpTransportListener {
            listener: TcpListener::from(listener),
        })
    }

    async fn dial(self, addr: Multiaddr) -> Result<Self::Output, TransportError> {
        let socket_addr = multiaddr_to_socketaddr(&addr)
            .ok_or_else(|| TransportError::MultiaddrNotSupported(addr.clone()))?;
        debug!("dialing {}", socket_addr);
        let stream = TcpStream::connect(socket_addr).await?;
        stream.set_nodelay(true)?;
        TcpConn::new(stream)
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Listener half of the TCP transport.
pub struct TcpTransportListener {
    listener: TcpListener,
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    type Output = TcpConn;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        let (stream, remote) = self.listener.accept().await?;
        trace!("accepted connection from {}", remote);
        stream.set_nodelay(true)?;
        TcpConn::new(stream)
    }

    fn multi_addr(&self) -> Multiaddr {
        self.listener
            .local_addr()
            .map(|a| socketaddr_to_multiaddr(&a))
            .unwrap_or_else(|_| Multiaddr::empty())
    }
}

/// A TCP pipe with its addresses attached.
///
/// Cloning yields another handle onto the same socket, which is how the
/// pipe splits into reader and writer halves.
#[derive(Clone, Debug)]
pub struct TcpConn {
    inner: TcpStream,
    la: Multiaddr,
    ra: Multiaddr,
}

impl TcpConn {
    fn new(stream: TcpStream) -> Result<Self, TransportError> {
        let la = socketaddr_to_multiaddr(&stream.local_addr()?);
        let ra = socketaddr_to_multiaddr(&stream.peer_addr()?);
        Ok(TcpConn { inner: stream, la, ra })
    }
}

impl ConnectionInfo for TcpConn {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

impl AsyncRead for TcpConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }
}

impl SplitEx for TcpConn {
    type Reader = TcpConn;
    type Writer = TcpConn;

    fn split2(self) -> (Self::Reader, Self::Writer) {
        (self.clone(), self)
    }
}
