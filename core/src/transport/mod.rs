//! Transports produce raw byte pipes between peers.
//!
//! A [`Transport`] knows how to dial and listen on a class of
//! multiaddrs. The pipes it produces are then layered with security and
//! multiplexing by [`upgrade::TransportUpgrade`].

pub mod memory;
pub mod upgrade;

use crate::multistream::NegotiationError;
use crate::{Multiaddr, PeerId};
use async_trait::async_trait;
use thiserror::Error;
use std::error::Error;
use std::io;

/// The direction of a peer-to-peer communication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The pipe comes from a dialer.
    Outbound,
    /// The pipe comes from a listener.
    Inbound,
}

/// Address information carried by every pipe.
pub trait ConnectionInfo {
    fn local_multiaddr(&self) -> Multiaddr;
    fn remote_multiaddr(&self) -> Multiaddr;
}

/// Produces connections towards, and from, remote peers.
#[async_trait]
pub trait Transport: Send {
    type Output: ConnectionInfo + Send + 'static;
    type Listener: TransportListener<Output = Self::Output>;

    /// Starts listening on `addr`.
    fn listen_on(self, addr: Multiaddr) -> Result<Self::Listener, TransportError>;

    /// Connects to `addr`.
    async fn dial(self, addr: Multiaddr) -> Result<Self::Output, TransportError>;

    /// The short name of this transport, e.g. `"tcp"`.
    fn name(&self) -> &'static str;
}

/// Accepts inbound connections for a [`Transport`].
#[async_trait]
pub trait TransportListener: Send {
    type Output: Send;

    /// Waits for the next inbound connection.
    async fn accept(&mut self) -> Result<Self::Output, TransportError>;

    /// The address this listener is bound to.
    fn multi_addr(&self) -> Multiaddr;
}

/// Everything an upgraded connection knows about how it came to be.
#[derive(Debug, Clone)]
pub struct ConnState {
    security_protocol: String,
    stream_muxer_protocol: String,
    transport: String,
    remote_peer: PeerId,
}

impl ConnState {
    pub fn new(
        security_protocol: String,
        stream_muxer_protocol: String,
        transport: String,
        remote_peer: PeerId,
    ) -> Self {
        ConnState {
            security_protocol,
            stream_muxer_protocol,
            transport,
            remote_peer,
        }
    }

    /// The security protocol the connection was secured with.
    pub fn security_protocol(&self) -> &str {
        &self.security_protocol
    }

    /// The stream multiplexer running on the connection.
    pub fn stream_muxer_protocol(&self) -> &str {
        &self.stream_muxer_protocol
    }

    /// The transport the connection came from.
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// The authenticated remote peer.
    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }
}

/// Errors raised while establishing or upgrading a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("multiaddr is not supported: {0}")]
    MultiaddrNotSupported(Multiaddr),

    #[error("protocol negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("no mutually supported security protocol")]
    NoMutualSecurity,

    #[error("no mutually supported stream multiplexer")]
    NoMutualMuxer,

    #[error("security handshake failed: {0}")]
    SecurityError(Box<dyn Error + Send + Sync>),

    #[error("stream muxer failed: {0}")]
    StreamMuxerError(Box<dyn Error + Send + Sync>),

    #[error("remote peer is {actual}, expected {expected}")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },

    #[error("denied by the resource manager")]
    ResourceLimitExceeded,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("operation timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}
