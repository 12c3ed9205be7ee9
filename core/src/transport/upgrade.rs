//! Transport upgrader.
//!
//! [`TransportUpgrade`] wraps another [`Transport`] and adds the two
//! upgrade stages every connection goes through: a security handshake
//! and the selection of a stream multiplexer, each preceded by a
//! multistream-select negotiation. On success it yields an
//! [`UpgradedConn`] together with the [`ConnState`] describing what was
//! negotiated.

use crate::multistream::NegotiationError;
use crate::muxing::{IReadWrite, IStreamMuxer, ReadWriteEx, StreamInfo, StreamMuxer, StreamMuxerEx};
use crate::peerstore::PeerStore;
use crate::resource::{ConnScope, NullResourceManager, ResourceManager, StreamScope};
use crate::secure_io::SecureInfo;
use crate::transport::{
    ConnState, ConnectionInfo, Direction, Transport, TransportError, TransportListener,
};
use crate::upgrade::{Multistream, Upgrader};
use crate::{Multiaddr, PeerId};
use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{debug, trace};
use strand_traits::{ReadEx, WriteEx};
use std::io;
use std::sync::Arc;
use std::time::Instant;

/// A `Transport` wrapper adding security and multiplexing to every
/// inbound and outbound connection attempt.
pub struct TransportUpgrade<InnerTrans, TSec, TMux> {
    inner: InnerTrans,
    secure: Multistream<TSec>,
    mux: Multistream<TMux>,
    peerstore: PeerStore,
    rm: Arc<dyn ResourceManager>,
}

impl<InnerTrans, TSec, TMux> TransportUpgrade<InnerTrans, TSec, TMux>
where
    InnerTrans: Transport,
{
    /// Wraps `inner`, securing connections with `sec` and multiplexing
    /// them with `mux`.
    pub fn new(inner: InnerTrans, sec: TSec, mux: TMux) -> Self {
        TransportUpgrade {
            inner,
            secure: Multistream::new(sec),
            mux: Multistream::new(mux),
            peerstore: PeerStore::new(),
            rm: Arc::new(NullResourceManager),
        }
    }

    /// Uses `peerstore` to persist the public keys learned in handshakes.
    pub fn with_peerstore(mut self, peerstore: PeerStore) -> Self {
        self.peerstore = peerstore;
        self
    }

    /// Reports connection and stream lifecycles to `rm`.
    pub fn with_resource_manager(mut self, rm: Arc<dyn ResourceManager>) -> Self {
        self.rm = rm;
        self
    }
}

impl<InnerTrans, TSec, TMux> TransportUpgrade<InnerTrans, TSec, TMux>
where
    InnerTrans: Transport,
    InnerTrans::Output: ReadEx + WriteEx + Send + 'static,
    TSec: Upgrader<InnerTrans::Output> + Send,
    TSec::Output: ConnectionInfo + SecureInfo + ReadEx + WriteEx + Send + 'static,
    TMux: Upgrader<TSec::Output> + Send,
    TMux::Output: StreamMuxer + SecureInfo + ConnectionInfo + Clone + Send + 'static,
{
    /// Dials `addr` and fails with [`TransportError::PeerIdMismatch`] if
    /// the authenticated remote identity is not `expected_peer`.
    pub async fn dial_expecting(
        self,
        addr: Multiaddr,
        expected_peer: PeerId,
    ) -> Result<UpgradedConn<TMux::Output>, TransportError> {
        let transport_name = self.inner.name();
        let socket = self.inner.dial(addr).await?;
        upgrade_socket(
            socket,
            self.secure,
            self.mux,
            Direction::Outbound,
            Some(expected_peer),
            self.rm,
            self.peerstore,
            transport_name,
        )
        .await
    }
}

#[async_trait]
impl<InnerTrans, TSec, TMux> Transport for TransportUpgrade<InnerTrans, TSec, TMux>
where
    InnerTrans: Transport + Send,
    InnerTrans::Listener: TransportListener<Output = InnerTrans::Output> + Send,
    InnerTrans::Output: ReadEx + WriteEx + Send + 'static,
    TSec: Upgrader<InnerTrans::Output> + Send,
    TSec::Output: ConnectionInfo + SecureInfo + ReadEx + WriteEx + Send + 'static,
    TMux: Upgrader<TSec::Output> + Send,
    TMux::Output: StreamMuxer + SecureInfo + ConnectionInfo + Clone + Send + 'static,
{
    type Output = UpgradedConn<TMux::Output>;
    type Listener = ListenerUpgrade<InnerTrans::Listener, TSec, TMux>;

    fn listen_on(self, addr: Multiaddr) -> Result<Self::Listener, TransportError> {
        let transport_name = self.inner.name();
        let inner_listener = self.inner.listen_on(addr)?;
        Ok(ListenerUpgrade {
            inner: inner_listener,
            secure: self.secure,
            mux: self.mux,
            peerstore: self.peerstore,
            rm: self.rm,
            transport_name,
        })
    }

    async fn dial(self, addr: Multiaddr) -> Result<Self::Output, TransportError> {
        let transport_name = self.inner.name();
        let socket = self.inner.dial(addr).await?;
        upgrade_socket(
            socket,
            self.secure,
            self.mux,
            Direction::Outbound,
            None,
            self.rm,
            self.peerstore,
            transport_name,
        )
        .await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Listener that upgrades every accepted connection.
pub struct ListenerUpgrade<InnerListener, TSec, TMux> {
    inner: InnerListener,
    secure: Multistream<TSec>,
    mux: Multistream<TMux>,
    peerstore: PeerStore,
    rm: Arc<dyn ResourceManager>,
    transport_name: &'static str,
}

#[async_trait]
impl<InnerListener, TSec, TMux> TransportListener for ListenerUpgrade<InnerListener, TSec, TMux>
where
    InnerListener: TransportListener + Send,
    InnerListener::Output: ReadEx + WriteEx + ConnectionInfo + Send + 'static,
    TSec: Upgrader<InnerListener::Output> + Send,
    TSec::Output: ConnectionInfo + SecureInfo + ReadEx + WriteEx + Send + 'static,
    TMux: Upgrader<TSec::Output> + Send,
    TMux::Output: StreamMuxer + SecureInfo + ConnectionInfo + Clone + Send + 'static,
{
    type Output = UpgradedConn<TMux::Output>;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        let socket = self.inner.accept().await?;
        trace!("got a new connection, upgrading...");
        upgrade_socket(
            socket,
            self.secure.clone(),
            self.mux.clone(),
            Direction::Inbound,
            None,
            self.rm.clone(),
            self.peerstore.clone(),
            self.transport_name,
        )
        .await
    }

    fn multi_addr(&self) -> Multiaddr {
        self.inner.multi_addr()
    }
}

async fn upgrade_socket<C, TSec, TMux>(
    socket: C,
    secure: Multistream<TSec>,
    mux: Multistream<TMux>,
    dir: Direction,
    expected_peer: Option<PeerId>,
    rm: Arc<dyn ResourceManager>,
    peerstore: PeerStore,
    transport_name: &'static str,
) -> Result<UpgradedConn<TMux::Output>, TransportError>
where
    C: ReadEx + WriteEx + ConnectionInfo + Send + 'static,
    TSec: Upgrader<C> + Send,
    TSec::Output: ConnectionInfo + SecureInfo + ReadEx + WriteEx + Send + 'static,
    TMux: Upgrader<TSec::Output> + Send,
    TMux::Output: StreamMuxer + SecureInfo + ConnectionInfo + Clone + Send + 'static,
{
    let scope = rm.open_connection(dir, &socket.remote_multiaddr())?;

    let upgraded = async {
        let (security_protocol, secured) = match dir {
            Direction::Outbound => secure.select_outbound(socket).await,
            Direction::Inbound => secure.select_inbound(socket).await,
        }
        .map_err(no_mutual_security)?;

        let remote_peer = secured.remote_peer();
        if let Some(expected) = expected_peer {
            if expected != remote_peer {
                let mut secured = secured;
                let _ = secured.close2().await;
                return Err(TransportError::PeerIdMismatch {
                    expected,
                    actual: remote_peer,
                });
            }
        }
        scope.set_peer(&remote_peer);
        peerstore.add_pub_key(&remote_peer, secured.remote_pub_key());
        debug!("secured connection to {} via {}", remote_peer, security_protocol);

        let (stream_muxer_protocol, muxer) = match dir {
            Direction::Outbound => mux.select_outbound(secured).await,
            Direction::Inbound => mux.select_inbound(secured).await,
        }
        .map_err(no_mutual_muxer)?;

        let state = ConnState::new(
            security_protocol,
            stream_muxer_protocol,
            transport_name.to_owned(),
            remote_peer,
        );
        Ok((muxer, state))
    }
    .await;

    match upgraded {
        Ok((muxer, state)) => Ok(UpgradedConn {
            inner: muxer,
            state,
            rm,
            scope,
        }),
        Err(e) => {
            scope.done();
            Err(e)
        }
    }
}

fn no_mutual_security(e: TransportError) -> TransportError {
    match e {
        TransportError::Negotiation(NegotiationError::Failed) => TransportError::NoMutualSecurity,
        e => e,
    }
}

fn no_mutual_muxer(e: TransportError) -> TransportError {
    match e {
        TransportError::Negotiation(NegotiationError::Failed) => TransportError::NoMutualMuxer,
        e => e,
    }
}

/// A fully upgraded connection: the negotiated muxer plus a record of
/// how the upgrade went.
pub struct UpgradedConn<M> {
    inner: M,
    state: ConnState,
    rm: Arc<dyn ResourceManager>,
    scope: Arc<dyn ConnScope>,
}

impl<M: Clone> Clone for UpgradedConn<M> {
    fn clone(&self) -> Self {
        UpgradedConn {
            inner: self.inner.clone(),
            state: self.state.clone(),
            rm: self.rm.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<M> UpgradedConn<M> {
    /// What was negotiated for this connection.
    pub fn conn_state(&self) -> &ConnState {
        &self.state
    }
}

#[async_trait]
impl<M> StreamMuxer for UpgradedConn<M>
where
    M: StreamMuxer + SecureInfo + ConnectionInfo + Clone + Send + 'static,
{
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let scope = self.rm.open_stream(&self.state.remote_peer(), Direction::Outbound)?;
        let stream = self.inner.open_stream().await?;
        Ok(Box::new(ScopedStream { inner: stream, scope }))
    }

    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let scope = self.rm.open_stream(&self.state.remote_peer(), Direction::Inbound)?;
        let stream = self.inner.accept_stream().await?;
        Ok(Box::new(ScopedStream { inner: stream, scope }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let res = self.inner.close().await;
        self.scope.done();
        res
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn task(&mut self) -> Option<BoxFuture<'static, ()>> {
        self.inner.task()
    }

    fn box_clone(&self) -> IStreamMuxer {
        Box::new(self.clone())
    }
}

impl<M> SecureInfo for UpgradedConn<M>
where
    M: SecureInfo,
{
    fn local_peer(&self) -> PeerId {
        self.inner.local_peer()
    }

    fn remote_peer(&self) -> PeerId {
        self.inner.remote_peer()
    }

    fn local_priv_key(&self) -> crate::Keypair {
        self.inner.local_priv_key()
    }

    fn remote_pub_key(&self) -> crate::PublicKey {
        self.inner.remote_pub_key()
    }
}

impl<M> ConnectionInfo for UpgradedConn<M>
where
    M: ConnectionInfo,
{
    fn local_multiaddr(&self) -> Multiaddr {
        self.inner.local_multiaddr()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.inner.remote_multiaddr()
    }
}

impl<M> StreamMuxerEx for UpgradedConn<M> where
    M: StreamMuxer + SecureInfo + ConnectionInfo + Clone + Send + 'static
{
}

/// A muxed stream tied to its resource-manager scope.
struct ScopedStream {
    inner: IReadWrite,
    scope: Arc<dyn StreamScope>,
}

impl StreamInfo for ScopedStream {
    fn id(&self) -> usize {
        self.inner.id()
    }

    fn protocol(&self) -> Option<String> {
        self.inner.protocol()
    }

    fn set_protocol(&mut self, proto: &str) {
        self.inner.set_protocol(proto)
    }
}

#[async_trait]
impl ReadEx for ScopedStream {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read2(buf).await
    }
}

#[async_trait]
impl WriteEx for ScopedStream {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.inner.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        let res = self.inner.close2().await;
        self.scope.done();
        res
    }
}

#[async_trait]
impl ReadWriteEx for ScopedStream {
    fn box_clone(&self) -> IReadWrite {
        Box::new(ScopedStream {
            inner: self.inner.clone(),
            scope: self.scope.clone(),
        })
    }

    async fn reset(&mut self) -> io::Result<()> {
        let res = self.inner.reset().await;
        self.scope.done();
        res
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.inner.set_read_deadline(deadline)
    }

    fn is_reset(&self) -> bool {
        self.inner.is_reset()
    }
}
