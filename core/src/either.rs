use crate::identity::Keypair;
use crate::muxing::{IReadWrite, IStreamMuxer, StreamMuxer, StreamMuxerEx};
use crate::secure_io::SecureInfo;
use crate::transport::{ConnectionInfo, TransportError};
use crate::upgrade::ProtocolName;
use crate::{Multiaddr, PeerId, PublicKey};
use async_trait::async_trait;
use futures::future::BoxFuture;
use strand_traits::{ReadEx, SplitEx, WriteEx};
use std::io;

/// The output of a [`crate::upgrade::Selector`]: whichever branch won the
/// negotiation. All pipe-like traits are forwarded to the active branch.
#[derive(Debug, Copy, Clone)]
pub enum EitherOutput<A, B> {
    A(A),
    B(B),
}

#[async_trait]
impl<A, B> ReadEx for EitherOutput<A, B>
where
    A: ReadEx + Send,
    B: ReadEx + Send,
{
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EitherOutput::A(a) => a.read2(buf).await,
            EitherOutput::B(b) => b.read2(buf).await,
        }
    }
}

#[async_trait]
impl<A, B> WriteEx for EitherOutput<A, B>
where
    A: WriteEx + Send,
    B: WriteEx + Send,
{
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            EitherOutput::A(a) => a.write2(buf).await,
            EitherOutput::B(b) => b.write2(buf).await,
        }
    }

    async fn flush2(&mut self) -> io::Result<()> {
        match self {
            EitherOutput::A(a) => a.flush2().await,
            EitherOutput::B(b) => b.flush2().await,
        }
    }

    async fn close2(&mut self) -> io::Result<()> {
        match self {
            EitherOutput::A(a) => a.close2().await,
            EitherOutput::B(b) => b.close2().await,
        }
    }
}

impl<A, B> SplitEx for EitherOutput<A, B>
where
    A: SplitEx,
    B: SplitEx,
{
    type Reader = EitherOutput<A::Reader, B::Reader>;
    type Writer = EitherOutput<A::Writer, B::Writer>;

    fn split2(self) -> (Self::Reader, Self::Writer) {
        match self {
            EitherOutput::A(a) => {
                let (r, w) = a.split2();
                (EitherOutput::A(r), EitherOutput::A(w))
            }
            EitherOutput::B(b) => {
                let (r, w) = b.split2();
                (EitherOutput::B(r), EitherOutput::B(w))
            }
        }
    }
}

impl<A, B> SecureInfo for EitherOutput<A, B>
where
    A: SecureInfo,
    B: SecureInfo,
{
    fn local_peer(&self) -> PeerId {
        match self {
            EitherOutput::A(a) => a.local_peer(),
            EitherOutput::B(b) => b.local_peer(),
        }
    }

    fn remote_peer(&self) -> PeerId {
        match self {
            EitherOutput::A(a) => a.remote_peer(),
            EitherOutput::B(b) => b.remote_peer(),
        }
    }

    fn local_priv_key(&self) -> Keypair {
        match self {
            EitherOutput::A(a) => a.local_priv_key(),
            EitherOutput::B(b) => b.local_priv_key(),
        }
    }

    fn remote_pub_key(&self) -> PublicKey {
        match self {
            EitherOutput::A(a) => a.remote_pub_key(),
            EitherOutput::B(b) => b.remote_pub_key(),
        }
    }
}

impl<A, B> ConnectionInfo for EitherOutput<A, B>
where
    A: ConnectionInfo,
    B: ConnectionInfo,
{
    fn local_multiaddr(&self) -> Multiaddr {
        match self {
            EitherOutput::A(a) => a.local_multiaddr(),
            EitherOutput::B(b) => b.local_multiaddr(),
        }
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        match self {
            EitherOutput::A(a) => a.remote_multiaddr(),
            EitherOutput::B(b) => b.remote_multiaddr(),
        }
    }
}

#[async_trait]
impl<A, B> StreamMuxer for EitherOutput<A, B>
where
    A: StreamMuxerEx + Clone + Send + 'static,
    B: StreamMuxerEx + Clone + Send + 'static,
{
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError> {
        match self {
            EitherOutput::A(a) => a.open_stream().await,
            EitherOutput::B(b) => b.open_stream().await,
        }
    }

    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError> {
        match self {
            EitherOutput::A(a) => a.accept_stream().await,
            EitherOutput::B(b) => b.accept_stream().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self {
            EitherOutput::A(a) => a.close().await,
            EitherOutput::B(b) => b.close().await,
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            EitherOutput::A(a) => a.is_closed(),
            EitherOutput::B(b) => b.is_closed(),
        }
    }

    fn task(&mut self) -> Option<BoxFuture<'static, ()>> {
        match self {
            EitherOutput::A(a) => a.task(),
            EitherOutput::B(b) => b.task(),
        }
    }

    fn box_clone(&self) -> IStreamMuxer {
        Box::new(self.clone())
    }
}

impl<A, B> StreamMuxerEx for EitherOutput<A, B>
where
    A: StreamMuxerEx + Clone + Send + 'static,
    B: StreamMuxerEx + Clone + Send + 'static,
{
}

/// A protocol name coming from either of two upgraders.
#[derive(Debug, Clone)]
pub enum EitherName<A, B> {
    A(A),
    B(B),
}

impl<A: ProtocolName, B: ProtocolName> ProtocolName for EitherName<A, B> {
    fn protocol_name(&self) -> &[u8] {
        match self {
            EitherName::A(a) => a.protocol_name(),
            EitherName::B(b) => b.protocol_name(),
        }
    }
}
