//! Yamux stream multiplexer.
//!
//! Multiplexes many logical streams over one ordered byte pipe, with
//! credit-based flow control per stream, orderly half-close, abrupt
//! reset, session keep-alive and graceful go-away teardown. Wire
//! compatible with the yamux specification when run with the default
//! window configuration.

pub mod connection;
pub mod error;

mod chunks;
mod frame;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{info, trace};
use std::fmt;
use std::time::{Duration, Instant};

use connection::{Connection, Control, Id, Mode, Stream};
use error::ConnectionError;
use strand_core::identity::Keypair;
use strand_core::muxing::{IReadWrite, IStreamMuxer, ReadWriteEx, StreamInfo, StreamMuxer, StreamMuxerEx};
use strand_core::secure_io::SecureInfo;
use strand_core::transport::{ConnectionInfo, TransportError};
use strand_core::upgrade::{UpgradeInfo, Upgrader};
use strand_core::{Multiaddr, PeerId, PublicKey};
use strand_traits::SplittableReadWrite;

pub use frame::header::StreamId;
pub use frame::io::FrameDecodeError;

const DEFAULT_CREDIT: u32 = 256 * 1024; // as per yamux specification

/// Upper bound on the configurable receive window.
const MAX_RECEIVE_WINDOW: u32 = 1024 * 1024;

/// Smallest admissible window for private deployments.
const MIN_WINDOW: u32 = 16 * 1024;

/// Default split size for outgoing data frames. Kept well below the
/// window so that data interleaves with control frames, which matters
/// when every frame becomes one encrypted record underneath.
const DEFAULT_SPLIT_SIZE: usize = 16 * 1024;

/// Yamux session configuration.
///
/// The default values are:
///
/// - initial window = 256 KiB (the wire-compatible default)
/// - receive window = 256 KiB, at most 1 MiB
/// - max. frame payload = 16 KiB
/// - max. number of streams = 8192
/// - keep-alive interval = 30 s
/// - SYN timeout = 30 s
/// - write timeout = 10 s
/// - shutdown timeout = 15 s
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) initial_window: u32,
    pub(crate) receive_window: u32,
    pub(crate) max_message_size: usize,
    pub(crate) max_num_streams: usize,
    pub(crate) keep_alive_interval: Duration,
    pub(crate) syn_timeout: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            initial_window: DEFAULT_CREDIT,
            receive_window: DEFAULT_CREDIT,
            max_message_size: DEFAULT_SPLIT_SIZE,
            max_num_streams: 8192,
            keep_alive_interval: Duration::from_secs(30),
            syn_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Sets the window both directions start with. Peers must agree on
    /// this value; anything but the 256 KiB default is only usable in
    /// closed deployments.
    ///
    /// # Panics
    ///
    /// If `n` is below 16 KiB or above 1 MiB.
    pub fn set_initial_window(&mut self, n: u32) -> &mut Self {
        assert!(n >= MIN_WINDOW && n <= MAX_RECEIVE_WINDOW);
        self.initial_window = n;
        if self.receive_window < n {
            self.receive_window = n;
        }
        self
    }

    /// Sets the target receive window per stream.
    ///
    /// # Panics
    ///
    /// If `n` is below the initial window or above 1 MiB.
    pub fn set_receive_window(&mut self, n: u32) -> &mut Self {
        assert!(n >= self.initial_window && n <= MAX_RECEIVE_WINDOW);
        self.receive_window = n;
        self
    }

    /// Sets the max. payload carried by one data frame.
    pub fn set_max_message_size(&mut self, n: usize) -> &mut Self {
        assert!(n > 0);
        self.max_message_size = n;
        self
    }

    /// Sets the max. number of concurrent streams.
    pub fn set_max_num_streams(&mut self, n: usize) -> &mut Self {
        self.max_num_streams = n;
        self
    }

    /// Sets the keep-alive probe interval; zero disables keep-alive.
    pub fn set_keep_alive_interval(&mut self, d: Duration) -> &mut Self {
        self.keep_alive_interval = d;
        self
    }

    /// Sets how long a locally opened stream may go unacknowledged.
    pub fn set_syn_timeout(&mut self, d: Duration) -> &mut Self {
        self.syn_timeout = d;
        self
    }

    /// Sets how long a write may stay blocked on the send window before
    /// the stream is reset; zero disables the timeout.
    pub fn set_write_timeout(&mut self, d: Duration) -> &mut Self {
        self.write_timeout = d;
        self
    }

    /// Sets how long a closing session waits for streams to drain.
    pub fn set_shutdown_timeout(&mut self, d: Duration) -> &mut Self {
        self.shutdown_timeout = d;
        self
    }
}

/// A yamux connection implementing the [`StreamMuxer`] surface.
pub struct Yamux {
    /// The session; taken by [`StreamMuxer::task`].
    connection: Option<Connection>,
    /// Handle to control the connection.
    control: Control,
    /// For debug purposes.
    id: Id,
    /// The local multiaddr of this connection.
    pub la: Multiaddr,
    /// The remote multiaddr of this connection.
    pub ra: Multiaddr,
    /// The private key of the local node.
    pub local_priv_key: Keypair,
    /// For convenience, the local peer id derived from it.
    pub local_peer_id: PeerId,
    /// The public key of the remote, established by the security layer.
    pub remote_pub_key: PublicKey,
    /// For convenience, the remote peer id derived from it.
    pub remote_peer_id: PeerId,
}

impl Clone for Yamux {
    fn clone(&self) -> Self {
        Yamux {
            connection: None,
            control: self.control.clone(),
            id: self.id,
            la: self.la.clone(),
            ra: self.ra.clone(),
            local_priv_key: self.local_priv_key.clone(),
            local_peer_id: self.local_peer_id,
            remote_pub_key: self.remote_pub_key.clone(),
            remote_peer_id: self.remote_peer_id,
        }
    }
}

impl fmt::Debug for Yamux {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Yamux")
            .field("id", &self.id)
            .field("ra", &self.ra)
            .field("rid", &self.remote_peer_id)
            .finish()
    }
}

impl Yamux {
    /// Creates a new yamux connection over a secured socket.
    pub fn new<C>(io: C, cfg: Config, mode: Mode) -> Self
    where
        C: ConnectionInfo + SecureInfo + SplittableReadWrite,
    {
        // `io` is about to move into the connection, take a copy of its
        // identity and address information first.
        let local_priv_key = io.local_priv_key();
        let local_peer_id = io.local_peer();
        let remote_pub_key = io.remote_pub_key();
        let remote_peer_id = io.remote_peer();
        let la = io.local_multiaddr();
        let ra = io.remote_multiaddr();

        let connection = Connection::new(io, cfg, mode);
        let id = connection.id();
        let control = connection.control();
        Yamux {
            connection: Some(connection),
            control,
            id,
            la,
            ra,
            local_priv_key,
            local_peer_id,
            remote_pub_key,
            remote_peer_id,
        }
    }

    /// A control handle onto the session.
    pub fn control(&self) -> Control {
        self.control.clone()
    }
}

impl SecureInfo for Yamux {
    fn local_peer(&self) -> PeerId {
        self.local_peer_id
    }

    fn remote_peer(&self) -> PeerId {
        self.remote_peer_id
    }

    fn local_priv_key(&self) -> Keypair {
        self.local_priv_key.clone()
    }

    fn remote_pub_key(&self) -> PublicKey {
        self.remote_pub_key.clone()
    }
}

impl ConnectionInfo for Yamux {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

impl StreamInfo for Stream {
    fn id(&self) -> usize {
        Stream::id(self).val() as usize
    }

    fn protocol(&self) -> Option<String> {
        Stream::protocol(self)
    }

    fn set_protocol(&mut self, proto: &str) {
        Stream::set_protocol(self, proto)
    }
}

#[async_trait]
impl ReadWriteEx for Stream {
    fn box_clone(&self) -> IReadWrite {
        Box::new(self.clone())
    }

    async fn reset(&mut self) -> std::io::Result<()> {
        Stream::reset(self).await
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        Stream::set_read_deadline(self, deadline)
    }

    fn is_reset(&self) -> bool {
        Stream::is_reset(self)
    }
}

impl StreamMuxerEx for Yamux {}

#[async_trait]
impl StreamMuxer for Yamux {
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let s = self.control.open_stream().await?;
        trace!("{}: new outbound substream {}", self.id, s);
        Ok(Box::new(s))
    }

    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let s = self.control.accept_stream().await?;
        trace!("{}: new inbound substream {}", self.id, s);
        Ok(Box::new(s))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.control.close().await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    fn task(&mut self) -> Option<BoxFuture<'static, ()>> {
        if let Some(mut connection) = self.connection.take() {
            return Some(
                async move {
                    let _ = connection.run().await;
                    info!("{:?}: background task exiting", connection.id());
                }
                .boxed(),
            );
        }
        None
    }

    fn box_clone(&self) -> IStreamMuxer {
        Box::new(self.clone())
    }
}

impl UpgradeInfo for Config {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/yamux/1.0.0"]
    }
}

#[async_trait]
impl<T> Upgrader<T> for Config
where
    T: ConnectionInfo + SecureInfo + SplittableReadWrite,
{
    type Output = Yamux;

    async fn upgrade_inbound(self, socket: T, _info: Self::Info) -> Result<Self::Output, TransportError> {
        trace!("upgrading yamux inbound");
        Ok(Yamux::new(socket, self, Mode::Server))
    }

    async fn upgrade_outbound(self, socket: T, _info: Self::Info) -> Result<Self::Output, TransportError> {
        trace!("upgrading yamux outbound");
        Ok(Yamux::new(socket, self, Mode::Client))
    }
}

impl From<ConnectionError> for TransportError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::Closed => TransportError::ConnectionClosed,
            e => TransportError::StreamMuxerError(Box::new(e)),
        }
    }
}
