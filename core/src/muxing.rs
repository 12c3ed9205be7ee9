//! Stream-muxer abstraction.
//!
//! A muxed connection carries many independent logical streams over one
//! underlying pipe. Concrete muxers (yamux) implement [`StreamMuxer`] and
//! hand out boxed [`ReadWriteEx`] streams.

use crate::secure_io::SecureInfo;
use crate::transport::{ConnectionInfo, TransportError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use strand_traits::{ReadEx, WriteEx};
use std::io;
use std::time::Instant;

/// Metadata of a muxed stream.
pub trait StreamInfo: Send {
    /// The muxer-assigned stream id.
    fn id(&self) -> usize;

    /// The application protocol selected for this stream, if any.
    fn protocol(&self) -> Option<String>;

    /// Records the application protocol selected for this stream.
    fn set_protocol(&mut self, proto: &str);
}

/// The full surface of a muxed stream: a byte pipe plus stream-level
/// control (reset, read deadline).
#[async_trait]
pub trait ReadWriteEx: ReadEx + WriteEx + StreamInfo {
    fn box_clone(&self) -> IReadWrite;

    /// Abruptly terminates the stream, discarding unread data. Pending
    /// reads observe end-of-stream and pending writes fail.
    async fn reset(&mut self) -> io::Result<()>;

    /// Sets the absolute deadline for subsequent reads. `None` clears it.
    fn set_read_deadline(&mut self, deadline: Option<Instant>);

    /// Whether the stream was terminated by a reset rather than an
    /// orderly half-close.
    fn is_reset(&self) -> bool;
}

pub type IReadWrite = Box<dyn ReadWriteEx>;

impl Clone for IReadWrite {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

#[async_trait]
impl ReadEx for IReadWrite {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read2(buf).await
    }
}

#[async_trait]
impl WriteEx for IReadWrite {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        (**self).flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        (**self).close2().await
    }
}

/// A connection that multiplexes logical streams.
#[async_trait]
pub trait StreamMuxer: Send {
    /// Opens a new outbound stream.
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError>;

    /// Waits for the next inbound stream, in SYN arrival order.
    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError>;

    /// Gracefully shuts the connection down, draining live streams.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the connection has terminated.
    fn is_closed(&self) -> bool;

    /// The background task driving the connection, to be spawned by the
    /// caller. Returns `None` when the task was already taken.
    fn task(&mut self) -> Option<BoxFuture<'static, ()>>;

    fn box_clone(&self) -> IStreamMuxer;
}

/// A muxer that also exposes the security and address information of the
/// connection it runs on.
pub trait StreamMuxerEx: StreamMuxer + SecureInfo + ConnectionInfo {}

pub type IStreamMuxer = Box<dyn StreamMuxerEx>;

impl Clone for IStreamMuxer {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
