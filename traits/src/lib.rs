//! Asynchronous I/O traits used throughout strand.
//!
//! Every byte pipe in the stack, from a raw TCP socket up to an encrypted
//! and multiplexed stream, exposes the same small surface: [`ReadEx`] and
//! [`WriteEx`]. Layers that need to hand the two directions of a pipe to
//! independent tasks additionally implement [`SplitEx`].
//!
//! The methods carry a `2` suffix to stay clear of the inherent methods of
//! `futures::io` extension traits, which are blanket-bridged below.

use async_trait::async_trait;
use futures::io::{AsyncReadExt, AsyncWriteExt};
use futures::prelude::*;
use std::io;

/// A non-blocking byte source.
#[async_trait]
pub trait ReadEx: Send {
    /// Reads some bytes into `buf`, returning how many were read.
    ///
    /// `Ok(0)` signals end of stream, unless `buf` was empty.
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads exactly `buf.len()` bytes.
    ///
    /// Fails with `UnexpectedEof` if the stream ends first.
    async fn read_exact2(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read2(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(())
    }
}

/// A non-blocking byte sink.
#[async_trait]
pub trait WriteEx: Send {
    /// Writes some bytes from `buf`, returning how many were accepted.
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Writes the whole of `buf`.
    async fn write_all2(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write2(&buf[written..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            written += n;
        }
        Ok(())
    }

    /// Flushes any buffered bytes down to the underlying pipe.
    async fn flush2(&mut self) -> io::Result<()>;

    /// Closes the writing side of the pipe.
    async fn close2(&mut self) -> io::Result<()>;
}

/// Splits a bidirectional pipe into independently owned halves.
///
/// The halves must be usable from different tasks; a session typically
/// moves the reader into its inbound loop and the writer into its
/// outbound loop.
pub trait SplitEx {
    type Reader: ReadEx + Unpin + Send + 'static;
    type Writer: WriteEx + Unpin + Send + 'static;

    fn split2(self) -> (Self::Reader, Self::Writer);
}

/// A pipe that supports the full surface needed by an upgrade layer:
/// reading, writing and splitting.
pub trait SplittableReadWrite: ReadEx + WriteEx + SplitEx + Unpin + Send + 'static {}

impl<T: ReadEx + WriteEx + SplitEx + Unpin + Send + 'static> SplittableReadWrite for T {}

#[async_trait]
impl<T: AsyncRead + Unpin + Send> ReadEx for T {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

#[async_trait]
impl<T: AsyncWrite + Unpin + Send> WriteEx for T {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        AsyncWriteExt::write(self, buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(self).await
    }

    async fn close2(&mut self) -> io::Result<()> {
        AsyncWriteExt::close(self).await
    }
}

/// `async-std` TCP streams are clonable handles onto one socket, which
/// makes splitting trivial.
impl SplitEx for async_std::net::TcpStream {
    type Reader = async_std::net::TcpStream;
    type Writer = async_std::net::TcpStream;

    fn split2(self) -> (Self::Reader, Self::Writer) {
        (self.clone(), self)
    }
}
