//! Noise protocol I/O.
//!
//! After the handshake the session state is shared between a read half
//! and a write half, each owning its own strictly increasing nonce
//! counter. The write half is the only user of the send cipher and the
//! read half the only user of the receive cipher, so the two directions
//! can live on independent tasks.

mod framed;
pub(crate) mod handshake;

use crate::error::NoiseError;
use async_trait::async_trait;
use bytes::Bytes;
use framed::MAX_PLAINTEXT_LEN;
use log::trace;
use snow::StatelessTransportState;
use strand_core::identity::Keypair;
use strand_core::secure_io::SecureInfo;
use strand_core::transport::ConnectionInfo;
use strand_core::{Multiaddr, PeerId, PublicKey};
use strand_traits::{ReadEx, SplitEx, WriteEx};
use std::cmp::min;
use std::sync::Arc;
use std::{fmt, io};

/// A noise session to a remote.
///
/// `R` and `W` are the halves of the underlying raw pipe.
pub struct NoiseOutput<R, W> {
    reader: NoiseReader<R>,
    writer: NoiseWriter<W>,
    la: Multiaddr,
    ra: Multiaddr,
    local_priv_key: Keypair,
    remote_pub_key: PublicKey,
}

impl<R, W> fmt::Debug for NoiseOutput<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseOutput").field("remote", &self.remote_pub_key).finish()
    }
}

impl<R, W> NoiseOutput<R, W> {
    pub(crate) fn new(
        reader: R,
        writer: W,
        session: StatelessTransportState,
        local_priv_key: Keypair,
        remote_pub_key: PublicKey,
    ) -> Self {
        let session = Arc::new(session);
        NoiseOutput {
            reader: NoiseReader {
                io: reader,
                session: session.clone(),
                nonce: 0,
                recv_buffer: Bytes::new(),
                recv_offset: 0,
            },
            writer: NoiseWriter { io: writer, session, nonce: 0 },
            la: Multiaddr::empty(),
            ra: Multiaddr::empty(),
            local_priv_key,
            remote_pub_key,
        }
    }

    /// Records the addresses of the underlying pipe; the pipe itself was
    /// consumed by the handshake.
    pub fn add_addr(&mut self, la: Multiaddr, ra: Multiaddr) {
        self.la = la;
        self.ra = ra;
    }
}

impl<R, W> ConnectionInfo for NoiseOutput<R, W> {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

impl<R, W> SecureInfo for NoiseOutput<R, W> {
    fn local_peer(&self) -> PeerId {
        self.local_priv_key.public().into_peer_id()
    }

    fn remote_peer(&self) -> PeerId {
        self.remote_pub_key.clone().into_peer_id()
    }

    fn local_priv_key(&self) -> Keypair {
        self.local_priv_key.clone()
    }

    fn remote_pub_key(&self) -> PublicKey {
        self.remote_pub_key.clone()
    }
}

#[async_trait]
impl<R: ReadEx, W: Send> ReadEx for NoiseOutput<R, W> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read2(buf).await
    }
}

#[async_trait]
impl<R: Send, W: WriteEx> WriteEx for NoiseOutput<R, W> {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.writer.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.writer.close2().await
    }
}

impl<R, W> SplitEx for NoiseOutput<R, W>
where
    R: ReadEx + Unpin + 'static,
    W: WriteEx + Unpin + 'static,
{
    type Reader = NoiseReader<R>;
    type Writer = NoiseWriter<W>;

    fn split2(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

/// Decrypting read half of a noise session.
pub struct NoiseReader<R> {
    io: R,
    session: Arc<StatelessTransportState>,
    nonce: u64,
    recv_buffer: Bytes,
    recv_offset: usize,
}

#[async_trait]
impl<R: ReadEx> ReadEx for NoiseReader<R> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let len = self.recv_buffer.len();
            let off = self.recv_offset;
            if len > 0 {
                let n = min(len - off, buf.len());
                buf[..n].copy_from_slice(&self.recv_buffer[off..off + n]);
                trace!("read: copied {}/{} bytes", off + n, len);
                self.recv_offset += n;
                if len == self.recv_offset {
                    trace!("read: record consumed");
                    self.recv_buffer = Bytes::new();
                    self.recv_offset = 0;
                }
                return Ok(n);
            }

            match framed::recv_record(&mut self.io).await? {
                Some(record) => {
                    let mut plaintext = vec![0u8; record.len()];
                    let n = self
                        .session
                        .read_message(self.nonce, &record, &mut plaintext)
                        .map_err(|e| io::Error::from(NoiseError::from(e)))?;
                    self.nonce += 1;
                    plaintext.truncate(n);
                    self.recv_buffer = Bytes::from(plaintext);
                    self.recv_offset = 0;
                }
                // clean end of stream between records
                None => return Ok(0),
            }
        }
    }
}

/// Encrypting write half of a noise session.
pub struct NoiseWriter<W> {
    io: W,
    session: Arc<StatelessTransportState>,
    nonce: u64,
}

#[async_trait]
impl<W: WriteEx> WriteEx for NoiseWriter<W> {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        // One AEAD record per chunk; the receiver gets each record as a
        // unit, so boundaries within `buf` are not preserved.
        for chunk in buf.chunks(MAX_PLAINTEXT_LEN) {
            let mut record = vec![0u8; chunk.len() + framed::TAG_LEN];
            let n = self
                .session
                .write_message(self.nonce, chunk, &mut record)
                .map_err(|e| io::Error::from(NoiseError::from(e)))?;
            self.nonce += 1;
            record.truncate(n);
            framed::send_record(&mut self.io, &record)
                .await
                .map_err(io::Error::from)?;
        }
        Ok(buf.len())
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.io.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.io.close2().await
    }
}
