//! An in-process transport over channel-backed pipes.
//!
//! Connections are addressed as `/memory/<port>`. The transport is the
//! deterministic substrate used by unit tests across the workspace.

use crate::transport::{ConnectionInfo, Transport, TransportError, TransportListener};
use crate::Multiaddr;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::prelude::*;
use multiaddr::Protocol;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

static LISTENER_HUB: Lazy<Mutex<HashMap<u64, mpsc::UnboundedSender<MemorySocket>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn hub() -> std::sync::MutexGuard<'static, HashMap<u64, mpsc::UnboundedSender<MemorySocket>>> {
    LISTENER_HUB.lock().unwrap_or_else(|e| e.into_inner())
}

fn memory_addr(port: u64) -> Multiaddr {
    let mut addr = Multiaddr::empty();
    addr.push(Protocol::Memory(port));
    addr
}

fn parse_memory_addr(addr: &Multiaddr) -> Option<u64> {
    let mut iter = addr.iter();
    match (iter.next(), iter.next()) {
        (Some(Protocol::Memory(port)), None) => Some(port),
        _ => None,
    }
}

/// Transport for `/memory/<port>` addresses.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryTransport;

#[async_trait]
impl Transport for MemoryTransport {
    type Output = MemorySocket;
    type Listener = MemoryListener;

    fn listen_on(self, addr: Multiaddr) -> Result<Self::Listener, TransportError> {
        let requested = parse_memory_addr(&addr)
            .ok_or_else(|| TransportError::MultiaddrNotSupported(addr.clone()))?;

        let mut hub = hub();
        let port = if requested == 0 {
            loop {
                let candidate = rand::random::<u64>().saturating_add(1);
                if !hub.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else if hub.contains_key(&requested) {
            return Err(TransportError::Io(io::ErrorKind::AddrInUse.into()));
        } else {
            requested
        };

        let (tx, rx) = mpsc::unbounded();
        hub.insert(port, tx);
        Ok(MemoryListener { port, incoming: rx })
    }

    async fn dial(self, addr: Multiaddr) -> Result<Self::Output, TransportError> {
        let port = parse_memory_addr(&addr)
            .filter(|p| *p != 0)
            .ok_or_else(|| TransportError::MultiaddrNotSupported(addr.clone()))?;

        let sender = hub()
            .get(&port)
            .cloned()
            .ok_or_else(|| TransportError::Io(io::ErrorKind::ConnectionRefused.into()))?;

        let local = memory_addr(rand::random::<u64>().saturating_add(1));
        let remote = memory_addr(port);
        let (dialer, listener_side) = MemorySocket::pair(local, remote);
        sender
            .unbounded_send(listener_side)
            .map_err(|_| TransportError::Io(io::ErrorKind::ConnectionRefused.into()))?;
        Ok(dialer)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Listener half of the memory transport.
pub struct MemoryListener {
    port: u64,
    incoming: mpsc::UnboundedReceiver<MemorySocket>,
}

#[async_trait]
impl TransportListener for MemoryListener {
    type Output = MemorySocket;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        self.incoming
            .next()
            .await
            .ok_or_else(|| TransportError::Io(io::ErrorKind::BrokenPipe.into()))
    }

    fn multi_addr(&self) -> Multiaddr {
        memory_addr(self.port)
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        hub().remove(&self.port);
    }
}

/// One end of an in-process duplex pipe.
pub struct MemorySocket {
    reader: MemoryReader,
    writer: MemoryWriter,
    la: Multiaddr,
    ra: Multiaddr,
}

impl MemorySocket {
    /// Creates a connected pair of sockets with the given addresses as
    /// seen from the first socket.
    pub fn pair(la: Multiaddr, ra: Multiaddr) -> (MemorySocket, MemorySocket) {
        let (a_tx, b_rx) = mpsc::unbounded();
        let (b_tx, a_rx) = mpsc::unbounded();
        let a = MemorySocket {
            reader: MemoryReader { incoming: a_rx, current: Vec::new(), offset: 0 },
            writer: MemoryWriter { outgoing: a_tx },
            la: la.clone(),
            ra: ra.clone(),
        };
        let b = MemorySocket {
            reader: MemoryReader { incoming: b_rx, current: Vec::new(), offset: 0 },
            writer: MemoryWriter { outgoing: b_tx },
            la: ra,
            ra: la,
        };
        (a, b)
    }

    /// A connected pair with synthetic addresses, for tests.
    pub fn unbounded_pair() -> (MemorySocket, MemorySocket) {
        MemorySocket::pair(memory_addr(1), memory_addr(2))
    }
}

impl ConnectionInfo for MemorySocket {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

#[async_trait]
impl strand_traits::ReadEx for MemorySocket {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read2(buf).await
    }
}

#[async_trait]
impl strand_traits::WriteEx for MemorySocket {
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

impl strand_traits::SplitEx for MemorySocket {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split2(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

/// Read half of a [`MemorySocket`].
pub struct MemoryReader {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    current: Vec<u8>,
    offset: usize,
}

#[async_trait]
impl strand_traits::ReadEx for MemoryReader {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.offset < self.current.len() {
                let n = std::cmp::min(buf.len(), self.current.len() - self.offset);
                buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            match self.incoming.next().await {
                Some(chunk) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                // all writers gone: end of stream
                None => return Ok(0),
            }
        }
    }
}

/// Write half of a [`MemorySocket`].
pub struct MemoryWriter {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl strand_traits::WriteEx for MemoryWriter {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.outgoing
            .unbounded_send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    async fn flush2(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.outgoing.close_channel();
        Ok(())
    }
}
