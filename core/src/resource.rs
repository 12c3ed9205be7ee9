//! Resource-manager contract.
//!
//! The upgrade pipeline reports connection and stream lifecycles to an
//! external resource manager, which may deny an open to enforce limits.
//! The core only does the accounting calls; policy lives elsewhere.

use crate::transport::{Direction, TransportError};
use crate::{Multiaddr, PeerId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Accounting scope of one connection.
pub trait ConnScope: Send + Sync {
    /// Attaches the authenticated remote peer to the scope.
    fn set_peer(&self, peer_id: &PeerId);

    /// Releases the scope. Idempotent.
    fn done(&self);
}

/// Accounting scope of one muxed stream.
pub trait StreamScope: Send + Sync {
    /// Releases the scope. Idempotent.
    fn done(&self);
}

/// External resource accounting.
pub trait ResourceManager: Send + Sync {
    fn open_connection(
        &self,
        dir: Direction,
        remote_addr: &Multiaddr,
    ) -> Result<Arc<dyn ConnScope>, TransportError>;

    fn open_stream(&self, peer: &PeerId, dir: Direction) -> Result<Arc<dyn StreamScope>, TransportError>;
}

/// A resource manager that admits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResourceManager;

struct NullScope;

impl ConnScope for NullScope {
    fn set_peer(&self, _peer_id: &PeerId) {}
    fn done(&self) {}
}

impl StreamScope for NullScope {
    fn done(&self) {}
}

impl ResourceManager for NullResourceManager {
    fn open_connection(
        &self,
        _dir: Direction,
        _remote_addr: &Multiaddr,
    ) -> Result<Arc<dyn ConnScope>, TransportError> {
        Ok(Arc::new(NullScope))
    }

    fn open_stream(&self, _peer: &PeerId, _dir: Direction) -> Result<Arc<dyn StreamScope>, TransportError> {
        Ok(Arc::new(NullScope))
    }
}

/// A resource manager enforcing a fixed connection cap. Mostly useful to
/// exercise the denial path in tests.
#[derive(Debug)]
pub struct CountingResourceManager {
    max_connections: usize,
    active: Arc<AtomicUsize>,
}

impl CountingResourceManager {
    pub fn new(max_connections: usize) -> Self {
        CountingResourceManager {
            max_connections,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct CountedScope {
    active: Arc<AtomicUsize>,
    released: AtomicBool,
}

impl ConnScope for CountedScope {
    fn set_peer(&self, _peer_id: &PeerId) {}

    fn done(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl ResourceManager for CountingResourceManager {
    fn open_connection(
        &self,
        _dir: Direction,
        _remote_addr: &Multiaddr,
    ) -> Result<Arc<dyn ConnScope>, TransportError> {
        let prev = self.active.fetch_add(1, Ordering::SeqCst);
        if prev >= self.max_connections {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::ResourceLimitExceeded);
        }
        Ok(Arc::new(CountedScope {
            active: self.active.clone(),
            released: AtomicBool::new(false),
        }))
    }

    fn open_stream(&self, _peer: &PeerId, _dir: Direction) -> Result<Arc<dyn StreamScope>, TransportError> {
        Ok(Arc::new(NullScope))
    }
}
