use crate::{PeerId, PublicKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::fmt;

/// Shared store of the public keys learned from security handshakes.
///
/// Handles are cheap to clone; all clones observe the same book.
#[derive(Clone, Default)]
pub struct PeerStore {
    inner: Arc<Mutex<KeyBook>>,
}

#[derive(Default)]
struct KeyBook {
    book: HashMap<PeerId, PublicKey>,
}

impl fmt::Debug for PeerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let book = self.lock();
        f.debug_tuple("PeerStore").field(&book.book.len()).finish()
    }
}

impl PeerStore {
    pub fn new() -> Self {
        PeerStore::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KeyBook> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records the public key of a peer.
    pub fn add_pub_key(&self, peer_id: &PeerId, key: PublicKey) {
        self.lock().book.insert(*peer_id, key);
    }

    /// Looks up the public key of a peer.
    pub fn pub_key(&self, peer_id: &PeerId) -> Option<PublicKey> {
        self.lock().book.get(peer_id).cloned()
    }

    /// Forgets everything known about a peer.
    pub fn del_peer(&self, peer_id: &PeerId) {
        self.lock().book.remove(peer_id);
    }
}
