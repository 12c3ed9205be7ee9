use crate::PublicKey;
use sha2::{Digest, Sha256};
use thiserror::Error;
use std::{fmt, str::FromStr};

/// Identifier of a peer on the network.
///
/// A `PeerId` is the SHA-256 digest of the peer's encoded public identity
/// key; possession of the matching private key is what proves ownership
/// of the id during the security handshake.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    digest: [u8; 32],
}

impl PeerId {
    /// Derives the id of the peer owning `key`.
    pub fn from_public_key(key: &PublicKey) -> PeerId {
        let digest = Sha256::digest(key.into_protobuf_encoding());
        PeerId { digest: digest.into() }
    }

    /// Builds a `PeerId` from its raw 32 bytes.
    pub fn from_bytes(digest: [u8; 32]) -> PeerId {
        PeerId { digest }
    }

    /// Generates a random id, not tied to any key. Useful for tests and
    /// for keying bookkeeping structures before a handshake completed.
    pub fn random() -> PeerId {
        PeerId { digest: rand::random() }
    }

    /// The raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8] {
        &self.digest
    }

    /// Base58 rendering of the id.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.digest).into_string()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.to_base58()).finish()
    }
}

impl From<PublicKey> for PeerId {
    fn from(key: PublicKey) -> PeerId {
        PeerId::from_public_key(&key)
    }
}

/// Error when parsing a textual peer id.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("peer id is not valid base58")]
    Base58,
    #[error("peer id has invalid length")]
    Length,
}

impl FromStr for PeerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec().map_err(|_| ParseError::Base58)?;
        let digest: [u8; 32] = bytes.try_into().map_err(|_| ParseError::Length)?;
        Ok(PeerId { digest })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keypair;

    #[test]
    fn derived_from_public_key_is_stable() {
        let key = Keypair::generate_ed25519().public();
        assert_eq!(PeerId::from_public_key(&key), PeerId::from_public_key(&key));
    }

    #[test]
    fn base58_roundtrip() {
        let id = PeerId::random();
        let parsed: PeerId = id.to_base58().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn different_keys_different_ids() {
        let a = Keypair::generate_ed25519().public().into_peer_id();
        let b = Keypair::generate_ed25519().public().into_peer_id();
        assert_ne!(a, b);
    }
}
