//! Node identity keys.
//!
//! A node proves who it is by signing handshake material with its
//! long-term identity keypair. Only ed25519 keys are supported; the key
//! type is kept as an enum so the wire format stays compatible with
//! peers using other schemes.

use crate::keys_proto;
use crate::PeerId;
use ed25519_dalek::{Signer, Verifier};
use prost::Message;
use rand::rngs::OsRng;
use thiserror::Error;
use std::fmt;

/// Identity keypair of a node.
#[derive(Clone)]
pub enum Keypair {
    Ed25519(ed25519::Keypair),
}

impl Keypair {
    /// Generates a fresh ed25519 keypair.
    pub fn generate_ed25519() -> Keypair {
        Keypair::Ed25519(ed25519::Keypair::generate())
    }

    /// Signs `msg` with this keypair.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, SigningError> {
        match self {
            Keypair::Ed25519(kp) => Ok(kp.sign(msg)),
        }
    }

    /// The public half of this keypair.
    pub fn public(&self) -> PublicKey {
        match self {
            Keypair::Ed25519(kp) => PublicKey::Ed25519(kp.public()),
        }
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Keypair::Ed25519(_) => f.debug_struct("Keypair::Ed25519").finish(),
        }
    }
}

/// Public identity key of a node.
#[derive(Clone, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519(ed25519::PublicKey),
}

impl PublicKey {
    /// Verifies `sig` over `msg` with this key.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(pk) => pk.verify(msg, sig),
        }
    }

    /// Encodes the key into the protobuf wire format used during
    /// security handshakes.
    pub fn into_protobuf_encoding(&self) -> Vec<u8> {
        let proto = keys_proto::PublicKey {
            r#type: match self {
                PublicKey::Ed25519(_) => keys_proto::KeyType::Ed25519 as i32,
            },
            data: match self {
                PublicKey::Ed25519(pk) => pk.to_bytes().to_vec(),
            },
        };
        let mut buf = Vec::with_capacity(proto.encoded_len());
        proto.encode(&mut buf).expect("Vec<u8> provides capacity as needed");
        buf
    }

    /// Decodes a key from the protobuf wire format.
    pub fn from_protobuf_encoding(bytes: &[u8]) -> Result<PublicKey, DecodingError> {
        let proto = keys_proto::PublicKey::decode(bytes).map_err(|_| DecodingError::BadProtobuf)?;
        match keys_proto::KeyType::from_i32(proto.r#type) {
            Some(keys_proto::KeyType::Ed25519) => {
                ed25519::PublicKey::from_bytes(&proto.data).map(PublicKey::Ed25519)
            }
            _ => Err(DecodingError::UnsupportedKeyType(proto.r#type)),
        }
    }

    /// Derives the [`PeerId`] owning this key.
    pub fn into_peer_id(self) -> PeerId {
        PeerId::from_public_key(&self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicKey::Ed25519(pk) => f
                .debug_tuple("Ed25519")
                .field(&bs58::encode(pk.to_bytes()).into_string())
                .finish(),
        }
    }
}

/// An error during signing.
#[derive(Debug, Error)]
#[error("signing failed")]
pub struct SigningError;

/// An error while decoding key material received from a remote.
#[derive(Debug, Error)]
pub enum DecodingError {
    #[error("malformed protobuf in key material")]
    BadProtobuf,
    #[error("unsupported key type {0}")]
    UnsupportedKeyType(i32),
    #[error("key has invalid length or encoding")]
    BadKey,
}

/// Ed25519 keys.
pub mod ed25519 {
    use super::DecodingError;
    use super::*;

    /// An ed25519 signing keypair.
    #[derive(Clone)]
    pub struct Keypair(ed25519_dalek::SigningKey);

    impl Keypair {
        /// Generates a keypair from the system RNG.
        pub fn generate() -> Keypair {
            Keypair(ed25519_dalek::SigningKey::generate(&mut OsRng))
        }

        pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
            self.0.sign(msg).to_bytes().to_vec()
        }

        pub fn public(&self) -> PublicKey {
            PublicKey(self.0.verifying_key())
        }
    }

    /// An ed25519 verification key.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PublicKey(ed25519_dalek::VerifyingKey);

    impl PublicKey {
        pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
            ed25519_dalek::Signature::from_slice(sig)
                .map(|s| self.0.verify(msg, &s).is_ok())
                .unwrap_or(false)
        }

        pub fn to_bytes(&self) -> [u8; 32] {
            self.0.to_bytes()
        }

        pub fn from_bytes(bytes: &[u8]) -> Result<PublicKey, DecodingError> {
            let bytes: [u8; 32] = bytes.try_into().map_err(|_| DecodingError::BadKey)?;
            ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map(PublicKey)
                .map_err(|_| DecodingError::BadKey)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::generate_ed25519();
        let sig = kp.sign(b"attack at dawn").unwrap();
        assert!(kp.public().verify(b"attack at dawn", &sig));
        assert!(!kp.public().verify(b"attack at dusk", &sig));
    }

    #[test]
    fn protobuf_roundtrip() {
        let pk = Keypair::generate_ed25519().public();
        let encoded = pk.into_protobuf_encoding();
        let decoded = PublicKey::from_protobuf_encoding(&encoded).unwrap();
        assert_eq!(pk, decoded);
    }

    #[test]
    fn rejects_garbage_keys() {
        assert!(PublicKey::from_protobuf_encoding(b"not a key").is_err());
    }
}
