//! Wire format of the signed handshake payload.
//!
//! Hand-maintained `prost` counterpart of the libp2p-noise
//! `payload.proto` schema.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NoiseHandshakePayload {
    /// Protobuf-encoded identity public key of the sender.
    #[prost(bytes = "vec", tag = "1")]
    pub identity_key: ::prost::alloc::vec::Vec<u8>,
    /// Signature binding the sender's noise static key to its identity.
    #[prost(bytes = "vec", tag = "2")]
    pub identity_sig: ::prost::alloc::vec::Vec<u8>,
    /// Reserved for protocol extensions.
    #[prost(bytes = "vec", tag = "3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
