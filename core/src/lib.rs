//! Core building blocks of strand.
//!
//! The main concepts are:
//!
//! - A [`PeerId`] is a unique global identifier for a node on the network,
//!   derived from the public key it uses to secure its connections, so
//!   that it cannot be spoofed.
//! - A [`transport::Transport`] produces raw byte pipes, and
//!   [`transport::upgrade::TransportUpgrade`] layers security and stream
//!   multiplexing on top of them via multistream-select negotiation.
//! - The [`upgrade`] module holds the negotiation machinery shared by all
//!   protocol upgrades.

mod keys_proto;
mod peer_id;

pub mod either;
pub mod identity;
pub mod multistream;
pub mod muxing;
pub mod peerstore;
pub mod resource;
pub mod secure_io;
pub mod transport;
pub mod upgrade;

pub use identity::{Keypair, PublicKey};
pub use multiaddr::Multiaddr;
pub use peer_id::PeerId;
