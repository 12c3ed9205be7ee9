//! strand: a libp2p connection upgrade pipeline.
//!
//! A raw transport pipe is upgraded in two negotiated stages into a
//! secure, multiplexed connection:
//!
//! ```text
//! raw pipe --(multistream: /noise)--> encrypted pipe
//!          --(multistream: /yamux/1.0.0)--> muxed connection
//! ```
//!
//! The crates of the workspace compose as follows: [`strand_core`]
//! holds identities, negotiation and the upgrader; [`strand_noise`] the
//! security layer; [`strand_yamux`] the stream multiplexer. This crate
//! re-exports the surface and adds the TCP transport.
//!
//! # Example
//!
//! ```no_run
//! use strand::transports::tcp::TcpTransport;
//! use strand::{Keypair, NoiseConfig, TransportUpgrade, YamuxConfig};
//! use strand_core::transport::Transport;
//! use strand_core::muxing::StreamMuxer;
//!
//! async fn dial() {
//!     let keypair = Keypair::generate_ed25519();
//!     let transport = TransportUpgrade::new(
//!         TcpTransport::default(),
//!         NoiseConfig::new(keypair),
//!         YamuxConfig::default(),
//!     );
//!     let mut conn = transport.dial("/ip4/127.0.0.1/tcp/4001".parse().unwrap()).await.unwrap();
//!     if let Some(task) = conn.task() {
//!         async_std::task::spawn(task);
//!     }
//!     let mut stream = conn.open_stream().await.unwrap();
//!     # let _ = stream;
//! }
//! ```

pub mod transports;

pub use strand_core::identity::Keypair;
pub use strand_core::multistream::Negotiator;
pub use strand_core::muxing::{IReadWrite, IStreamMuxer};
pub use strand_core::peerstore::PeerStore;
pub use strand_core::transport::upgrade::{TransportUpgrade, UpgradedConn};
pub use strand_core::transport::{ConnState, TransportError};
pub use strand_core::upgrade::Selector;
pub use strand_core::{Multiaddr, PeerId, PublicKey};
pub use strand_noise::NoiseConfig;
pub use strand_yamux::Config as YamuxConfig;
