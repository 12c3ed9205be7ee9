//! Noise XX security upgrade.
//!
//! Secures a raw pipe with the `Noise_XX_25519_ChaChaPoly_SHA256`
//! handshake. Each side generates a fresh static Diffie-Hellman key for
//! the handshake and binds it to its long-term identity key by signing
//! `"noise-libp2p-static-key:" || static_public_key`; the signed payload
//! travels inside the handshake messages, so both identities are
//! authenticated by the time the transport ciphers are derived.
//!
//! After the handshake the pipe carries length-prefixed AEAD records of
//! at most 65535 bytes, each encrypted under a strictly increasing
//! per-direction nonce.

mod handshake_proto;

pub mod error;
pub mod io;

use async_trait::async_trait;
use log::trace;
use strand_core::identity::Keypair;
use strand_core::transport::{ConnectionInfo, TransportError};
use strand_core::upgrade::{UpgradeInfo, Upgrader};
use strand_traits::SplittableReadWrite;

pub use error::NoiseError;
pub use io::{NoiseOutput, NoiseReader, NoiseWriter};

/// The noise pattern every peer in the network runs.
pub(crate) const NOISE_PARAMS: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// The protocol id under which this upgrade is negotiated.
pub const NOISE_PROTOCOL: &[u8] = b"/noise";

/// Config for the noise security upgrade.
#[derive(Clone)]
pub struct NoiseConfig {
    keypair: Keypair,
}

impl NoiseConfig {
    /// Creates a config authenticating as `keypair`.
    pub fn new(keypair: Keypair) -> Self {
        NoiseConfig { keypair }
    }

    /// Runs the handshake in the initiator role.
    pub async fn handshake_outbound<T>(
        self,
        mut socket: T,
    ) -> Result<NoiseOutput<T::Reader, T::Writer>, NoiseError>
    where
        T: SplittableReadWrite,
    {
        let (session, remote_pub_key) = io::handshake::initiate(&mut socket, &self.keypair).await?;
        let (reader, writer) = socket.split2();
        Ok(NoiseOutput::new(reader, writer, session, self.keypair, remote_pub_key))
    }

    /// Runs the handshake in the responder role.
    pub async fn handshake_inbound<T>(
        self,
        mut socket: T,
    ) -> Result<NoiseOutput<T::Reader, T::Writer>, NoiseError>
    where
        T: SplittableReadWrite,
    {
        let (session, remote_pub_key) = io::handshake::respond(&mut socket, &self.keypair).await?;
        let (reader, writer) = socket.split2();
        Ok(NoiseOutput::new(reader, writer, session, self.keypair, remote_pub_key))
    }
}

impl UpgradeInfo for NoiseConfig {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![NOISE_PROTOCOL]
    }
}

#[async_trait]
impl<T> Upgrader<T> for NoiseConfig
where
    T: ConnectionInfo + SplittableReadWrite,
{
    type Output = NoiseOutput<T::Reader, T::Writer>;

    async fn upgrade_inbound(self, socket: T, _info: Self::Info) -> Result<Self::Output, TransportError> {
        trace!("upgrading noise inbound");
        let la = socket.local_multiaddr();
        let ra = socket.remote_multiaddr();
        let mut output = self
            .handshake_inbound(socket)
            .await
            .map_err(|e| TransportError::SecurityError(Box::new(e)))?;
        output.add_addr(la, ra);
        Ok(output)
    }

    async fn upgrade_outbound(self, socket: T, _info: Self::Info) -> Result<Self::Output, TransportError> {
        trace!("upgrading noise outbound");
        let la = socket.local_multiaddr();
        let ra = socket.remote_multiaddr();
        let mut output = self
            .handshake_outbound(socket)
            .await
            .map_err(|e| TransportError::SecurityError(Box::new(e)))?;
        output.add_addr(la, ra);
        Ok(output)
    }
}
