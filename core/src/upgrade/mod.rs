//! Upgrade machinery.
//!
//! An [`Upgrader`] turns a pipe into something richer: a secured pipe, a
//! muxed connection, or just the same pipe for protocols that carry no
//! state. Which upgrader runs is decided by multistream-select over the
//! names advertised through [`UpgradeInfo`].

pub mod dummy;
pub mod multistream;
pub mod select;

use crate::transport::TransportError;
use async_trait::async_trait;

pub use dummy::DummyUpgrader;
pub use multistream::Multistream;
pub use select::Selector;

/// Types that can be turned into a multistream protocol identifier.
pub trait ProtocolName {
    /// The raw identifier bytes, e.g. `b"/noise"`.
    fn protocol_name(&self) -> &[u8];
}

impl<T: AsRef<[u8]>> ProtocolName for T {
    fn protocol_name(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Common interface of all upgrades: the protocols they advertise.
pub trait UpgradeInfo: Send {
    type Info: ProtocolName + Clone + Send + Sync;

    /// The names this upgrade answers to, in preference order.
    fn protocol_info(&self) -> Vec<Self::Info>;
}

/// An upgrade that consumes a pipe and produces its upgraded form.
#[async_trait]
pub trait Upgrader<C: Send>: UpgradeInfo + Clone {
    type Output: Send;

    /// Upgrades an inbound (accepted) pipe, `info` being the protocol
    /// that was negotiated for it.
    async fn upgrade_inbound(self, socket: C, info: Self::Info) -> Result<Self::Output, TransportError>;

    /// Upgrades an outbound (dialed) pipe.
    async fn upgrade_outbound(self, socket: C, info: Self::Info) -> Result<Self::Output, TransportError>;
}
