use crate::multistream::Negotiator;
use crate::transport::TransportError;
use crate::upgrade::{ProtocolName, Upgrader};
use log::trace;
use strand_traits::{ReadEx, WriteEx};

/// Couples an [`Upgrader`] with the multistream-select exchange that
/// decides which of its protocols to run.
///
/// The protocols supported by the inner upgrader are proposed (outbound)
/// or answered (inbound) in the order of `protocol_info()`; the first
/// element has the highest priority.
#[derive(Debug, Clone)]
pub struct Multistream<U> {
    inner: U,
}

impl<U> Multistream<U> {
    /// Adds multistream-select on top of any [`Upgrader`].
    pub fn new(inner: U) -> Self {
        Self { inner }
    }
}

impl<U> Multistream<U> {
    /// Responder side: answers the remote's proposals, then runs the
    /// inbound upgrade for whichever protocol was agreed.
    ///
    /// Returns the negotiated protocol name next to the upgrade output.
    pub async fn select_inbound<C>(self, mut socket: C) -> Result<(String, U::Output), TransportError>
    where
        C: ReadEx + WriteEx + Send + 'static,
        U: Upgrader<C> + Send,
    {
        trace!("starting multistream select for inbound...");
        let negotiator = Negotiator::new_with_protocols(self.inner.protocol_info());
        let info = negotiator.negotiate(&mut socket).await?;
        let name = String::from_utf8_lossy(info.protocol_name()).into_owned();
        let output = self.inner.upgrade_inbound(socket, info).await?;
        Ok((name, output))
    }

    /// Initiator side: proposes our protocols in preference order, then
    /// runs the outbound upgrade for the selected one.
    pub async fn select_outbound<C>(self, mut socket: C) -> Result<(String, U::Output), TransportError>
    where
        C: ReadEx + WriteEx + Send + 'static,
        U: Upgrader<C> + Send,
    {
        trace!("starting multistream select for outbound...");
        let negotiator = Negotiator::new_with_protocols(self.inner.protocol_info());
        let info = negotiator.select_one(&mut socket).await?;
        let name = String::from_utf8_lossy(info.protocol_name()).into_owned();
        let output = self.inner.upgrade_outbound(socket, info).await?;
        Ok((name, output))
    }
}
