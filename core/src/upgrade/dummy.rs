use crate::transport::TransportError;
use crate::upgrade::{UpgradeInfo, Upgrader};
use async_trait::async_trait;
use log::trace;

/// An upgrade that hands the pipe back untouched.
///
/// Useful in tests and as the "plaintext" security placeholder.
#[derive(Debug, Copy, Clone)]
pub struct DummyUpgrader;

impl DummyUpgrader {
    pub fn new() -> Self {
        DummyUpgrader
    }
}

impl Default for DummyUpgrader {
    fn default() -> Self {
        DummyUpgrader
    }
}

impl UpgradeInfo for DummyUpgrader {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/dummy/1.0.0"]
    }
}

#[async_trait]
impl<C: Send + 'static> Upgrader<C> for DummyUpgrader {
    type Output = C;

    async fn upgrade_inbound(self, socket: C, _info: Self::Info) -> Result<Self::Output, TransportError> {
        trace!("dummy upgrade, inbound");
        Ok(socket)
    }

    async fn upgrade_outbound(self, socket: C, _info: Self::Info) -> Result<Self::Output, TransportError> {
        trace!("dummy upgrade, outbound");
        Ok(socket)
    }
}
