use crate::either::{EitherName, EitherOutput};
use crate::transport::TransportError;
use crate::upgrade::{UpgradeInfo, Upgrader};
use async_trait::async_trait;

/// Combines two upgraders into one that supports the protocols of both.
///
/// The protocols of the first element have a higher priority.
#[derive(Debug, Copy, Clone)]
pub struct Selector<A, B>(A, B);

impl<A, B> Selector<A, B> {
    /// Combines two upgraders into a `Selector`.
    pub fn new(a: A, b: B) -> Self {
        Selector(a, b)
    }
}

impl<A, B> UpgradeInfo for Selector<A, B>
where
    A: UpgradeInfo,
    B: UpgradeInfo,
{
    type Info = EitherName<A::Info, B::Info>;

    fn protocol_info(&self) -> Vec<Self::Info> {
        let mut v = Vec::new();
        v.extend(self.0.protocol_info().into_iter().map(EitherName::A));
        v.extend(self.1.protocol_info().into_iter().map(EitherName::B));
        v
    }
}

#[async_trait]
impl<A, B, C> Upgrader<C> for Selector<A, B>
where
    A: Upgrader<C> + Send,
    B: Upgrader<C> + Send,
    C: Send + 'static,
{
    type Output = EitherOutput<A::Output, B::Output>;

    async fn upgrade_inbound(self, socket: C, info: Self::Info) -> Result<Self::Output, TransportError> {
        match info {
            EitherName::A(info) => Ok(EitherOutput::A(self.0.upgrade_inbound(socket, info).await?)),
            EitherName::B(info) => Ok(EitherOutput::B(self.1.upgrade_inbound(socket, info).await?)),
        }
    }

    async fn upgrade_outbound(self, socket: C, info: Self::Info) -> Result<Self::Output, TransportError> {
        match info {
            EitherName::A(info) => Ok(EitherOutput::A(self.0.upgrade_outbound(socket, info).await?)),
            EitherName::B(info) => Ok(EitherOutput::B(self.1.upgrade_outbound(socket, info).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::{DummyUpgrader, ProtocolName};

    #[test]
    fn advertises_both_sides() {
        let selector = Selector::new(DummyUpgrader::new(), DummyUpgrader::new());
        let info = selector.protocol_info();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].protocol_name(), b"/dummy/1.0.0");
    }

    #[test]
    fn dispatches_on_selected_branch() {
        let selector = Selector::new(DummyUpgrader::new(), DummyUpgrader::new());
        async_std::task::block_on(async move {
            let info = EitherName::<&'static [u8], &'static [u8]>::B(b"/dummy/1.0.0");
            let out = selector.upgrade_outbound(100u32, info).await.unwrap();
            assert!(matches!(out, EitherOutput::B(100)));
        });
    }
}
