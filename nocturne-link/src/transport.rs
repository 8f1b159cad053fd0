//! Outbound transport seam.

use crate::error::TransportError;
use crate::session::{ChannelId, PeerId};
use bytes::Bytes;
use std::future::Future;

/// Delivers encoded frames to a peer over one channel.
///
/// Implemented by the platform radio binding. `send` resolves once the
/// bytes were accepted or rejected by the link.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        peer: &PeerId,
        channel: ChannelId,
        bytes: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Adapts a closure returning `bool` into a [`Transport`].
pub struct FnTransport<F> {
    f: F,
}

impl<F, Fut> FnTransport<F>
where
    F: Fn(PeerId, ChannelId, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(PeerId, ChannelId, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send,
{
    fn send(
        &self,
        peer: &PeerId,
        channel: ChannelId,
        bytes: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let fut = (self.f)(peer.clone(), channel, bytes);
        async move {
            if fut.await {
                Ok(())
            } else {
                Err(TransportError::Rejected("transport returned false".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fn_transport() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = FnTransport::new(move |_peer, channel, bytes: Bytes| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { channel == ChannelId::Bulk && !bytes.is_empty() }
        });

        let peer = PeerId::from("p");
        tokio_test::assert_ok!(
            transport
                .send(&peer, ChannelId::Bulk, Bytes::from_static(b"x"))
                .await
        );
        let err = tokio_test::assert_err!(transport.send(&peer, ChannelId::State, Bytes::new()).await);
        assert!(matches!(err, TransportError::Rejected(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
