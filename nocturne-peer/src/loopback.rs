//! In-memory transport delivering host notifications to peer mirrors.

use crate::error::PeerError;
use crate::mirror::{PeerEvent, PeerMirror};
use bytes::Bytes;
use nocturne_link::{ChannelId, PeerId, Transport, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Inner {
    peers: Mutex<HashMap<PeerId, PeerMirror>>,
    latency: Duration,
    fail_next: AtomicU32,
    delivered: AtomicU64,
    events: Option<mpsc::UnboundedSender<(PeerId, PeerEvent)>>,
}

/// Loopback link. Clones share the same set of attached peers.
#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<Inner>,
}

impl LoopbackTransport {
    pub fn new(latency: Duration) -> Self {
        Self::build(latency, None)
    }

    /// Like [`new`](Self::new), also forwarding every peer event.
    pub fn with_events(latency: Duration) -> (Self, mpsc::UnboundedReceiver<(PeerId, PeerEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(latency, Some(tx)), rx)
    }

    fn build(latency: Duration, events: Option<mpsc::UnboundedSender<(PeerId, PeerEvent)>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                peers: Mutex::new(HashMap::new()),
                latency,
                fail_next: AtomicU32::new(0),
                delivered: AtomicU64::new(0),
                events,
            }),
        }
    }

    pub fn attach(&self, peer: PeerId, mirror: PeerMirror) {
        self.inner.peers.lock().insert(peer, mirror);
    }

    pub fn detach(&self, peer: &PeerId) -> Option<PeerMirror> {
        self.inner.peers.lock().remove(peer)
    }

    /// Rejects the next `n` sends.
    pub fn fail_next(&self, n: u32) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    /// Writes accepted so far.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn with_mirror<R>(&self, peer: &PeerId, f: impl FnOnce(&mut PeerMirror) -> R) -> Result<R, PeerError> {
        let mut peers = self.inner.peers.lock();
        let mirror = peers
            .get_mut(peer)
            .ok_or_else(|| PeerError::NotAttached(peer.to_string()))?;
        Ok(f(mirror))
    }

    /// Drains what the peer wants to write back to the host.
    pub fn take_outbound(&self, peer: &PeerId) -> Result<Vec<Bytes>, PeerError> {
        self.with_mirror(peer, PeerMirror::take_outbound)
    }
}

impl Transport for LoopbackTransport {
    fn send(
        &self,
        peer: &PeerId,
        channel: ChannelId,
        bytes: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let inner = self.inner.clone();
        let peer = peer.clone();

        async move {
            if !inner.latency.is_zero() {
                tokio::time::sleep(inner.latency).await;
            }

            let injected = inner
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(TransportError::Rejected("injected failure".to_string()));
            }

            let events = {
                let mut peers = inner.peers.lock();
                let mirror = peers.get_mut(&peer).ok_or(TransportError::NotConnected)?;
                mirror.receive(channel, &bytes)
            };
            inner.delivered.fetch_add(1, Ordering::Relaxed);

            if let Some(tx) = &inner.events {
                for event in events {
                    let _ = tx.send((peer.clone(), event));
                }
            }
            Ok(())
        }
    }
}
