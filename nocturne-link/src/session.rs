//! Peer sessions.

use crate::queue::CancelToken;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nocturne_protocol::{Capabilities, Decoder, Features, Frame, FullState, GradientColors};
use nocturne_transfer::{AssetClass, DEFAULT_MTU};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Identifier of a connected peer (central address or platform handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed set of byte-stream channels exposed to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Peer writes commands.
    Command,
    /// Host notifies state.
    State,
    /// Host notifies bulk transfer frames.
    Bulk,
    /// Read-only device info document.
    Info,
}

impl ChannelId {
    pub const ALL: [ChannelId; 4] = [
        ChannelId::Command,
        ChannelId::State,
        ChannelId::Bulk,
        ChannelId::Info,
    ];

    /// Characteristic UUID of this channel.
    pub fn uuid(self) -> Uuid {
        match self {
            ChannelId::Command => Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E),
            ChannelId::State => Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E),
            ChannelId::Info => Uuid::from_u128(0x6E400005_B5A3_F393_E0A9_E50E24DCCA9E),
            ChannelId::Bulk => Uuid::from_u128(0x6E400006_B5A3_F393_E0A9_E50E24DCCA9E),
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }

    /// Channel a host-originated frame is notified on.
    pub fn for_frame(frame: &Frame) -> Self {
        match frame.message_type.namespace() {
            nocturne_protocol::Namespace::BulkTransfer => ChannelId::Bulk,
            _ => ChannelId::State,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelId::Command => "command",
            ChannelId::State => "state",
            ChannelId::Bulk => "bulk",
            ChannelId::Info => "info",
        };
        f.write_str(name)
    }
}

/// Unique id of one transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to an active transfer, shared between the sender and its session.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    pub id: TransferId,
    pub class: AssetClass,
    pub checksum: [u8; 32],
    cancel: CancelToken,
    failure_end: Frame,
}

impl TransferHandle {
    pub fn new(class: AssetClass, checksum: [u8; 32], failure_end: Frame) -> Self {
        Self {
            id: TransferId::new(),
            class,
            checksum,
            cancel: CancelToken::new(),
            failure_end,
        }
    }

    /// Cancels the transfer. Returns true only for the first call.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// End frame telling the peer to discard this transfer.
    pub fn failure_end(&self) -> Frame {
        self.failure_end.clone()
    }
}

/// Per-peer state.
pub struct PeerSession {
    pub id: PeerId,
    /// Negotiated MTU. Transfers read it once when they are planned.
    pub mtu: u16,
    subscriptions: HashSet<ChannelId>,
    binary_protocol: bool,
    capabilities: Option<Capabilities>,
    active_transfers: HashMap<AssetClass, TransferHandle>,
    last_state: Option<FullState>,
    last_gradient: Option<GradientColors>,
    decoder: Decoder,
    connected_at: Instant,
}

impl PeerSession {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            mtu: DEFAULT_MTU,
            subscriptions: HashSet::new(),
            binary_protocol: false,
            capabilities: None,
            active_transfers: HashMap::new(),
            last_state: None,
            last_gradient: None,
            decoder: Decoder::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn is_subscribed(&self, channel: ChannelId) -> bool {
        self.subscriptions.contains(&channel)
    }

    pub fn set_subscribed(&mut self, channel: ChannelId, subscribed: bool) {
        if subscribed {
            self.subscriptions.insert(channel);
        } else {
            self.subscriptions.remove(&channel);
            if channel == ChannelId::State {
                self.last_state = None;
                self.last_gradient = None;
            }
        }
    }

    pub fn supports_binary_protocol(&self) -> bool {
        self.binary_protocol
    }

    pub fn enable_binary_protocol(&mut self) {
        self.binary_protocol = true;
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Stores the peer's capabilities. Advertising the binary feature enables it.
    pub fn set_capabilities(&mut self, caps: Capabilities) {
        if caps.features.contains(Features::BINARY_PROTOCOL) {
            self.binary_protocol = true;
        }
        self.capabilities = Some(caps);
    }

    /// Features the peer advertised, empty until capabilities arrive.
    pub fn features(&self) -> Features {
        self.capabilities
            .map(|c| c.features)
            .unwrap_or_default()
    }

    pub fn active_transfer(&self, class: AssetClass) -> Option<&TransferHandle> {
        self.active_transfers.get(&class)
    }

    /// Installs a new active transfer, returning the one it replaces.
    pub fn replace_transfer(&mut self, handle: TransferHandle) -> Option<TransferHandle> {
        self.active_transfers.insert(handle.class, handle)
    }

    /// Clears the active transfer for its class if it is still `id`.
    pub fn finish_transfer(&mut self, class: AssetClass, id: TransferId) -> bool {
        match self.active_transfers.get(&class) {
            Some(current) if current.id == id => {
                self.active_transfers.remove(&class);
                true
            }
            _ => false,
        }
    }

    pub fn take_transfers(&mut self) -> Vec<TransferHandle> {
        self.active_transfers.drain().map(|(_, h)| h).collect()
    }

    /// Records `state` as sent. Returns false when it equals the last one.
    pub fn update_state(&mut self, state: &FullState) -> bool {
        if self.last_state.as_ref() == Some(state) {
            return false;
        }
        self.last_state = Some(state.clone());
        true
    }

    pub fn update_gradient(&mut self, gradient: &GradientColors) -> bool {
        if self.last_gradient.as_ref() == Some(gradient) {
            return false;
        }
        self.last_gradient = Some(gradient.clone());
        true
    }

    /// Forgets the cached state so the next push is always sent.
    pub fn invalidate_state(&mut self) {
        self.last_state = None;
        self.last_gradient = None;
    }

    pub fn decoder_mut(&mut self) -> &mut Decoder {
        &mut self.decoder
    }

    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

/// Table of connected peers.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<PeerId, PeerSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session. Returns false if the peer was already registered.
    pub fn insert(&self, peer: PeerId) -> bool {
        self.insert_with(peer, |_| {})
    }

    /// Adds a session, running `on_insert` while the entry is still locked
    /// so a concurrent removal of the same peer cannot interleave.
    pub fn insert_with(&self, peer: PeerId, on_insert: impl FnOnce(&PeerId)) -> bool {
        match self.sessions.entry(peer) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                on_insert(entry.key());
                let session = PeerSession::new(entry.key().clone());
                entry.insert(session);
                true
            }
        }
    }

    pub fn remove(&self, peer: &PeerId) -> Option<PeerSession> {
        self.sessions.remove(peer).map(|(_, session)| session)
    }

    /// Removes a session, running `on_remove` before the entry is released.
    pub fn remove_with<R>(
        &self,
        peer: &PeerId,
        on_remove: impl FnOnce(&mut PeerSession) -> R,
    ) -> Option<(PeerSession, R)> {
        match self.sessions.entry(peer.clone()) {
            Entry::Occupied(mut entry) => {
                let out = on_remove(entry.get_mut());
                Some((entry.remove(), out))
            }
            Entry::Vacant(_) => None,
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.sessions.contains_key(peer)
    }

    /// Runs `f` with shared access to a session.
    pub fn with<R>(&self, peer: &PeerId, f: impl FnOnce(&PeerSession) -> R) -> Option<R> {
        self.sessions.get(peer).map(|s| f(&s))
    }

    /// Runs `f` with exclusive access to a session.
    pub fn with_mut<R>(&self, peer: &PeerId, f: impl FnOnce(&mut PeerSession) -> R) -> Option<R> {
        self.sessions.get_mut(peer).map(|mut s| f(&mut s))
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nocturne_protocol::MessageType;

    fn handle(class: AssetClass) -> TransferHandle {
        TransferHandle::new(class, [1; 32], Frame::empty(class.end_type()))
    }

    #[test]
    fn test_channel_uuids() {
        assert_eq!(
            ChannelId::Command.uuid().to_string(),
            "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            ChannelId::Bulk.uuid().to_string(),
            "6e400006-b5a3-f393-e0a9-e50e24dcca9e"
        );
        for channel in ChannelId::ALL {
            assert_eq!(ChannelId::from_uuid(channel.uuid()), Some(channel));
        }
    }

    #[test]
    fn test_channel_for_frame() {
        let chunk = Frame::empty(MessageType::AlbumArtChunk);
        assert_eq!(ChannelId::for_frame(&chunk), ChannelId::Bulk);
        let state = Frame::empty(MessageType::FullState);
        assert_eq!(ChannelId::for_frame(&state), ChannelId::State);
        let caps = Frame::empty(MessageType::Capabilities);
        assert_eq!(ChannelId::for_frame(&caps), ChannelId::State);
    }

    #[test]
    fn test_session_defaults() {
        let session = PeerSession::new(PeerId::from("aa:bb"));
        assert_eq!(session.mtu, 23);
        assert!(!session.supports_binary_protocol());
        assert!(!session.is_subscribed(ChannelId::Bulk));
        assert_eq!(session.features(), Features::new());
    }

    #[test]
    fn test_capabilities_enable_binary() {
        let mut session = PeerSession::new(PeerId::from("p"));
        session.set_capabilities(Capabilities {
            protocol_version: 2,
            max_mtu: 185,
            features: Features::new().with(Features::BINARY_PROTOCOL),
        });
        assert!(session.supports_binary_protocol());
    }

    #[test]
    fn test_state_cache() {
        let mut session = PeerSession::new(PeerId::from("p"));
        let state = FullState {
            track: "one".into(),
            ..Default::default()
        };
        assert!(session.update_state(&state));
        assert!(!session.update_state(&state));

        session.set_subscribed(ChannelId::State, true);
        session.set_subscribed(ChannelId::State, false);
        assert!(session.update_state(&state));
    }

    #[test]
    fn test_transfer_replacement() {
        let mut session = PeerSession::new(PeerId::from("p"));
        let first = handle(AssetClass::AlbumArt);
        assert!(session.replace_transfer(first.clone()).is_none());

        let second = handle(AssetClass::AlbumArt);
        let replaced = session.replace_transfer(second.clone()).unwrap();
        assert_eq!(replaced.id, first.id);

        assert!(!session.finish_transfer(AssetClass::AlbumArt, first.id));
        assert!(session.finish_transfer(AssetClass::AlbumArt, second.id));
        assert!(session.active_transfer(AssetClass::AlbumArt).is_none());
    }

    #[test]
    fn test_handle_cancel_once() {
        let h = handle(AssetClass::Weather);
        let clone = h.clone();
        assert!(h.cancel());
        assert!(!clone.cancel());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_registry() {
        let registry = SessionRegistry::new();
        let peer = PeerId::from("p1");
        assert!(registry.insert(peer.clone()));
        assert!(!registry.insert(peer.clone()));
        assert_eq!(registry.len(), 1);

        registry.with_mut(&peer, |s| s.mtu = 185);
        assert_eq!(registry.with(&peer, |s| s.mtu), Some(185));

        assert!(registry.remove(&peer).is_some());
        assert!(!registry.contains(&peer));
        assert!(registry.with(&peer, |s| s.mtu).is_none());
    }

    #[test]
    fn test_concurrent_insert_registers_once() {
        let registry = SessionRegistry::new();
        let inserted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        let mut hooked = false;
                        if registry.insert_with(PeerId::from("p"), |_| hooked = true) {
                            assert!(hooked);
                            inserted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(inserted.into_inner(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_with() {
        let registry = SessionRegistry::new();
        let peer = PeerId::from("p");
        assert!(registry.remove_with(&peer, |_| ()).is_none());

        registry.insert(peer.clone());
        registry.with_mut(&peer, |s| s.mtu = 247);
        let (session, mtu) = registry.remove_with(&peer, |s| s.mtu).unwrap();
        assert_eq!(mtu, 247);
        assert_eq!(session.id, peer);
        assert!(!registry.contains(&peer));
    }
}
