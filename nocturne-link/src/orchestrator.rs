//! Transfer orchestration and peer lifecycle.
//!
//! The orchestrator ties sessions, the queue and the scheduler together. It
//! streams bulk transfers through the bulk lane with a bounded window,
//! supersedes older transfers of the same class, routes inbound frames and
//! pushes deduplicated state to subscribers.

use crate::config::Config;
use crate::congestion::ConnectionQuality;
use crate::error::LinkError;
use crate::metrics::Metrics;
use crate::queue::{CancelToken, MessageQueue, QueuedMessage, SendOutcome};
use crate::scheduler::Scheduler;
use crate::session::{ChannelId, PeerId, PeerSession, SessionRegistry, TransferHandle, TransferId};
use crate::transport::Transport;
use chrono::Offset;
use dashmap::DashMap;
use nocturne_protocol::payload::CHECKSUM_LEN;
use nocturne_protocol::{
    AssetQuery, Capabilities, Command, ErrorPayload, Features, Frame, FullState, GradientColors,
    MessageType, Namespace, TimeSync, TransferResult, PROTOCOL_VERSION,
};
use nocturne_transfer::{Asset, AssetClass, BulkTransfer, TransferError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Looks up assets a peer asks for by checksum.
pub trait AssetProvider: Send + Sync {
    fn lookup(&self, class: AssetClass, checksum: &[u8; CHECKSUM_LEN]) -> Option<Asset>;
}

/// Something a peer sent that the application should act on.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Command {
        peer: PeerId,
        command: Command,
    },
    ProtocolEnabled {
        peer: PeerId,
    },
    CapabilitiesReceived {
        peer: PeerId,
        capabilities: Capabilities,
    },
    TransferFeedback {
        peer: PeerId,
        checksum: [u8; CHECKSUM_LEN],
        success: bool,
    },
    PeerError {
        peer: PeerId,
        error: ErrorPayload,
    },
}

/// Summary of a delivered transfer.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub id: TransferId,
    pub class: AssetClass,
    pub checksum: [u8; CHECKSUM_LEN],
    pub total_chunks: usize,
    /// Bytes on the wire, after compression.
    pub payload_size: u32,
    pub original_size: u32,
    pub compressed: bool,
    pub elapsed: Duration,
    /// Peer verdict, `None` when the peer gives no feedback or stayed silent.
    pub confirmed: Option<bool>,
}

/// Document served on the info channel.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: u8,
    pub features: Vec<&'static str>,
    pub max_mtu: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

type FeedbackKey = (PeerId, [u8; CHECKSUM_LEN]);

/// Coordinates transfers and state for every connected peer.
pub struct Orchestrator<T: Transport> {
    config: Config,
    sessions: Arc<SessionRegistry>,
    queue: Arc<MessageQueue>,
    scheduler: Arc<Scheduler<T>>,
    metrics: Option<Arc<Metrics>>,
    provider: Option<Arc<dyn AssetProvider>>,
    feedback: DashMap<FeedbackKey, (TransferId, oneshot::Sender<bool>)>,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(config: Config, transport: T) -> Result<Self, LinkError> {
        config.validate()?;

        let metrics = if config.metrics.enabled {
            Some(Arc::new(Metrics::new()?))
        } else {
            None
        };

        let sessions = Arc::new(SessionRegistry::new());
        let queue = Arc::new(MessageQueue::new(&config.queue, &config.congestion));
        let scheduler = Arc::new(Scheduler::new(
            queue.clone(),
            sessions.clone(),
            Arc::new(transport),
            config.queue.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            sessions,
            queue,
            scheduler,
            metrics,
            provider: None,
            feedback: DashMap::new(),
        })
    }

    /// Sets the source used to answer peer asset queries.
    pub fn with_asset_provider(mut self, provider: Arc<dyn AssetProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Spawns the scheduler loop.
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<T>> {
        &self.scheduler
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    pub fn quality(&self, peer: &PeerId) -> ConnectionQuality {
        self.queue.quality(peer)
    }

    /// Capabilities advertised to peers.
    pub fn local_capabilities(&self) -> Capabilities {
        let mut features = Features::new()
            .with(Features::BINARY_PROTOCOL)
            .with(Features::ALBUM_ART)
            .with(Features::WEATHER)
            .with(Features::TEST_TRANSFERS)
            .with(Features::GRADIENT)
            .with(Features::TRANSFER_FEEDBACK);
        if self.config.transfer.compression {
            features = features.with(Features::COMPRESSION);
        }
        if self.config.transfer.checksum == nocturne_transfer::ChecksumAlgorithm::Blake3 {
            features = features.with(Features::BLAKE3_DIGEST);
        }

        Capabilities {
            protocol_version: PROTOCOL_VERSION,
            max_mtu: self.config.device.max_mtu,
            features,
        }
    }

    // ------------------------------------------------------------------
    // Peer lifecycle
    // ------------------------------------------------------------------

    pub fn on_peer_connected(&self, peer: PeerId) {
        let queue = &self.queue;
        if !self
            .sessions
            .insert_with(peer.clone(), |p| queue.register_peer(p))
        {
            tracing::debug!("Peer {} already connected", peer);
            return;
        }
        if let Some(m) = &self.metrics {
            m.peers_connected.inc();
        }
        tracing::info!("Peer {} connected", peer);
    }

    /// Tears down a peer: cancels its transfers and drains its lanes.
    pub fn on_peer_disconnected(&self, peer: &PeerId) {
        // Lanes go with the session so a reconnect never sees one without the other.
        let queue = &self.queue;
        let Some((session, (transfers, purged))) = self.sessions.remove_with(peer, |s| {
            let transfers = s.take_transfers();
            for handle in &transfers {
                handle.cancel();
            }
            (transfers, queue.purge_peer(peer))
        }) else {
            return;
        };

        let purged_count = purged.len();
        for msg in purged {
            msg.complete(SendOutcome::PeerGone);
        }

        // Dropping the senders wakes any transfer waiting for feedback.
        self.feedback.retain(|(p, _), _| p != peer);

        if let Some(m) = &self.metrics {
            m.peers_connected.dec();
        }
        tracing::info!(
            "Peer {} disconnected after {:?} ({} transfers cancelled, {} messages purged)",
            peer,
            session.age(),
            transfers.len(),
            purged_count
        );
    }

    /// Records a new MTU. Transfers already planned keep their chunk size.
    pub fn on_mtu_changed(&self, peer: &PeerId, mtu: u16) -> bool {
        let mtu = mtu.min(self.config.device.max_mtu);
        self.sessions
            .with_mut(peer, |s| {
                tracing::debug!("Peer {} MTU {} -> {}", peer, s.mtu, mtu);
                s.mtu = mtu;
            })
            .is_some()
    }

    pub fn on_subscription_changed(&self, peer: &PeerId, channel: ChannelId, subscribed: bool) -> bool {
        self.sessions
            .with_mut(peer, |s| {
                tracing::debug!(
                    "Peer {} {} {}",
                    peer,
                    if subscribed { "subscribed to" } else { "unsubscribed from" },
                    channel
                );
                s.set_subscribed(channel, subscribed);
            })
            .is_some()
    }

    // ------------------------------------------------------------------
    // Bulk transfers
    // ------------------------------------------------------------------

    /// Sends `asset` to `peer`, superseding any transfer of the same class.
    pub async fn send_asset(&self, peer: &PeerId, asset: Asset) -> Result<TransferReport, TransferError> {
        let class = asset.class;
        let (mtu, features) = self
            .sessions
            .with(peer, |s| -> Result<_, TransferError> {
                if !s.supports_binary_protocol() {
                    return Err(TransferError::ProtocolNotNegotiated);
                }
                if !s.is_subscribed(ChannelId::Bulk) {
                    return Err(TransferError::NotSubscribed);
                }
                // Peers that never sent capabilities are assumed to take every class.
                if let Some(caps) = s.capabilities() {
                    if !caps.features.contains(class.required_feature()) {
                        return Err(TransferError::ClassNotSupported(class));
                    }
                }
                Ok((s.mtu, s.features()))
            })
            .ok_or(TransferError::PeerNotConnected)??;

        if !class.is_test() && self.queue.quality(peer) == ConnectionQuality::Poor {
            tracing::warn!("Refusing {} transfer to {}: link congested", class, peer);
            return Err(TransferError::LinkCongested);
        }

        let encoder = self.config.transfer.encoder();
        let algorithm = encoder.checksum_algorithm().negotiate(features);
        let encoder = encoder.with_checksum(algorithm);
        let plan = encoder.plan(&asset.data, mtu, &asset.asset_id, class)?;
        let handle = TransferHandle::new(class, plan.checksum, plan.failure_end());

        let previous = self
            .sessions
            .with_mut(peer, |s| s.replace_transfer(handle.clone()))
            .ok_or(TransferError::PeerNotConnected)?;
        if let Some(previous) = previous {
            self.abort(peer, &previous, "superseded");
        }

        tracing::info!(
            "Starting {} transfer {} to {}: {} bytes in {} chunks of {} (mtu {})",
            class,
            &plan.checksum_hex()[..16],
            peer,
            plan.payload_size(),
            plan.total_chunks(),
            plan.chunk_size,
            mtu
        );

        let feedback = features.contains(Features::TRANSFER_FEEDBACK).then(|| {
            let (tx, rx) = oneshot::channel();
            self.feedback
                .insert((peer.clone(), plan.checksum), (handle.id, tx));
            rx
        });

        let started = Instant::now();
        let result = match self.deliver(peer, &plan, &handle).await {
            Ok(()) => self.await_feedback(peer, &plan, feedback).await,
            Err(e) => Err(e),
        };

        self.feedback
            .remove_if(&(peer.clone(), plan.checksum), |_, (id, _)| *id == handle.id);
        self.sessions
            .with_mut(peer, |s| s.finish_transfer(class, handle.id));

        let elapsed = started.elapsed();
        self.record_outcome(class, &result, elapsed);

        match result {
            Ok(confirmed) => {
                tracing::info!(
                    "Completed {} transfer {} to {} in {:?}",
                    class,
                    &plan.checksum_hex()[..16],
                    peer,
                    elapsed
                );
                Ok(TransferReport {
                    id: handle.id,
                    class,
                    checksum: plan.checksum,
                    total_chunks: plan.total_chunks(),
                    payload_size: plan.payload_size(),
                    original_size: plan.original_size,
                    compressed: plan.compressed_size.is_some(),
                    elapsed,
                    confirmed,
                })
            }
            Err(e) => {
                tracing::warn!("{} transfer to {} failed: {}", class, peer, e);
                Err(e)
            }
        }
    }

    /// Answers an asset query: sends the asset or a not-available notice.
    pub async fn send_by_checksum(
        &self,
        peer: &PeerId,
        class: AssetClass,
        checksum: [u8; CHECKSUM_LEN],
    ) -> Result<TransferReport, TransferError> {
        match self
            .provider
            .as_ref()
            .and_then(|p| p.lookup(class, &checksum))
        {
            Some(asset) => self.send_asset(peer, asset).await,
            None => {
                let frame = AssetQuery { checksum }.not_available_frame();
                if let Err(e) = self.enqueue_frame(peer, &frame) {
                    tracing::debug!("Could not queue not-available for {}: {}", peer, e);
                }
                Err(TransferError::AssetNotAvailable(hex::encode(checksum)))
            }
        }
    }

    /// Start, chunks and success end, bounded by the transfer timeout.
    async fn deliver(
        &self,
        peer: &PeerId,
        plan: &BulkTransfer,
        handle: &TransferHandle,
    ) -> Result<(), TransferError> {
        let timeout = self.config.transfer.timeout();
        let deadline = Instant::now() + timeout;

        let result = match tokio::time::timeout_at(deadline, self.stream(peer, plan, handle)).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::Timeout(timeout)),
        };

        if let Err(e) = &result {
            if matches!(
                e,
                TransferError::Timeout(_)
                    | TransferError::ChunkDropped { .. }
                    | TransferError::NotDelivered(_)
            ) {
                self.abort(peer, handle, "aborted");
            }
        }
        result
    }

    async fn stream(
        &self,
        peer: &PeerId,
        plan: &BulkTransfer,
        handle: &TransferHandle,
    ) -> Result<(), TransferError> {
        self.send_and_wait(peer, plan.start_frame()?, handle.token(), "start")
            .await?;

        let total = plan.total_chunks();
        let window = self.config.transfer.max_in_flight_chunks;
        let (tx, mut rx) = mpsc::unbounded_channel::<(u16, SendOutcome)>();
        let mut next = 0usize;
        let mut in_flight = 0usize;
        let mut delivered = 0usize;

        while delivered < total {
            if handle.is_cancelled() {
                if !self.sessions.contains(peer) {
                    return Err(TransferError::PeerNotConnected);
                }
                return Err(TransferError::Cancelled);
            }

            while next < total && in_flight < window {
                let index = next as u16;
                let Some(frame) = plan.chunk_frame(index) else {
                    return Err(TransferError::UnexpectedChunk {
                        index,
                        total: total as u32,
                    });
                };
                let tx = tx.clone();
                let msg = QueuedMessage::new(peer.clone(), &frame)?
                    .with_cancel(handle.token())
                    .with_completion(move |outcome| {
                        let _ = tx.send((index, outcome));
                    });

                match self.queue.enqueue(msg) {
                    Ok(()) => {
                        next += 1;
                        in_flight += 1;
                    }
                    Err(LinkError::Capacity(e)) => {
                        tracing::trace!("{}", e);
                        if in_flight == 0 {
                            tokio::time::sleep(self.config.queue.bulk_interval().max(Duration::from_millis(1))).await;
                        }
                        break;
                    }
                    Err(LinkError::PeerNotConnected(_)) => return Err(TransferError::PeerNotConnected),
                    Err(e) => {
                        tracing::warn!("Could not queue chunk {} for {}: {}", index, peer, e);
                        return Err(TransferError::NotDelivered("chunk"));
                    }
                }
            }

            if in_flight == 0 {
                continue;
            }

            let Some((index, outcome)) = rx.recv().await else {
                return Err(TransferError::Cancelled);
            };
            in_flight -= 1;
            match outcome {
                SendOutcome::Sent => delivered += 1,
                SendOutcome::Failed => return Err(TransferError::ChunkDropped { index }),
                SendOutcome::Cancelled => return Err(TransferError::Cancelled),
                SendOutcome::PeerGone => return Err(TransferError::PeerNotConnected),
            }
        }

        self.send_and_wait(peer, plan.end_frame(true), handle.token(), "end")
            .await
    }

    async fn await_feedback(
        &self,
        peer: &PeerId,
        plan: &BulkTransfer,
        feedback: Option<oneshot::Receiver<bool>>,
    ) -> Result<Option<bool>, TransferError> {
        let Some(rx) = feedback else {
            return Ok(None);
        };

        match tokio::time::timeout(self.config.transfer.feedback_timeout(), rx).await {
            Ok(Ok(true)) => Ok(Some(true)),
            Ok(Ok(false)) => Err(TransferError::ChecksumMismatch {
                checksum: plan.checksum_hex(),
            }),
            Ok(Err(_)) => Err(TransferError::PeerNotConnected),
            Err(_) => {
                tracing::warn!(
                    "No transfer result from {} within {:?}",
                    peer,
                    self.config.transfer.feedback_timeout()
                );
                Ok(None)
            }
        }
    }

    async fn send_and_wait(
        &self,
        peer: &PeerId,
        frame: Frame,
        cancel: CancelToken,
        stage: &'static str,
    ) -> Result<(), TransferError> {
        let (tx, rx) = oneshot::channel();
        let msg = QueuedMessage::new(peer.clone(), &frame)?
            .with_cancel(cancel)
            .with_completion(move |outcome| {
                let _ = tx.send(outcome);
            });

        self.queue.enqueue(msg).map_err(|e| match e {
            LinkError::PeerNotConnected(_) => TransferError::PeerNotConnected,
            _ => TransferError::NotDelivered(stage),
        })?;

        match rx.await {
            Ok(SendOutcome::Sent) => Ok(()),
            Ok(SendOutcome::Cancelled) => Err(TransferError::Cancelled),
            Ok(SendOutcome::Failed) => Err(TransferError::NotDelivered(stage)),
            Ok(SendOutcome::PeerGone) | Err(_) => Err(TransferError::PeerNotConnected),
        }
    }

    /// Cancels `handle`, drops its queued frames and tells the peer.
    fn abort(&self, peer: &PeerId, handle: &TransferHandle, reason: &str) {
        if !handle.cancel() {
            return;
        }

        let purged = self.queue.purge_cancelled(peer);
        let purged_count = purged.len();
        for msg in purged {
            msg.complete(SendOutcome::Cancelled);
        }

        if let Err(e) = self.enqueue_frame(peer, &handle.failure_end()) {
            tracing::debug!("Could not queue failure end for {}: {}", peer, e);
        }
        tracing::info!(
            "{} transfer {} to {} {} ({} queued frames dropped)",
            handle.class,
            hex::encode(&handle.checksum[..8]),
            peer,
            reason,
            purged_count
        );
    }

    fn record_outcome(&self, class: AssetClass, result: &Result<Option<bool>, TransferError>, elapsed: Duration) {
        let Some(m) = &self.metrics else {
            return;
        };
        let outcome = match result {
            Ok(_) => "success",
            Err(TransferError::Cancelled) => "cancelled",
            Err(TransferError::Timeout(_)) => "timeout",
            Err(TransferError::PeerNotConnected) => "disconnected",
            Err(_) => "failed",
        };
        m.transfers_total
            .with_label_values(&[class.as_str(), outcome])
            .inc();
        if result.is_ok() {
            m.transfer_duration
                .with_label_values(&[class.as_str()])
                .observe(elapsed.as_secs_f64());
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Feeds bytes a peer wrote and handles every complete frame.
    pub fn handle_inbound(&self, peer: &PeerId, channel: ChannelId, bytes: &[u8]) -> Vec<InboundEvent> {
        let Some(frames) = self.sessions.with_mut(peer, |s| {
            let decoder = s.decoder_mut();
            decoder.extend(bytes);
            decoder.drain()
        }) else {
            tracing::debug!("Ignoring {} bytes from unknown peer {}", bytes.len(), peer);
            return Vec::new();
        };

        let mut events = Vec::new();
        for result in frames {
            match result {
                Ok(frame) => events.extend(self.handle_frame(peer, frame)),
                Err(e) => {
                    tracing::warn!("Dropping bad frame from {} on {}: {}", peer, channel, e);
                    if let Some(m) = &self.metrics {
                        m.inbound_errors_total.inc();
                    }
                }
            }
        }
        events
    }

    fn handle_frame(&self, peer: &PeerId, frame: Frame) -> Option<InboundEvent> {
        match frame.message_type {
            MessageType::ProtocolEnable => {
                self.sessions
                    .with_mut(peer, PeerSession::enable_binary_protocol)?;
                tracing::info!("Peer {} enabled the binary protocol", peer);
                Some(InboundEvent::ProtocolEnabled { peer: peer.clone() })
            }
            MessageType::Capabilities => match Capabilities::decode(&frame.payload) {
                Ok(capabilities) => {
                    self.sessions
                        .with_mut(peer, |s| s.set_capabilities(capabilities))?;
                    tracing::info!(
                        "Peer {} capabilities: v{} mtu {} [{}]",
                        peer,
                        capabilities.protocol_version,
                        capabilities.max_mtu,
                        capabilities.features.names().join(", ")
                    );
                    Some(InboundEvent::CapabilitiesReceived {
                        peer: peer.clone(),
                        capabilities,
                    })
                }
                Err(e) => {
                    tracing::warn!("Bad capabilities from {}: {}", peer, e);
                    None
                }
            },
            MessageType::TransferResult => match TransferResult::decode(&frame.payload) {
                Ok(result) => {
                    if let Some((_, (_, tx))) = self.feedback.remove(&(peer.clone(), result.checksum)) {
                        let _ = tx.send(result.success);
                    }
                    Some(InboundEvent::TransferFeedback {
                        peer: peer.clone(),
                        checksum: result.checksum,
                        success: result.success,
                    })
                }
                Err(e) => {
                    tracing::warn!("Bad transfer result from {}: {}", peer, e);
                    None
                }
            },
            MessageType::Error => match ErrorPayload::decode(&frame.payload) {
                Ok(error) => {
                    tracing::warn!("Peer {} reported {:?}: {}", peer, error.code, error.message);
                    Some(InboundEvent::PeerError {
                        peer: peer.clone(),
                        error,
                    })
                }
                Err(e) => {
                    tracing::warn!("Bad error payload from {}: {}", peer, e);
                    None
                }
            },
            ty if ty.namespace() == Namespace::Command => match Command::from_frame(&frame) {
                Ok(command) => self.handle_command(peer, command),
                Err(e) => {
                    tracing::warn!("Bad {:?} command from {}: {}", ty, peer, e);
                    None
                }
            },
            ty => {
                tracing::debug!("Ignoring unexpected {:?} from {}", ty, peer);
                None
            }
        }
    }

    fn handle_command(&self, peer: &PeerId, command: Command) -> Option<InboundEvent> {
        match &command {
            Command::RequestCapabilities => {
                self.send_capabilities(peer);
                return None;
            }
            Command::RequestTimeSync => {
                self.send_time_sync(peer);
                return None;
            }
            Command::RequestState => {
                self.sessions.with_mut(peer, PeerSession::invalidate_state);
            }
            _ => {}
        }
        tracing::debug!("Command from {}: {:?}", peer, command);
        Some(InboundEvent::Command {
            peer: peer.clone(),
            command,
        })
    }

    pub fn send_capabilities(&self, peer: &PeerId) {
        if let Err(e) = self.enqueue_frame(peer, &self.local_capabilities().to_frame()) {
            tracing::warn!("Could not queue capabilities for {}: {}", peer, e);
        }
    }

    pub fn send_time_sync(&self, peer: &PeerId) {
        let result = time_sync_now()
            .to_frame()
            .map_err(LinkError::from)
            .and_then(|frame| self.enqueue_frame(peer, &frame));
        if let Err(e) = result {
            tracing::warn!("Could not queue time sync for {}: {}", peer, e);
        }
    }

    // ------------------------------------------------------------------
    // State fan-out
    // ------------------------------------------------------------------

    /// Queues `state` for every subscribed peer whose last copy differs.
    /// Returns how many peers it was queued for.
    pub fn push_state(&self, state: &FullState) -> usize {
        match state.to_frame() {
            Ok(frame) => self.fan_out(&frame, |s| s.update_state(state)),
            Err(e) => {
                tracing::warn!("Cannot encode state: {}", e);
                0
            }
        }
    }

    pub fn push_gradient(&self, gradient: &GradientColors) -> usize {
        match gradient.to_frame() {
            Ok(frame) => self.fan_out(&frame, |s| s.update_gradient(gradient)),
            Err(e) => {
                tracing::warn!("Cannot encode gradient: {}", e);
                0
            }
        }
    }

    fn fan_out(&self, frame: &Frame, changed: impl Fn(&mut PeerSession) -> bool) -> usize {
        let mut queued = 0;
        for peer in self.sessions.peers() {
            let send = self
                .sessions
                .with_mut(&peer, |s| {
                    s.supports_binary_protocol() && s.is_subscribed(ChannelId::State) && changed(s)
                })
                .unwrap_or(false);
            if !send {
                continue;
            }

            match self.enqueue_frame(&peer, frame) {
                Ok(()) => queued += 1,
                Err(e) => {
                    tracing::warn!("Could not queue {:?} for {}: {}", frame.message_type, peer, e);
                    self.sessions
                        .with_mut(&peer, PeerSession::invalidate_state);
                }
            }
        }
        queued
    }

    // ------------------------------------------------------------------
    // Info channel
    // ------------------------------------------------------------------

    pub fn device_info(&self, peer: Option<&PeerId>) -> DeviceInfo {
        let caps = self.local_capabilities();
        DeviceInfo {
            name: self.config.device.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: caps.protocol_version,
            features: caps.features.names(),
            max_mtu: caps.max_mtu,
            mtu: peer.and_then(|p| self.sessions.with(p, |s| s.mtu)),
        }
    }

    pub fn device_info_json(&self, peer: Option<&PeerId>) -> Result<String, LinkError> {
        Ok(serde_json::to_string(&self.device_info(peer))?)
    }

    fn enqueue_frame(&self, peer: &PeerId, frame: &Frame) -> Result<(), LinkError> {
        self.queue.enqueue(QueuedMessage::new(peer.clone(), frame)?)
    }
}

/// Local wall clock as a time sync message.
pub fn time_sync_now() -> TimeSync {
    let now = chrono::Local::now();
    let offset_secs = now.offset().fix().local_minus_utc();
    TimeSync {
        timestamp_ms: now.timestamp_millis().max(0) as u64,
        utc_offset_minutes: (offset_secs / 60) as i16,
        timezone: format!("UTC{}", now.format("%:z")),
    }
}
