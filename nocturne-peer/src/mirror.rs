//! Receiving state machine for a display peer.
//!
//! The mirror consumes everything the host notifies, keeps the latest state
//! and reassembles bulk transfers. Writes the peer would send back (protocol
//! enable, capabilities, commands, transfer results) are built here too.

use crate::error::PeerError;
use bytes::Bytes;
use nocturne_link::ChannelId;
use nocturne_protocol::payload::CHECKSUM_LEN;
use nocturne_protocol::{
    AssetQuery, Capabilities, Command, Decoder, Encoder, ErrorPayload, Features, Frame, FullState,
    GradientColors, MessageType, PlayState, PositionUpdate, TimeSync, TransferEnd, TransferResult,
    VolumeUpdate, PROTOCOL_VERSION,
};
use nocturne_transfer::{
    AssetClass, CompletedAsset, Reassembler, ReassemblyState,
};
use std::collections::HashMap;

/// Something the peer observed.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    State(FullState),
    Position(PositionUpdate),
    PlayState(bool),
    Volume(u8),
    Gradient(GradientColors),
    HostCapabilities(Capabilities),
    TimeSync(TimeSync),
    AssetReceived(CompletedAsset),
    TransferCancelled { class: AssetClass },
    TransferFailed { class: AssetClass, reason: String },
    AssetNotAvailable { checksum: [u8; CHECKSUM_LEN] },
    HostError(ErrorPayload),
}

/// Peer-side view of one link.
pub struct PeerMirror {
    features: Features,
    mtu: u16,
    decoders: HashMap<ChannelId, Decoder>,
    reassemblers: HashMap<AssetClass, Reassembler>,
    host: Option<Capabilities>,
    state: Option<FullState>,
    gradient: Option<GradientColors>,
    outbound: Vec<Bytes>,
    bad_frames: u64,
}

impl PeerMirror {
    /// Creates a mirror advertising `features` and accepting up to `mtu`.
    pub fn new(features: Features, mtu: u16) -> Self {
        let reassemblers = AssetClass::ALL
            .into_iter()
            .map(|class| (class, Reassembler::new(class)))
            .collect();

        Self {
            features,
            mtu,
            decoders: HashMap::new(),
            reassemblers,
            host: None,
            state: None,
            gradient: None,
            outbound: Vec::new(),
            bad_frames: 0,
        }
    }

    /// A peer that understands every feature of this protocol version.
    pub fn full(mtu: u16) -> Self {
        let features = Features::new()
            .with(Features::BINARY_PROTOCOL)
            .with(Features::ALBUM_ART)
            .with(Features::WEATHER)
            .with(Features::TEST_TRANSFERS)
            .with(Features::COMPRESSION)
            .with(Features::GRADIENT)
            .with(Features::TRANSFER_FEEDBACK)
            .with(Features::BLAKE3_DIGEST);
        Self::new(features, mtu)
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn state(&self) -> Option<&FullState> {
        self.state.as_ref()
    }

    pub fn gradient(&self) -> Option<&GradientColors> {
        self.gradient.as_ref()
    }

    pub fn host_capabilities(&self) -> Option<&Capabilities> {
        self.host.as_ref()
    }

    pub fn reassembly_state(&self, class: AssetClass) -> ReassemblyState {
        self.reassemblers
            .get(&class)
            .map_or(ReassemblyState::Idle, Reassembler::state)
    }

    /// Frames rejected by the codec so far.
    pub fn bad_frames(&self) -> u64 {
        self.bad_frames
    }

    /// Writes queued for the host, oldest first.
    pub fn take_outbound(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbound)
    }

    // ------------------------------------------------------------------
    // Writes to the host
    // ------------------------------------------------------------------

    /// The handshake a peer writes after connecting.
    pub fn handshake(&self) -> Result<Bytes, PeerError> {
        let mut buf = Encoder::encode_protocol_enable()?.to_vec();
        buf.extend_from_slice(&self.capabilities().to_frame().encode()?);
        Ok(buf.into())
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            protocol_version: PROTOCOL_VERSION,
            max_mtu: self.mtu,
            features: self.features,
        }
    }

    pub fn command(&self, command: &Command) -> Result<Bytes, PeerError> {
        Ok(Encoder::encode_frame(&command.to_frame()?)?)
    }

    pub fn transfer_result(&self, checksum: [u8; CHECKSUM_LEN], success: bool) -> Result<Bytes, PeerError> {
        Ok(Encoder::encode_frame(
            &TransferResult { checksum, success }.to_frame(),
        )?)
    }

    // ------------------------------------------------------------------
    // Notifications from the host
    // ------------------------------------------------------------------

    /// Feeds one notification written on `channel`.
    pub fn receive(&mut self, channel: ChannelId, bytes: &[u8]) -> Vec<PeerEvent> {
        let decoder = self.decoders.entry(channel).or_default();
        decoder.extend(bytes);
        let frames = decoder.drain();

        let mut events = Vec::new();
        for result in frames {
            match result {
                Ok(frame) => events.extend(self.handle_frame(&frame)),
                Err(e) => {
                    self.bad_frames += 1;
                    tracing::warn!("Peer dropped bad frame on {}: {}", channel, e);
                }
            }
        }
        events
    }

    fn handle_frame(&mut self, frame: &Frame) -> Option<PeerEvent> {
        let ty = frame.message_type;
        if let Some(class) = AssetClass::from_message_type(ty) {
            return self.handle_transfer(class, frame);
        }

        let event = match ty {
            MessageType::Capabilities => Capabilities::decode(&frame.payload).map(|caps| {
                self.host = Some(caps);
                PeerEvent::HostCapabilities(caps)
            }),
            MessageType::TimeSync => TimeSync::decode(&frame.payload).map(PeerEvent::TimeSync),
            MessageType::FullState => FullState::decode(&frame.payload).map(|state| {
                self.state = Some(state.clone());
                PeerEvent::State(state)
            }),
            MessageType::PositionUpdate => {
                PositionUpdate::decode(&frame.payload).map(|update| {
                    if let Some(state) = &mut self.state {
                        state.position_ms = update.position_ms;
                        state.is_playing = update.is_playing;
                    }
                    PeerEvent::Position(update)
                })
            }
            MessageType::PlayState => PlayState::decode(&frame.payload).map(|p| {
                if let Some(state) = &mut self.state {
                    state.is_playing = p.is_playing;
                }
                PeerEvent::PlayState(p.is_playing)
            }),
            MessageType::VolumeUpdate => VolumeUpdate::decode(&frame.payload).map(|v| {
                if let Some(state) = &mut self.state {
                    state.volume_percent = v.volume_percent;
                }
                PeerEvent::Volume(v.volume_percent)
            }),
            MessageType::GradientColors => {
                GradientColors::decode(&frame.payload).map(|gradient| {
                    self.gradient = Some(gradient.clone());
                    PeerEvent::Gradient(gradient)
                })
            }
            MessageType::AlbumArtNotAvailable => AssetQuery::decode(&frame.payload)
                .map(|q| PeerEvent::AssetNotAvailable { checksum: q.checksum }),
            MessageType::Error => ErrorPayload::decode(&frame.payload).map(PeerEvent::HostError),
            other => {
                tracing::debug!("Peer ignoring {:?}", other);
                return None;
            }
        };

        match event {
            Ok(event) => Some(event),
            Err(e) => {
                self.bad_frames += 1;
                tracing::warn!("Peer could not decode {:?}: {}", ty, e);
                None
            }
        }
    }

    fn handle_transfer(&mut self, class: AssetClass, frame: &Frame) -> Option<PeerEvent> {
        let reassembler = self.reassemblers.get_mut(&class)?;
        let was_receiving = reassembler.state() == ReassemblyState::Receiving;

        match reassembler.on_frame(frame) {
            Ok(Some(asset)) => {
                tracing::debug!(
                    "Peer received {} {} ({} bytes)",
                    class,
                    asset.asset_id,
                    asset.data.len()
                );
                self.queue_feedback(asset.checksum, true);
                Some(PeerEvent::AssetReceived(asset))
            }
            Ok(None) if frame.message_type.is_transfer_end() && was_receiving => {
                Some(PeerEvent::TransferCancelled { class })
            }
            Ok(None) => None,
            Err(e) => {
                if frame.message_type.is_transfer_end() {
                    if let Ok(end) = TransferEnd::from_frame(frame) {
                        if end.success {
                            self.queue_feedback(end.checksum, false);
                        }
                    }
                }
                Some(PeerEvent::TransferFailed {
                    class,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn queue_feedback(&mut self, checksum: [u8; CHECKSUM_LEN], success: bool) {
        if !self.features.contains(Features::TRANSFER_FEEDBACK) {
            return;
        }
        match self.transfer_result(checksum, success) {
            Ok(bytes) => self.outbound.push(bytes),
            Err(e) => tracing::warn!("Peer could not encode transfer result: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nocturne_transfer::{ChecksumAlgorithm, ChunkEncoder};

    fn state() -> FullState {
        FullState {
            is_playing: true,
            duration_ms: 180_000,
            position_ms: 0,
            volume_percent: 50,
            artist: "A".into(),
            album: "B".into(),
            track: "C".into(),
        }
    }

    fn write_all(mirror: &mut PeerMirror, frames: impl IntoIterator<Item = Frame>) -> Vec<PeerEvent> {
        frames
            .into_iter()
            .flat_map(|f| mirror.receive(ChannelId::Bulk, &f.encode().unwrap()))
            .collect()
    }

    #[test]
    fn test_state_split_across_writes() {
        let mut mirror = PeerMirror::full(23);
        let bytes = state().to_frame().unwrap().encode().unwrap();

        let mut events = Vec::new();
        for piece in bytes.chunks(20) {
            events.extend(mirror.receive(ChannelId::State, piece));
        }
        assert_eq!(events, vec![PeerEvent::State(state())]);

        let volume = VolumeUpdate { volume_percent: 7 }.to_frame().encode().unwrap();
        mirror.receive(ChannelId::State, &volume);
        assert_eq!(mirror.state().unwrap().volume_percent, 7);
    }

    #[test]
    fn test_bad_frame_counted() {
        let mut mirror = PeerMirror::full(185);
        let mut bytes = state().to_frame().unwrap().encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;

        assert!(mirror.receive(ChannelId::State, &bytes).is_empty());
        assert_eq!(mirror.bad_frames(), 1);
        assert!(mirror.state().is_none());
    }

    #[test]
    fn test_transfer_with_feedback() {
        let mut mirror = PeerMirror::full(185);
        let data = b"cover art bytes ".repeat(200);
        let plan = ChunkEncoder::default()
            .plan(&data, 185, "cover", AssetClass::AlbumArt)
            .unwrap();

        let mut frames = vec![plan.start_frame().unwrap()];
        frames.extend(plan.chunk_frames());
        frames.push(plan.end_frame(true));
        let events = write_all(&mut mirror, frames);

        match events.as_slice() {
            [PeerEvent::AssetReceived(asset)] => assert_eq!(&asset.data[..], &data[..]),
            other => panic!("unexpected events: {other:?}"),
        }

        let outbound = mirror.take_outbound();
        assert_eq!(outbound.len(), 1);
        let frame = Frame::decode(&outbound[0]).unwrap();
        let nocturne_protocol::Decoded::Complete(frame) = frame else {
            panic!("partial frame");
        };
        let result = TransferResult::decode(&frame.payload).unwrap();
        assert_eq!(result.checksum, plan.checksum);
        assert!(result.success);
    }

    #[test]
    fn test_cancelled_transfer_sends_no_feedback() {
        let mut mirror = PeerMirror::full(185);
        let plan = ChunkEncoder::default()
            .plan(&[3u8; 4000], 185, "wx", AssetClass::Weather)
            .unwrap();

        let mut frames = vec![plan.start_frame().unwrap()];
        frames.extend(plan.chunk_frames().take(2));
        frames.push(plan.failure_end());
        let events = write_all(&mut mirror, frames);

        assert_eq!(
            events,
            vec![PeerEvent::TransferCancelled {
                class: AssetClass::Weather
            }]
        );
        assert_eq!(mirror.reassembly_state(AssetClass::Weather), ReassemblyState::Failed);
        assert!(mirror.take_outbound().is_empty());
    }

    #[test]
    fn test_digest_taken_from_start() {
        // No host capabilities seen yet: the start alone selects blake3.
        let mut mirror = PeerMirror::full(185);
        assert!(mirror.host_capabilities().is_none());

        let data = vec![9u8; 1000];
        let plan = ChunkEncoder::new(ChecksumAlgorithm::Blake3, None)
            .plan(&data, 185, "t", AssetClass::Test)
            .unwrap();
        let mut frames = vec![plan.start_frame().unwrap()];
        frames.extend(plan.chunk_frames());
        frames.push(plan.end_frame(true));

        let events = write_all(&mut mirror, frames);
        assert!(matches!(events.as_slice(), [PeerEvent::AssetReceived(_)]));

        let host = Capabilities {
            protocol_version: PROTOCOL_VERSION,
            max_mtu: 517,
            features: Features::new().with(Features::BLAKE3_DIGEST),
        };
        mirror.receive(ChannelId::State, &host.to_frame().encode().unwrap());
        assert_eq!(mirror.host_capabilities(), Some(&host));
    }

    #[test]
    fn test_handshake_bytes() {
        let mirror = PeerMirror::new(Features::new().with(Features::BINARY_PROTOCOL), 247);
        let mut decoder = Decoder::new();
        decoder.extend(&mirror.handshake().unwrap());
        let frames: Vec<_> = decoder.drain().into_iter().map(Result::unwrap).collect();

        assert_eq!(frames[0].message_type, MessageType::ProtocolEnable);
        let caps = Capabilities::decode(&frames[1].payload).unwrap();
        assert_eq!(caps.max_mtu, 247);
        assert!(caps.features.contains(Features::BINARY_PROTOCOL));
    }
}
