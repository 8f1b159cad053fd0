//! Typed binary payloads.
//!
//! All integers are big-endian. Strings are UTF-8 with a u16 length prefix
//! and no terminator.

use crate::error::{ErrorCode, ProtocolError};
use crate::frame::Frame;
use crate::message::MessageType;
use bytes::{BufMut, Bytes, BytesMut};

/// Length of every digest carried on the wire.
pub const CHECKSUM_LEN: usize = 32;

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    buf: &'a [u8],
    message: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], message: &'static str) -> Self {
        Self { buf, message }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() < n {
            return Err(ProtocolError::Truncated {
                message: self.message,
                needed: n - self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16, ProtocolError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ProtocolError> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(out))
    }

    fn checksum(&mut self) -> Result<[u8; CHECKSUM_LEN], ProtocolError> {
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(self.take(CHECKSUM_LEN)?);
        Ok(out)
    }

    fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(s.len()).map_err(|_| ProtocolError::StringTooLong(s.len()))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn expect_type(frame: &Frame, expected: &[MessageType]) -> Result<(), ProtocolError> {
    if expected.contains(&frame.message_type) {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedMessage(frame.message_type.as_u16()))
    }
}

// ============================================================================
// Commands (peer -> host)
// ============================================================================

/// Playback and control commands written by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    Next,
    Previous,
    SeekTo { position_ms: u32 },
    SetVolume { percent: u8 },
    RequestState,
    AlbumArtQuery { checksum: [u8; CHECKSUM_LEN] },
    TestAlbumArt { asset_id: Option<String> },
    RequestCapabilities,
    RequestTimeSync,
}

impl Command {
    pub fn message_type(&self) -> MessageType {
        match self {
            Command::Play => MessageType::Play,
            Command::Pause => MessageType::Pause,
            Command::Next => MessageType::Next,
            Command::Previous => MessageType::Previous,
            Command::SeekTo { .. } => MessageType::SeekTo,
            Command::SetVolume { .. } => MessageType::SetVolume,
            Command::RequestState => MessageType::RequestState,
            Command::AlbumArtQuery { .. } => MessageType::AlbumArtQuery,
            Command::TestAlbumArt { .. } => MessageType::TestAlbumArt,
            Command::RequestCapabilities => MessageType::RequestCapabilities,
            Command::RequestTimeSync => MessageType::RequestTimeSync,
        }
    }

    /// Decodes a command frame.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(&frame.payload, "command");
        let cmd = match frame.message_type {
            MessageType::Play => Command::Play,
            MessageType::Pause => Command::Pause,
            MessageType::Next => Command::Next,
            MessageType::Previous => Command::Previous,
            MessageType::SeekTo => Command::SeekTo {
                position_ms: r.u32()?,
            },
            MessageType::SetVolume => {
                let percent = r.u8()?;
                if percent > 100 {
                    return Err(ProtocolError::InvalidField {
                        field: "volume_percent",
                        value: percent as u64,
                    });
                }
                Command::SetVolume { percent }
            }
            MessageType::RequestState => Command::RequestState,
            MessageType::AlbumArtQuery => Command::AlbumArtQuery {
                checksum: r.checksum()?,
            },
            MessageType::TestAlbumArt => Command::TestAlbumArt {
                asset_id: if r.is_empty() {
                    None
                } else {
                    Some(r.string()?)
                },
            },
            MessageType::RequestCapabilities => Command::RequestCapabilities,
            MessageType::RequestTimeSync => Command::RequestTimeSync,
            other => return Err(ProtocolError::UnexpectedMessage(other.as_u16())),
        };
        Ok(cmd)
    }

    /// Encodes this command as a frame.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut buf = BytesMut::new();
        match self {
            Command::SeekTo { position_ms } => buf.put_u32(*position_ms),
            Command::SetVolume { percent } => buf.put_u8(*percent),
            Command::AlbumArtQuery { checksum } => buf.put_slice(checksum),
            Command::TestAlbumArt {
                asset_id: Some(asset_id),
            } => put_str(&mut buf, asset_id)?,
            _ => {}
        }
        Ok(Frame::new(self.message_type(), buf.freeze()))
    }
}

// ============================================================================
// System payloads
// ============================================================================

/// Feature bits advertised in a capabilities message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Features(u32);

impl Features {
    pub const BINARY_PROTOCOL: u32 = 1 << 0;
    pub const ALBUM_ART: u32 = 1 << 1;
    pub const WEATHER: u32 = 1 << 2;
    pub const TEST_TRANSFERS: u32 = 1 << 3;
    pub const COMPRESSION: u32 = 1 << 4;
    pub const GRADIENT: u32 = 1 << 5;
    pub const TRANSFER_FEEDBACK: u32 = 1 << 6;
    pub const BLAKE3_DIGEST: u32 = 1 << 7;

    const NAMES: [(u32, &'static str); 8] = [
        (Self::BINARY_PROTOCOL, "binary_protocol"),
        (Self::ALBUM_ART, "album_art"),
        (Self::WEATHER, "weather"),
        (Self::TEST_TRANSFERS, "test_transfers"),
        (Self::COMPRESSION, "compression"),
        (Self::GRADIENT, "gradient"),
        (Self::TRANSFER_FEEDBACK, "transfer_feedback"),
        (Self::BLAKE3_DIGEST, "blake3_digest"),
    ];

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn with(mut self, bit: u32) -> Self {
        self.0 |= bit;
        self
    }

    pub fn contains(&self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Names of the known bits that are set.
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Capability / version negotiation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub protocol_version: u8,
    pub max_mtu: u16,
    pub features: Features,
}

impl Capabilities {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(7);
        buf.put_u8(self.protocol_version);
        buf.put_u16(self.max_mtu);
        buf.put_u32(self.features.bits());
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "capabilities");
        Ok(Self {
            protocol_version: r.u8()?,
            max_mtu: r.u16()?,
            features: Features::from_bits(r.u32()?),
        })
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(MessageType::Capabilities, self.encode())
    }
}

/// Clock synchronisation pushed to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSync {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Offset of local time from UTC.
    pub utc_offset_minutes: i16,
    /// IANA zone name or a fixed-offset label.
    pub timezone: String,
}

impl TimeSync {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(12 + self.timezone.len());
        buf.put_u64(self.timestamp_ms);
        buf.put_i16(self.utc_offset_minutes);
        put_str(&mut buf, &self.timezone)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "time_sync");
        Ok(Self {
            timestamp_ms: r.u64()?,
            utc_offset_minutes: r.i16()?,
            timezone: r.string()?,
        })
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Ok(Frame::new(MessageType::TimeSync, self.encode()?))
    }
}

// ============================================================================
// State payloads (host -> peer)
// ============================================================================

/// Complete playback state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullState {
    pub is_playing: bool,
    pub duration_ms: u32,
    pub position_ms: u32,
    pub volume_percent: u8,
    pub artist: String,
    pub album: String,
    pub track: String,
}

impl FullState {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(
            16 + self.artist.len() + self.album.len() + self.track.len(),
        );
        buf.put_u8(self.is_playing as u8);
        buf.put_u32(self.duration_ms);
        buf.put_u32(self.position_ms);
        buf.put_u8(self.volume_percent);
        put_str(&mut buf, &self.artist)?;
        put_str(&mut buf, &self.album)?;
        put_str(&mut buf, &self.track)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "full_state");
        Ok(Self {
            is_playing: r.bool()?,
            duration_ms: r.u32()?,
            position_ms: r.u32()?,
            volume_percent: r.u8()?,
            artist: r.string()?,
            album: r.string()?,
            track: r.string()?,
        })
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Ok(Frame::new(MessageType::FullState, self.encode()?))
    }
}

/// Position-only update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionUpdate {
    pub position_ms: u32,
    pub is_playing: bool,
}

impl PositionUpdate {
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u32(self.position_ms);
        buf.put_u8(self.is_playing as u8);
        Frame::new(MessageType::PositionUpdate, buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "position_update");
        Ok(Self {
            position_ms: r.u32()?,
            is_playing: r.bool()?,
        })
    }
}

/// Play/pause state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayState {
    pub is_playing: bool,
}

impl PlayState {
    pub fn to_frame(&self) -> Frame {
        Frame::new(MessageType::PlayState, vec![self.is_playing as u8])
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "play_state");
        Ok(Self {
            is_playing: r.bool()?,
        })
    }
}

/// Volume change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeUpdate {
    pub volume_percent: u8,
}

impl VolumeUpdate {
    pub fn to_frame(&self) -> Frame {
        Frame::new(MessageType::VolumeUpdate, vec![self.volume_percent])
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "volume_update");
        Ok(Self {
            volume_percent: r.u8()?,
        })
    }
}

// ============================================================================
// Bulk transfer payloads
// ============================================================================

/// Opens a bulk transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStart {
    /// Digest of the bytes carried by the chunks.
    pub checksum: [u8; CHECKSUM_LEN],
    pub total_chunks: u32,
    pub original_size: u32,
    /// Present when the chunks carry compressed bytes.
    pub compressed_size: Option<u32>,
    /// Checksum is BLAKE3 rather than SHA-256.
    pub blake3_digest: bool,
    pub asset_id: String,
}

impl TransferStart {
    const FLAG_COMPRESSED: u8 = 0x01;
    const FLAG_BLAKE3: u8 = 0x02;

    /// Number of bytes the chunks must add up to.
    pub fn payload_size(&self) -> u32 {
        self.compressed_size.unwrap_or(self.original_size)
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(CHECKSUM_LEN + 15 + self.asset_id.len());
        buf.put_slice(&self.checksum);
        buf.put_u32(self.total_chunks);
        buf.put_u32(self.original_size);
        let mut flags = 0;
        if self.compressed_size.is_some() {
            flags |= Self::FLAG_COMPRESSED;
        }
        if self.blake3_digest {
            flags |= Self::FLAG_BLAKE3;
        }
        buf.put_u8(flags);
        if let Some(size) = self.compressed_size {
            buf.put_u32(size);
        }
        put_str(&mut buf, &self.asset_id)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "transfer_start");
        let checksum = r.checksum()?;
        let total_chunks = r.u32()?;
        let original_size = r.u32()?;
        let flags = r.u8()?;
        let compressed_size = if flags & Self::FLAG_COMPRESSED != 0 {
            Some(r.u32()?)
        } else {
            None
        };
        Ok(Self {
            checksum,
            total_chunks,
            original_size,
            compressed_size,
            blake3_digest: flags & Self::FLAG_BLAKE3 != 0,
            asset_id: r.string()?,
        })
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        expect_type(
            frame,
            &[
                MessageType::AlbumArtStart,
                MessageType::TestStart,
                MessageType::WeatherStart,
            ],
        )?;
        Self::decode(&frame.payload)
    }
}

/// Closes a bulk transfer. `success = false` tells the peer to discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEnd {
    pub checksum: [u8; CHECKSUM_LEN],
    pub success: bool,
}

impl TransferEnd {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHECKSUM_LEN + 1);
        buf.put_slice(&self.checksum);
        buf.put_u8(self.success as u8);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "transfer_end");
        Ok(Self {
            checksum: r.checksum()?,
            success: r.bool()?,
        })
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        expect_type(
            frame,
            &[
                MessageType::AlbumArtEnd,
                MessageType::TestEnd,
                MessageType::WeatherEnd,
            ],
        )?;
        Self::decode(&frame.payload)
    }
}

/// Peer feedback on a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    pub checksum: [u8; CHECKSUM_LEN],
    pub success: bool,
}

impl TransferResult {
    pub fn to_frame(&self) -> Frame {
        let end = TransferEnd {
            checksum: self.checksum,
            success: self.success,
        };
        Frame::new(MessageType::TransferResult, end.encode())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let end = TransferEnd::decode(payload)?;
        Ok(Self {
            checksum: end.checksum,
            success: end.success,
        })
    }
}

/// Checksum-only payload used by album-art queries and not-available replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetQuery {
    pub checksum: [u8; CHECKSUM_LEN],
}

impl AssetQuery {
    pub fn not_available_frame(&self) -> Frame {
        Frame::new(
            MessageType::AlbumArtNotAvailable,
            Bytes::copy_from_slice(&self.checksum),
        )
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "asset_query");
        Ok(Self {
            checksum: r.checksum()?,
        })
    }
}

// ============================================================================
// Errors and gradient
// ============================================================================

/// Error frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut buf = BytesMut::with_capacity(4 + self.message.len());
        buf.put_u16(self.code.as_u16());
        put_str(&mut buf, &self.message)?;
        Ok(Frame::new(MessageType::Error, buf.freeze()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "error");
        Ok(Self {
            code: ErrorCode::from_u16(r.u16()?),
            message: r.string()?,
        })
    }
}

/// Background gradient derived from the current artwork.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradientColors {
    pub colors: Vec<[u8; 3]>,
}

impl GradientColors {
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let count = u8::try_from(self.colors.len()).map_err(|_| ProtocolError::InvalidField {
            field: "gradient_colors",
            value: self.colors.len() as u64,
        })?;
        let mut buf = BytesMut::with_capacity(1 + self.colors.len() * 3);
        buf.put_u8(count);
        for rgb in &self.colors {
            buf.put_slice(rgb);
        }
        Ok(Frame::new(MessageType::GradientColors, buf.freeze()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload, "gradient_colors");
        let count = r.u8()? as usize;
        let mut colors = Vec::with_capacity(count);
        for _ in 0..count {
            let rgb = r.take(3)?;
            colors.push([rgb[0], rgb[1], rgb[2]]);
        }
        Ok(Self { colors })
    }
}
