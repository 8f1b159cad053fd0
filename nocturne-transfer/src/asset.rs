//! Asset classes and digests.

use bytes::Bytes;
use nocturne_protocol::payload::CHECKSUM_LEN;
use nocturne_protocol::{Features, MessageType, TransferStart};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Kind of asset being transferred. Selects the message range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    AlbumArt,
    Weather,
    Test,
}

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [AssetClass::AlbumArt, AssetClass::Weather, AssetClass::Test];

    pub fn start_type(self) -> MessageType {
        match self {
            AssetClass::AlbumArt => MessageType::AlbumArtStart,
            AssetClass::Weather => MessageType::WeatherStart,
            AssetClass::Test => MessageType::TestStart,
        }
    }

    pub fn chunk_type(self) -> MessageType {
        match self {
            AssetClass::AlbumArt => MessageType::AlbumArtChunk,
            AssetClass::Weather => MessageType::WeatherChunk,
            AssetClass::Test => MessageType::TestChunk,
        }
    }

    pub fn end_type(self) -> MessageType {
        match self {
            AssetClass::AlbumArt => MessageType::AlbumArtEnd,
            AssetClass::Weather => MessageType::WeatherEnd,
            AssetClass::Test => MessageType::TestEnd,
        }
    }

    /// Test transfers bypass pacing, backoff and the quality gate.
    pub fn is_test(self) -> bool {
        self == AssetClass::Test
    }

    /// Returns the class owning a transfer message type.
    pub fn from_message_type(ty: MessageType) -> Option<Self> {
        match ty {
            MessageType::AlbumArtStart | MessageType::AlbumArtChunk | MessageType::AlbumArtEnd => {
                Some(AssetClass::AlbumArt)
            }
            MessageType::WeatherStart | MessageType::WeatherChunk | MessageType::WeatherEnd => {
                Some(AssetClass::Weather)
            }
            MessageType::TestStart | MessageType::TestChunk | MessageType::TestEnd => {
                Some(AssetClass::Test)
            }
            _ => None,
        }
    }

    /// Feature bit a peer must advertise to accept this class.
    pub fn required_feature(self) -> u32 {
        match self {
            AssetClass::AlbumArt => Features::ALBUM_ART,
            AssetClass::Weather => Features::WEATHER,
            AssetClass::Test => Features::TEST_TRANSFERS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetClass::AlbumArt => "album_art",
            AssetClass::Weather => "weather",
            AssetClass::Test => "test",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest used for transfer integrity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn digest(self, data: &[u8]) -> [u8; CHECKSUM_LEN] {
        match self {
            ChecksumAlgorithm::Sha256 => Sha256::digest(data).into(),
            ChecksumAlgorithm::Blake3 => *blake3::hash(data).as_bytes(),
        }
    }

    /// Picks the digest a peer can verify.
    pub fn negotiate(self, features: Features) -> Self {
        match self {
            ChecksumAlgorithm::Blake3 if features.contains(Features::BLAKE3_DIGEST) => {
                ChecksumAlgorithm::Blake3
            }
            _ => ChecksumAlgorithm::Sha256,
        }
    }

    /// Digest announced by a transfer start message.
    pub fn for_start(start: &TransferStart) -> Self {
        if start.blake3_digest {
            ChecksumAlgorithm::Blake3
        } else {
            ChecksumAlgorithm::Sha256
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Some(ChecksumAlgorithm::Sha256),
            "blake3" => Some(ChecksumAlgorithm::Blake3),
            _ => None,
        }
    }
}

/// An asset handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct Asset {
    pub data: Bytes,
    /// Identity of the asset, used for lookups and supersession logs.
    pub checksum: [u8; CHECKSUM_LEN],
    pub asset_id: String,
    pub class: AssetClass,
}

impl Asset {
    /// Creates an asset keyed by the SHA-256 of its content.
    pub fn new(class: AssetClass, asset_id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            checksum: ChecksumAlgorithm::Sha256.digest(&data),
            data,
            asset_id: asset_id.into(),
            class,
        }
    }

    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }
}
