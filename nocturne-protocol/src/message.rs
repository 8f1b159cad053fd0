//! Message type registry.
//!
//! Message types are 12-bit values; the high nibble selects a namespace.

use crate::error::ProtocolError;

/// Message type namespaces (high nibble of the 12-bit type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    System,
    Command,
    State,
    BulkTransfer,
    Error,
    Gradient,
}

/// All message types understood by this protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    // System 0x0xx
    Capabilities = 0x001,
    TimeSync = 0x002,
    ProtocolEnable = 0x003,

    // Commands 0x1xx (peer -> host)
    Play = 0x100,
    Pause = 0x101,
    Next = 0x102,
    Previous = 0x103,
    SeekTo = 0x104,
    SetVolume = 0x105,
    RequestState = 0x106,
    AlbumArtQuery = 0x108,
    TestAlbumArt = 0x109,
    RequestCapabilities = 0x10A,
    RequestTimeSync = 0x10B,

    // State 0x2xx (host -> peer)
    FullState = 0x200,
    PositionUpdate = 0x201,
    PlayState = 0x202,
    VolumeUpdate = 0x203,

    // Bulk transfer 0x3xx
    AlbumArtStart = 0x300,
    AlbumArtChunk = 0x301,
    AlbumArtEnd = 0x302,
    AlbumArtNotAvailable = 0x303,
    TransferResult = 0x304,
    TestStart = 0x310,
    TestChunk = 0x311,
    TestEnd = 0x312,
    WeatherStart = 0x320,
    WeatherChunk = 0x321,
    WeatherEnd = 0x322,

    // Errors 0x4xx
    Error = 0x400,

    // Gradient 0x6xx
    GradientColors = 0x600,
}

impl MessageType {
    /// Wire value of this type.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the namespace this type belongs to.
    pub fn namespace(self) -> Namespace {
        match self.as_u16() >> 8 {
            0x0 => Namespace::System,
            0x1 => Namespace::Command,
            0x2 => Namespace::State,
            0x3 => Namespace::BulkTransfer,
            0x4 => Namespace::Error,
            _ => Namespace::Gradient,
        }
    }

    /// Returns whether this is a transfer start frame (any asset class).
    pub fn is_transfer_start(self) -> bool {
        matches!(
            self,
            MessageType::AlbumArtStart | MessageType::TestStart | MessageType::WeatherStart
        )
    }

    /// Returns whether this is a transfer chunk frame (any asset class).
    pub fn is_transfer_chunk(self) -> bool {
        matches!(
            self,
            MessageType::AlbumArtChunk | MessageType::TestChunk | MessageType::WeatherChunk
        )
    }

    /// Returns whether this is a transfer end frame (any asset class).
    pub fn is_transfer_end(self) -> bool {
        matches!(
            self,
            MessageType::AlbumArtEnd | MessageType::TestEnd | MessageType::WeatherEnd
        )
    }

    /// Returns whether this type belongs to the test transfer range.
    pub fn is_test(self) -> bool {
        matches!(
            self,
            MessageType::TestStart | MessageType::TestChunk | MessageType::TestEnd
        )
    }
}

impl TryFrom<u16> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, ProtocolError> {
        let ty = match value {
            0x001 => MessageType::Capabilities,
            0x002 => MessageType::TimeSync,
            0x003 => MessageType::ProtocolEnable,
            0x100 => MessageType::Play,
            0x101 => MessageType::Pause,
            0x102 => MessageType::Next,
            0x103 => MessageType::Previous,
            0x104 => MessageType::SeekTo,
            0x105 => MessageType::SetVolume,
            0x106 => MessageType::RequestState,
            0x108 => MessageType::AlbumArtQuery,
            0x109 => MessageType::TestAlbumArt,
            0x10A => MessageType::RequestCapabilities,
            0x10B => MessageType::RequestTimeSync,
            0x200 => MessageType::FullState,
            0x201 => MessageType::PositionUpdate,
            0x202 => MessageType::PlayState,
            0x203 => MessageType::VolumeUpdate,
            0x300 => MessageType::AlbumArtStart,
            0x301 => MessageType::AlbumArtChunk,
            0x302 => MessageType::AlbumArtEnd,
            0x303 => MessageType::AlbumArtNotAvailable,
            0x304 => MessageType::TransferResult,
            0x310 => MessageType::TestStart,
            0x311 => MessageType::TestChunk,
            0x312 => MessageType::TestEnd,
            0x320 => MessageType::WeatherStart,
            0x321 => MessageType::WeatherChunk,
            0x322 => MessageType::WeatherEnd,
            0x400 => MessageType::Error,
            0x600 => MessageType::GradientColors,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };
        Ok(ty)
    }
}

impl From<MessageType> for u16 {
    fn from(ty: MessageType) -> u16 {
        ty as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces() {
        assert_eq!(MessageType::Capabilities.namespace(), Namespace::System);
        assert_eq!(MessageType::SetVolume.namespace(), Namespace::Command);
        assert_eq!(MessageType::FullState.namespace(), Namespace::State);
        assert_eq!(MessageType::TestChunk.namespace(), Namespace::BulkTransfer);
        assert_eq!(MessageType::Error.namespace(), Namespace::Error);
        assert_eq!(MessageType::GradientColors.namespace(), Namespace::Gradient);
    }

    #[test]
    fn test_all_types_fit_in_12_bits() {
        for raw in 0u16..0x1000 {
            if let Ok(ty) = MessageType::try_from(raw) {
                assert_eq!(ty.as_u16(), raw);
                assert!(ty.as_u16() <= 0x0FFF);
            }
        }
    }

    #[test]
    fn test_unknown_type() {
        assert!(matches!(
            MessageType::try_from(0x5AA),
            Err(ProtocolError::UnknownMessageType(0x5AA))
        ));
    }

    #[test]
    fn test_transfer_classification() {
        assert!(MessageType::WeatherStart.is_transfer_start());
        assert!(MessageType::AlbumArtChunk.is_transfer_chunk());
        assert!(MessageType::TestEnd.is_transfer_end());
        assert!(MessageType::TestChunk.is_test());
        assert!(!MessageType::AlbumArtChunk.is_test());
        assert!(!MessageType::AlbumArtNotAvailable.is_transfer_end());
    }
}
