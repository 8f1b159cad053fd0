//! Binary frame format.
//!
//! Frame layout (16 bytes header + payload), all integers big-endian:
//!
//! ```text
//! +---------+------------+------------+--------------+--------+--------+----------+
//! | version |    type    | message_id | payload_size | crc32  | flags  | reserved |
//! | 4 bits  |  12 bits   |  2 bytes   |   4 bytes    |4 bytes |2 bytes | 2 bytes  |
//! +---------+------------+------------+--------------+--------+--------+----------+
//! | payload                                                                       |
//! | payload_size bytes                                                            |
//! +-------------------------------------------------------------------------------+
//! ```
//!
//! The CRC covers the payload only. For chunk frames `message_id` carries the
//! chunk index.

use crate::error::ProtocolError;
use crate::message::MessageType;
use crate::{MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes (2+2+4+4+2+2 = 16).
pub const FRAME_HEADER_SIZE: usize = 16;

/// Frame flags bitfield. All bits are reserved in this version and carried
/// through unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u16);

impl FrameFlags {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version (4 bits).
    pub version: u8,
    /// Message type (12 bits).
    pub message_type: MessageType,
    /// Correlation id or chunk index.
    pub message_id: u16,
    /// Declared payload length.
    pub payload_size: u32,
    /// CRC-32 of the payload.
    pub crc: u32,
    /// Reserved flags.
    pub flags: FrameFlags,
}

/// Header fields as read from the wire, before the type is validated.
struct RawHeader {
    version: u8,
    message_type: u16,
    message_id: u16,
    payload_size: u32,
    crc: u32,
    flags: u16,
}

impl RawHeader {
    fn parse(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::HeaderTooShort { len: buf.len() });
        }

        let version_and_type = buf.get_u16();
        let raw = Self {
            version: (version_and_type >> 12) as u8,
            message_type: version_and_type & 0x0FFF,
            message_id: buf.get_u16(),
            payload_size: buf.get_u32(),
            crc: buf.get_u32(),
            flags: buf.get_u16(),
        };

        if raw.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(raw.version));
        }
        if raw.payload_size > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: raw.payload_size,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(raw)
    }

    fn into_header(self) -> Result<FrameHeader, ProtocolError> {
        Ok(FrameHeader {
            version: self.version,
            message_type: MessageType::try_from(self.message_type)?,
            message_id: self.message_id,
            payload_size: self.payload_size,
            crc: self.crc,
            flags: FrameFlags::from_bits(self.flags),
        })
    }
}

/// Result of decoding a byte slice that may hold only part of a frame.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// Header and full payload present, CRC verified.
    Complete(Frame),
    /// Header present but fewer payload bytes than declared; CRC not yet checked.
    Partial { header: FrameHeader, payload: Bytes },
}

impl Decoded {
    pub fn is_complete(&self) -> bool {
        matches!(self, Decoded::Complete(_))
    }

    pub fn header(&self) -> FrameHeader {
        match self {
            Decoded::Complete(frame) => frame.header(),
            Decoded::Partial { header, .. } => *header,
        }
    }
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type.
    pub message_type: MessageType,
    /// Correlation id or chunk index.
    pub message_id: u16,
    /// Reserved flags.
    pub flags: FrameFlags,
    /// Frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame with the given payload and a zero message id.
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            message_id: 0,
            flags: FrameFlags::new(),
            payload: payload.into(),
        }
    }

    /// Creates a frame with no payload.
    pub fn empty(message_type: MessageType) -> Self {
        Self::new(message_type, Bytes::new())
    }

    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.message_id = message_id;
        self
    }

    /// Returns the header this frame encodes to.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            version: PROTOCOL_VERSION,
            message_type: self.message_type,
            message_id: self.message_id,
            payload_size: self.payload.len() as u32,
            crc: crc32fast::hash(&self.payload),
            flags: self.flags,
        }
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len().min(u32::MAX as usize) as u32,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());

        // Version (4 bits) | type (12 bits)
        buf.put_u16(((PROTOCOL_VERSION as u16) << 12) | (self.message_type.as_u16() & 0x0FFF));

        // Message id (2 bytes)
        buf.put_u16(self.message_id);

        // Payload length (4 bytes)
        buf.put_u32(self.payload.len() as u32);

        // CRC-32 of payload (4 bytes)
        buf.put_u32(crc32fast::hash(&self.payload));

        // Flags (2 bytes)
        buf.put_u16(self.flags.bits());

        // Reserved (2 bytes)
        buf.put_u16(0);

        buf.put_slice(&self.payload);

        Ok(buf)
    }

    /// Encodes a message in one call.
    pub fn encode_message(
        message_type: MessageType,
        payload: &[u8],
        message_id: u16,
    ) -> Result<Bytes, ProtocolError> {
        Frame::new(message_type, Bytes::copy_from_slice(payload))
            .with_message_id(message_id)
            .encode()
            .map(BytesMut::freeze)
    }

    /// Decodes a frame from a byte slice.
    ///
    /// Returns `Decoded::Partial` when the slice holds fewer payload bytes than
    /// the header declares. Fails on a short header, unsupported version,
    /// unknown type, oversize payload or CRC mismatch.
    pub fn decode(bytes: &[u8]) -> Result<Decoded, ProtocolError> {
        let header = RawHeader::parse(bytes)?.into_header()?;
        let available = &bytes[FRAME_HEADER_SIZE..];
        let size = header.payload_size as usize;

        if available.len() < size {
            return Ok(Decoded::Partial {
                header,
                payload: Bytes::copy_from_slice(available),
            });
        }

        let payload = &available[..size];
        verify_crc(header.crc, payload)?;

        Ok(Decoded::Complete(Frame {
            message_type: header.message_type,
            message_id: header.message_id,
            flags: header.flags,
            payload: Bytes::copy_from_slice(payload),
        }))
    }

    /// Decodes the next frame from a stream buffer, consuming it.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors. A bad
    /// header clears the buffer since no frame boundary can be trusted after it.
    pub fn decode_buf(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let raw = match RawHeader::parse(&buf[..FRAME_HEADER_SIZE]) {
            Ok(raw) => raw,
            Err(e) => {
                buf.clear();
                return Err(e);
            }
        };

        let total_len = FRAME_HEADER_SIZE + raw.payload_size as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(raw.payload_size as usize).freeze();

        verify_crc(raw.crc, &payload)?;
        let header = raw.into_header()?;

        Ok(Some(Frame {
            message_type: header.message_type,
            message_id: header.message_id,
            flags: header.flags,
            payload,
        }))
    }
}

fn verify_crc(expected: u32, payload: &[u8]) -> Result<(), ProtocolError> {
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(ProtocolError::CrcMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(decoded: Decoded) -> Frame {
        match decoded {
            Decoded::Complete(frame) => frame,
            Decoded::Partial { .. } => panic!("expected complete frame"),
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(MessageType::FullState, &b"hello world"[..]).with_message_id(7);

        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + 11);

        let decoded = complete(Frame::decode(&encoded).unwrap());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_header_layout() {
        let encoded = Frame::encode_message(MessageType::AlbumArtChunk, b"abc", 0x0102).unwrap();

        // version 2 in the high nibble, type 0x301 in the low 12 bits
        assert_eq!(&encoded[0..2], &[0x23, 0x01]);
        assert_eq!(&encoded[2..4], &[0x01, 0x02]);
        assert_eq!(&encoded[4..8], &[0, 0, 0, 3]);
        assert_eq!(&encoded[8..12], &crc32fast::hash(b"abc").to_be_bytes());
        assert_eq!(&encoded[12..16], &[0, 0, 0, 0]);
        assert_eq!(&encoded[16..], b"abc");
    }

    #[test]
    fn test_crc_validation() {
        let mut encoded = Frame::new(MessageType::FullState, &b"payload"[..])
            .encode()
            .unwrap();

        let len = encoded.len();
        encoded[len - 1] ^= 0xFF;

        let result = Frame::decode(&encoded);
        assert!(matches!(result, Err(ProtocolError::CrcMismatch { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let mut encoded = Frame::empty(MessageType::Play).encode().unwrap();
        encoded[0] = (encoded[0] & 0x0F) | 0x10;

        let result = Frame::decode(&encoded);
        assert!(matches!(result, Err(ProtocolError::UnsupportedVersion(1))));
    }

    #[test]
    fn test_unknown_message_type() {
        let mut encoded = Frame::empty(MessageType::Play).encode().unwrap();
        encoded[0] = 0x25;
        encoded[1] = 0x55;

        let result = Frame::decode(&encoded);
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownMessageType(0x555))
        ));
    }

    #[test]
    fn test_short_header() {
        let result = Frame::decode(&[0x20, 0x01, 0x00]);
        assert!(matches!(
            result,
            Err(ProtocolError::HeaderTooShort { len: 3 })
        ));
    }

    #[test]
    fn test_partial_payload() {
        let encoded = Frame::new(MessageType::TestChunk, vec![9u8; 40])
            .with_message_id(3)
            .encode()
            .unwrap();

        let decoded = Frame::decode(&encoded[..FRAME_HEADER_SIZE + 10]).unwrap();
        assert!(!decoded.is_complete());
        match decoded {
            Decoded::Partial { header, payload } => {
                assert_eq!(header.payload_size, 40);
                assert_eq!(header.message_id, 3);
                assert_eq!(payload.len(), 10);
            }
            Decoded::Complete(_) => panic!("expected partial frame"),
        }
    }

    #[test]
    fn test_frame_too_large_declared() {
        let mut encoded = Frame::empty(MessageType::Play).encode().unwrap();
        encoded[4..8].copy_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());

        let result = Frame::decode(&encoded);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_frame_too_large_encode() {
        let frame = Frame::new(
            MessageType::TestChunk,
            vec![0u8; MAX_PAYLOAD_SIZE as usize + 1],
        );
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_flags_carried_through() {
        let mut frame = Frame::empty(MessageType::Pause);
        frame.flags = FrameFlags::from_bits(0x8001);

        let encoded = frame.encode().unwrap();
        let decoded = complete(Frame::decode(&encoded).unwrap());
        assert_eq!(decoded.flags.bits(), 0x8001);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut encoded = Frame::new(MessageType::VolumeUpdate, vec![42u8])
            .encode()
            .unwrap();
        encoded.extend_from_slice(b"junk");

        let decoded = complete(Frame::decode(&encoded).unwrap());
        assert_eq!(decoded.payload.as_ref(), &[42u8]);
    }

    #[test]
    fn test_stream_decode_multiple_frames() {
        let frame1 = Frame::new(MessageType::AlbumArtChunk, &b"one"[..]).with_message_id(0);
        let frame2 = Frame::new(MessageType::AlbumArtChunk, &b"two"[..]).with_message_id(1);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame1.encode().unwrap());
        buf.extend_from_slice(&frame2.encode().unwrap());

        assert_eq!(Frame::decode_buf(&mut buf).unwrap().unwrap(), frame1);
        assert_eq!(Frame::decode_buf(&mut buf).unwrap().unwrap(), frame2);
        assert!(Frame::decode_buf(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_stream_decode_bad_header_clears_buffer() {
        let mut buf = BytesMut::from(&[0xFFu8; 20][..]);
        assert!(Frame::decode_buf(&mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_stream_decode_crc_error_consumes_frame() {
        let mut bad = Frame::new(MessageType::PlayState, vec![1u8]).encode().unwrap();
        bad[FRAME_HEADER_SIZE] = 0;
        let good = Frame::new(MessageType::PlayState, vec![1u8]);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&bad);
        buf.extend_from_slice(&good.encode().unwrap());

        assert!(matches!(
            Frame::decode_buf(&mut buf),
            Err(ProtocolError::CrcMismatch { .. })
        ));
        assert_eq!(Frame::decode_buf(&mut buf).unwrap().unwrap(), good);
    }
}
