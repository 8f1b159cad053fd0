//! Property-based tests for framing and payloads.

use bytes::BytesMut;
use proptest::prelude::*;

use crate::{Decoded, Decoder, Frame, FullState, MessageType, ProtocolError, FRAME_HEADER_SIZE};

fn arb_message_type() -> impl Strategy<Value = MessageType> {
    prop::sample::select(vec![
        MessageType::Capabilities,
        MessageType::TimeSync,
        MessageType::Play,
        MessageType::SeekTo,
        MessageType::FullState,
        MessageType::PositionUpdate,
        MessageType::AlbumArtStart,
        MessageType::AlbumArtChunk,
        MessageType::AlbumArtEnd,
        MessageType::TestChunk,
        MessageType::WeatherChunk,
        MessageType::Error,
        MessageType::GradientColors,
    ])
}

prop_compose! {
    fn arb_frame()(
        message_type in arb_message_type(),
        message_id in any::<u16>(),
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    ) -> Frame {
        Frame::new(message_type, payload).with_message_id(message_id)
    }
}

prop_compose! {
    fn arb_full_state()(
        is_playing in any::<bool>(),
        duration_ms in any::<u32>(),
        position_ms in any::<u32>(),
        volume_percent in 0u8..=100,
        artist in ".{0,64}",
        album in ".{0,64}",
        track in ".{0,64}",
    ) -> FullState {
        FullState { is_playing, duration_ms, position_ms, volume_percent, artist, album, track }
    }
}

proptest! {
    #[test]
    fn frame_roundtrip(frame in arb_frame()) {
        let encoded = frame.encode().unwrap();
        match Frame::decode(&encoded).unwrap() {
            Decoded::Complete(decoded) => prop_assert_eq!(decoded, frame),
            Decoded::Partial { .. } => prop_assert!(false, "complete frame decoded as partial"),
        }
    }

    #[test]
    fn payload_mutation_fails_crc(
        frame in arb_frame().prop_filter("needs payload", |f| !f.payload.is_empty()),
        offset in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut encoded = frame.encode().unwrap();
        let i = FRAME_HEADER_SIZE + offset.index(frame.payload.len());
        encoded[i] ^= flip;

        let is_crc_mismatch = matches!(Frame::decode(&encoded), Err(ProtocolError::CrcMismatch { .. }));
        prop_assert!(is_crc_mismatch);
    }

    #[test]
    fn stream_split_anywhere(frames in prop::collection::vec(arb_frame(), 1..6), split in 1usize..64) {
        let mut wire = BytesMut::new();
        for frame in &frames {
            wire.extend_from_slice(&frame.encode().unwrap());
        }

        let mut decoder = Decoder::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(split) {
            decoder.extend(piece);
            while let Some(frame) = decoder.decode_frame().unwrap() {
                decoded.push(frame);
            }
        }
        prop_assert_eq!(decoded, frames);
        prop_assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Frame::decode(&data);

        let mut decoder = Decoder::new();
        decoder.extend(&data);
        let _ = decoder.drain();
    }

    #[test]
    fn full_state_roundtrip(state in arb_full_state()) {
        let encoded = state.encode().unwrap();
        prop_assert_eq!(FullState::decode(&encoded).unwrap(), state);
    }

    #[test]
    fn full_state_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = FullState::decode(&data);
    }
}
