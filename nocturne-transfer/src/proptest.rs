//! Property-based tests for the transfer pipeline.

use proptest::prelude::*;

use crate::{
    chunk_size_for_mtu, AssetClass, ChecksumAlgorithm, ChunkEncoder, Reassembler, MIN_CHUNK_SIZE,
};

fn arb_encoder() -> impl Strategy<Value = ChunkEncoder> {
    (
        prop::sample::select(vec![ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Blake3]),
        prop::option::of(0u32..=9),
    )
        .prop_map(|(checksum, level)| ChunkEncoder::new(checksum, level))
}

proptest! {
    #[test]
    fn compress_chunk_reassemble_is_identity(
        encoder in arb_encoder(),
        data in prop::collection::vec(any::<u8>(), 0..8192),
        mtu in 23u16..=517,
    ) {
        let plan = encoder.plan(&data, mtu, "prop", AssetClass::AlbumArt).unwrap();
        let mut rx = Reassembler::new(AssetClass::AlbumArt);

        rx.on_frame(&plan.start_frame().unwrap()).unwrap();
        for frame in plan.chunk_frames() {
            rx.on_frame(&frame).unwrap();
        }
        let asset = rx.on_frame(&plan.end_frame(true)).unwrap().unwrap();
        prop_assert_eq!(asset.data.as_ref(), data.as_slice());
    }

    #[test]
    fn chunk_count_matches_formula(
        encoder in arb_encoder(),
        data in prop::collection::vec(any::<u8>(), 1..4096),
        mtu in 23u16..=517,
    ) {
        let plan = encoder.plan(&data, mtu, "", AssetClass::Test).unwrap();
        let size = plan.payload_size() as usize;
        prop_assert_eq!(plan.total_chunks(), size.div_ceil(plan.chunk_size));
        prop_assert!(plan.chunks.iter().all(|c| c.len() <= plan.chunk_size));
    }

    #[test]
    fn chunk_size_never_below_minimum(mtu in any::<u16>()) {
        prop_assert!(chunk_size_for_mtu(mtu) >= MIN_CHUNK_SIZE);
    }
}
