//! Receive-side reassembly and validation.

use crate::asset::{AssetClass, ChecksumAlgorithm};
use crate::compress;
use crate::error::TransferError;
use crate::MAX_CHUNKS;
use bytes::{Bytes, BytesMut};
use nocturne_protocol::payload::CHECKSUM_LEN;
use nocturne_protocol::{Frame, ProtocolError, TransferEnd, TransferStart};

/// Receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    Idle,
    Receiving,
    Completed,
    Failed,
}

/// A validated, decompressed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedAsset {
    pub class: AssetClass,
    pub asset_id: String,
    pub checksum: [u8; CHECKSUM_LEN],
    pub data: Bytes,
}

#[derive(Debug)]
struct Inflight {
    start: TransferStart,
    chunks: Vec<Option<Bytes>>,
    received: u32,
    received_bytes: usize,
}

/// Reassembles one transfer at a time for a single asset class.
///
/// The digest is taken from each start message, so the receiver never
/// needs to agree on it out of band.
#[derive(Debug)]
pub struct Reassembler {
    class: AssetClass,
    state: ReassemblyState,
    inflight: Option<Inflight>,
}

impl Reassembler {
    pub fn new(class: AssetClass) -> Self {
        Self {
            class,
            state: ReassemblyState::Idle,
            inflight: None,
        }
    }

    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    pub fn class(&self) -> AssetClass {
        self.class
    }

    /// Chunks received for the open transfer.
    pub fn received_chunks(&self) -> u32 {
        self.inflight.as_ref().map_or(0, |t| t.received)
    }

    /// Chunks announced by the open transfer's start message.
    pub fn expected_chunks(&self) -> u32 {
        self.inflight.as_ref().map_or(0, |t| t.start.total_chunks)
    }

    /// Routes a start, chunk or end frame of this reassembler's class.
    pub fn on_frame(&mut self, frame: &Frame) -> Result<Option<CompletedAsset>, TransferError> {
        let ty = frame.message_type;
        if AssetClass::from_message_type(ty) != Some(self.class) {
            return Err(ProtocolError::UnexpectedMessage(ty.as_u16()).into());
        }

        if ty.is_transfer_start() {
            self.on_start(TransferStart::from_frame(frame)?)?;
            Ok(None)
        } else if ty.is_transfer_chunk() {
            self.on_chunk(frame.message_id, frame.payload.clone())?;
            Ok(None)
        } else {
            self.on_end(TransferEnd::from_frame(frame)?)
        }
    }

    /// Opens a transfer, discarding any unfinished one.
    pub fn on_start(&mut self, start: TransferStart) -> Result<(), TransferError> {
        let total = start.total_chunks as usize;
        if total == 0 {
            self.fail();
            return Err(TransferError::NoChunks);
        }
        if total > MAX_CHUNKS {
            self.fail();
            return Err(TransferError::TooManyChunks {
                chunks: total,
                max: MAX_CHUNKS,
            });
        }

        if let Some(previous) = self.inflight.take() {
            tracing::debug!(
                "Discarding unfinished {} transfer {} ({}/{} chunks)",
                self.class,
                hex::encode(&previous.start.checksum[..8]),
                previous.received,
                previous.start.total_chunks
            );
        }

        tracing::debug!(
            "Receiving {} transfer {}: {} chunks, {} bytes",
            self.class,
            hex::encode(&start.checksum[..8]),
            start.total_chunks,
            start.original_size
        );

        self.inflight = Some(Inflight {
            chunks: vec![None; total],
            received: 0,
            received_bytes: 0,
            start,
        });
        self.state = ReassemblyState::Receiving;
        Ok(())
    }

    /// Stores a chunk. Duplicates are ignored.
    pub fn on_chunk(&mut self, index: u16, payload: Bytes) -> Result<(), TransferError> {
        let inflight = self
            .inflight
            .as_mut()
            .ok_or(TransferError::NoActiveTransfer)?;

        let total = inflight.start.total_chunks;
        let slot = inflight
            .chunks
            .get_mut(index as usize)
            .ok_or(TransferError::UnexpectedChunk { index, total })?;

        if slot.is_none() {
            inflight.received_bytes += payload.len();
            *slot = Some(payload);
            inflight.received += 1;
        }
        Ok(())
    }

    /// Closes the open transfer.
    ///
    /// A failure end discards the transfer without touching its bytes. A
    /// success end validates and decompresses; any mismatch fails the transfer.
    pub fn on_end(&mut self, end: TransferEnd) -> Result<Option<CompletedAsset>, TransferError> {
        let inflight = self
            .inflight
            .take()
            .ok_or(TransferError::NoActiveTransfer)?;

        if !end.success {
            tracing::debug!(
                "{} transfer {} cancelled by sender after {}/{} chunks",
                self.class,
                hex::encode(&inflight.start.checksum[..8]),
                inflight.received,
                inflight.start.total_chunks
            );
            self.state = ReassemblyState::Failed;
            return Ok(None);
        }

        match self.validate(inflight, end) {
            Ok(asset) => {
                self.state = ReassemblyState::Completed;
                Ok(Some(asset))
            }
            Err(e) => {
                tracing::warn!("{} transfer rejected: {}", self.class, e);
                self.state = ReassemblyState::Failed;
                Err(e)
            }
        }
    }

    fn validate(&self, inflight: Inflight, end: TransferEnd) -> Result<CompletedAsset, TransferError> {
        let start = inflight.start;
        let checksum_hex = hex::encode(start.checksum);

        if inflight.received != start.total_chunks {
            return Err(TransferError::ChunkCountMismatch {
                expected: start.total_chunks,
                received: inflight.received,
            });
        }

        // Declared sizes are untrusted; only allocate what actually arrived.
        if inflight.received_bytes as u64 != u64::from(start.payload_size()) {
            return Err(TransferError::SizeMismatch {
                expected: u64::from(start.payload_size()),
                actual: inflight.received_bytes as u64,
            });
        }

        let mut body = BytesMut::with_capacity(inflight.received_bytes);
        for chunk in inflight.chunks.into_iter().flatten() {
            body.extend_from_slice(&chunk);
        }

        if end.checksum != start.checksum {
            return Err(TransferError::ChecksumMismatch {
                checksum: checksum_hex,
            });
        }

        let actual = ChecksumAlgorithm::for_start(&start).digest(&body);
        if actual != start.checksum {
            tracing::debug!("Digest over received bytes is {}", hex::encode(actual));
            return Err(TransferError::ChecksumMismatch {
                checksum: checksum_hex,
            });
        }

        let data = match start.compressed_size {
            Some(_) => {
                let raw = compress::decompress(&body, start.original_size as usize)
                    .map_err(TransferError::Compression)?;
                Bytes::from(raw)
            }
            None => body.freeze(),
        };

        if data.len() as u64 != start.original_size as u64 {
            return Err(TransferError::SizeMismatch {
                expected: start.original_size as u64,
                actual: data.len() as u64,
            });
        }

        tracing::debug!(
            "{} transfer {} complete: {} bytes",
            self.class,
            &checksum_hex[..16],
            data.len()
        );

        Ok(CompletedAsset {
            class: self.class,
            asset_id: start.asset_id,
            checksum: start.checksum,
            data,
        })
    }

    fn fail(&mut self) {
        self.inflight = None;
        self.state = ReassemblyState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{BulkTransfer, ChunkEncoder};

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 31) % 251) as u8).collect()
    }

    fn plan(data: &[u8], mtu: u16) -> BulkTransfer {
        ChunkEncoder::default()
            .plan(data, mtu, "asset", AssetClass::AlbumArt)
            .unwrap()
    }

    fn feed(rx: &mut Reassembler, plan: &BulkTransfer) -> Option<CompletedAsset> {
        rx.on_frame(&plan.start_frame().unwrap()).unwrap();
        for frame in plan.chunk_frames() {
            rx.on_frame(&frame).unwrap();
        }
        rx.on_frame(&plan.end_frame(true)).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let data = sample(50_000);
        let plan = plan(&data, 185);
        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        assert_eq!(rx.state(), ReassemblyState::Idle);

        let asset = feed(&mut rx, &plan).unwrap();
        assert_eq!(rx.state(), ReassemblyState::Completed);
        assert_eq!(asset.data.as_ref(), data.as_slice());
        assert_eq!(asset.checksum, plan.checksum);
        assert_eq!(asset.asset_id, "asset");
    }

    #[test]
    fn test_out_of_order_and_duplicate_chunks() {
        let data = sample(3_000);
        let plan = ChunkEncoder::new(ChecksumAlgorithm::Sha256, None)
            .plan(&data, 23, "x", AssetClass::AlbumArt)
            .unwrap();
        let mut rx = Reassembler::new(AssetClass::AlbumArt);

        rx.on_frame(&plan.start_frame().unwrap()).unwrap();
        let frames: Vec<_> = plan.chunk_frames().collect();
        for frame in frames.iter().rev() {
            rx.on_frame(frame).unwrap();
        }
        rx.on_frame(&frames[0]).unwrap();
        assert_eq!(rx.received_chunks(), plan.total_chunks() as u32);

        let asset = rx.on_frame(&plan.end_frame(true)).unwrap().unwrap();
        assert_eq!(asset.data.as_ref(), data.as_slice());
    }

    #[test]
    fn test_cancel_discards_without_decompressing() {
        let data = sample(40 * 494);
        let plan = ChunkEncoder::new(ChecksumAlgorithm::Sha256, None)
            .plan(&data, 517, "x", AssetClass::AlbumArt)
            .unwrap();
        assert_eq!(plan.total_chunks(), 40);

        // Raw bytes announced as compressed: inflating them would fail.
        let mut start = plan.start_payload();
        start.compressed_size = Some(plan.original_size);

        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        rx.on_start(start).unwrap();
        for frame in plan.chunk_frames().take(5) {
            rx.on_frame(&frame).unwrap();
        }
        assert_eq!(rx.received_chunks(), 5);

        let result = rx.on_frame(&plan.failure_end()).unwrap();
        assert!(result.is_none());
        assert_eq!(rx.state(), ReassemblyState::Failed);
        assert_eq!(rx.received_chunks(), 0);
    }

    #[test]
    fn test_missing_chunk() {
        let plan = plan(&sample(4_000), 23);
        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        rx.on_frame(&plan.start_frame().unwrap()).unwrap();
        for frame in plan.chunk_frames().skip(1) {
            rx.on_frame(&frame).unwrap();
        }

        let err = rx.on_frame(&plan.end_frame(true)).unwrap_err();
        assert!(matches!(err, TransferError::ChunkCountMismatch { .. }));
        assert_eq!(rx.state(), ReassemblyState::Failed);
    }

    #[test]
    fn test_corrupt_chunk_fails_digest() {
        let plan = plan(&sample(2_000), 23);
        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        rx.on_frame(&plan.start_frame().unwrap()).unwrap();
        for mut frame in plan.chunk_frames() {
            if frame.message_id == 1 {
                let mut bytes = frame.payload.to_vec();
                bytes[0] ^= 0x55;
                frame.payload = Bytes::from(bytes);
            }
            rx.on_frame(&frame).unwrap();
        }

        let err = rx.on_frame(&plan.end_frame(true)).unwrap_err();
        assert!(matches!(err, TransferError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_end_checksum_must_match_start() {
        let plan = plan(&sample(500), 517);
        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        rx.on_frame(&plan.start_frame().unwrap()).unwrap();
        for frame in plan.chunk_frames() {
            rx.on_frame(&frame).unwrap();
        }
        let end = TransferEnd {
            checksum: [0; 32],
            success: true,
        };
        assert!(matches!(
            rx.on_end(end),
            Err(TransferError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_blake3_announced_in_start() {
        let data = sample(5_000);
        let plan = ChunkEncoder::new(ChecksumAlgorithm::Blake3, Some(6))
            .plan(&data, 185, "b3", AssetClass::AlbumArt)
            .unwrap();
        let mut rx = Reassembler::new(AssetClass::AlbumArt);

        let asset = feed(&mut rx, &plan).unwrap();
        assert_eq!(asset.data.as_ref(), data.as_slice());
        assert_eq!(asset.checksum, ChecksumAlgorithm::Blake3.digest(&plan.chunks.concat()));
    }

    #[test]
    fn test_digest_must_match_announced_algorithm() {
        let plan = ChunkEncoder::new(ChecksumAlgorithm::Blake3, None)
            .plan(&sample(500), 517, "x", AssetClass::AlbumArt)
            .unwrap();
        let mut start = plan.start_payload();
        start.blake3_digest = false;

        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        rx.on_start(start).unwrap();
        for frame in plan.chunk_frames() {
            rx.on_frame(&frame).unwrap();
        }
        assert!(matches!(
            rx.on_frame(&plan.end_frame(true)),
            Err(TransferError::ChecksumMismatch { .. })
        ));
        assert_eq!(rx.state(), ReassemblyState::Failed);
    }

    #[test]
    fn test_zero_chunk_start_rejected() {
        let mut start = plan(&sample(10), 517).start_payload();
        start.total_chunks = 0;

        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        assert!(matches!(rx.on_start(start), Err(TransferError::NoChunks)));
        assert_eq!(rx.state(), ReassemblyState::Failed);
    }

    #[test]
    fn test_declared_size_not_trusted() {
        let start = TransferStart {
            checksum: ChecksumAlgorithm::Sha256.digest(b"tiny"),
            total_chunks: 1,
            original_size: u32::MAX,
            compressed_size: Some(u32::MAX),
            blake3_digest: false,
            asset_id: String::new(),
        };
        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        rx.on_start(start.clone()).unwrap();
        rx.on_chunk(0, Bytes::from_static(b"tiny")).unwrap();

        let err = rx
            .on_end(TransferEnd {
                checksum: start.checksum,
                success: true,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::SizeMismatch {
                expected: 4_294_967_295,
                actual: 4
            }
        ));
        assert_eq!(rx.state(), ReassemblyState::Failed);
    }

    #[test]
    fn test_newer_start_replaces_unfinished() {
        let first = plan(&sample(3_000), 23);
        let second = plan(&sample(700), 23);
        let mut rx = Reassembler::new(AssetClass::AlbumArt);

        rx.on_frame(&first.start_frame().unwrap()).unwrap();
        for frame in first.chunk_frames().take(3) {
            rx.on_frame(&frame).unwrap();
        }

        let asset = feed(&mut rx, &second).unwrap();
        assert_eq!(asset.data.len(), 700);
    }

    #[test]
    fn test_chunk_without_start() {
        let mut rx = Reassembler::new(AssetClass::Test);
        assert!(matches!(
            rx.on_chunk(0, Bytes::from_static(b"x")),
            Err(TransferError::NoActiveTransfer)
        ));
    }

    #[test]
    fn test_chunk_out_of_range() {
        let plan = plan(&sample(10), 517);
        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        rx.on_frame(&plan.start_frame().unwrap()).unwrap();
        assert!(matches!(
            rx.on_chunk(9, Bytes::new()),
            Err(TransferError::UnexpectedChunk { index: 9, total: 1 })
        ));
        assert_eq!(rx.state(), ReassemblyState::Receiving);
    }

    #[test]
    fn test_rejects_other_class() {
        let plan = ChunkEncoder::default()
            .plan(b"abc", 23, "", AssetClass::Weather)
            .unwrap();
        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        assert!(rx.on_frame(&plan.start_frame().unwrap()).is_err());
    }

    #[test]
    fn test_empty_asset() {
        let plan = plan(&[], 23);
        let mut rx = Reassembler::new(AssetClass::AlbumArt);
        let asset = feed(&mut rx, &plan).unwrap();
        assert!(asset.data.is_empty());
    }
}
