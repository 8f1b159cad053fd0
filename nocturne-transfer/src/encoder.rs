//! Transfer planning: compress, digest and split an asset into frames.

use crate::asset::{AssetClass, ChecksumAlgorithm};
use crate::compress;
use crate::error::TransferError;
use crate::{chunk_count, chunk_size_for_mtu, DEFAULT_COMPRESSION_LEVEL, MAX_CHUNKS};
use bytes::Bytes;
use nocturne_protocol::payload::CHECKSUM_LEN;
use nocturne_protocol::{Frame, ProtocolError, TransferEnd, TransferStart};

/// Builds transfer plans.
#[derive(Debug, Clone, Copy)]
pub struct ChunkEncoder {
    checksum: ChecksumAlgorithm,
    compression: Option<u32>,
}

impl ChunkEncoder {
    /// Creates an encoder. `compression` is the zlib level, or `None` to send raw.
    pub fn new(checksum: ChecksumAlgorithm, compression: Option<u32>) -> Self {
        Self {
            checksum,
            compression,
        }
    }

    pub fn checksum_algorithm(&self) -> ChecksumAlgorithm {
        self.checksum
    }

    pub fn with_checksum(mut self, checksum: ChecksumAlgorithm) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn compression_level(&self) -> Option<u32> {
        self.compression
    }

    /// Plans a transfer of `source` for a link with the given MTU.
    ///
    /// The chunk size is fixed here; later MTU changes do not affect the plan.
    pub fn plan(
        &self,
        source: &[u8],
        mtu: u16,
        asset_id: &str,
        class: AssetClass,
    ) -> Result<BulkTransfer, TransferError> {
        let original_size =
            u32::try_from(source.len()).map_err(|_| TransferError::AssetTooLarge(source.len()))?;

        let (body, compressed_size) = match self.compression {
            Some(level) => {
                let packed = compress::compress(source, level).map_err(TransferError::Compression)?;
                let size = u32::try_from(packed.len())
                    .map_err(|_| TransferError::AssetTooLarge(packed.len()))?;
                (Bytes::from(packed), Some(size))
            }
            None => (Bytes::copy_from_slice(source), None),
        };

        let chunk_size = chunk_size_for_mtu(mtu);
        let total = chunk_count(body.len(), chunk_size);
        if total > MAX_CHUNKS {
            return Err(TransferError::TooManyChunks {
                chunks: total,
                max: MAX_CHUNKS,
            });
        }

        let checksum = self.checksum.digest(&body);
        let chunks = if body.is_empty() {
            vec![Bytes::new()]
        } else {
            (0..total)
                .map(|i| {
                    let start = i * chunk_size;
                    let end = (start + chunk_size).min(body.len());
                    body.slice(start..end)
                })
                .collect()
        };

        tracing::debug!(
            "Planned {} transfer {}: {} bytes -> {} bytes in {} chunks of {}",
            class,
            hex::encode(&checksum[..8]),
            original_size,
            body.len(),
            total,
            chunk_size
        );

        Ok(BulkTransfer {
            class,
            asset_id: asset_id.to_string(),
            algorithm: self.checksum,
            checksum,
            original_size,
            compressed_size,
            chunk_size,
            chunks,
        })
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new(ChecksumAlgorithm::default(), Some(DEFAULT_COMPRESSION_LEVEL))
    }
}

/// A planned transfer. Immutable once created.
#[derive(Debug, Clone)]
pub struct BulkTransfer {
    pub class: AssetClass,
    pub asset_id: String,
    /// Announced in the start message so the receiver verifies with it.
    pub algorithm: ChecksumAlgorithm,
    /// Digest of the concatenated chunks.
    pub checksum: [u8; CHECKSUM_LEN],
    pub original_size: u32,
    /// Set when the chunks carry compressed bytes.
    pub compressed_size: Option<u32>,
    pub chunk_size: usize,
    pub chunks: Vec<Bytes>,
}

impl BulkTransfer {
    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_test(&self) -> bool {
        self.class.is_test()
    }

    /// Number of bytes carried by all chunks together.
    pub fn payload_size(&self) -> u32 {
        self.compressed_size.unwrap_or(self.original_size)
    }

    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }

    pub fn start_payload(&self) -> TransferStart {
        TransferStart {
            checksum: self.checksum,
            total_chunks: self.chunks.len() as u32,
            original_size: self.original_size,
            compressed_size: self.compressed_size,
            blake3_digest: self.algorithm == ChecksumAlgorithm::Blake3,
            asset_id: self.asset_id.clone(),
        }
    }

    pub fn start_frame(&self) -> Result<Frame, ProtocolError> {
        Ok(Frame::new(
            self.class.start_type(),
            self.start_payload().encode()?,
        ))
    }

    /// Chunk frame for `index`, carrying the index in the message id.
    pub fn chunk_frame(&self, index: u16) -> Option<Frame> {
        self.chunks.get(index as usize).map(|chunk| {
            Frame::new(self.class.chunk_type(), chunk.clone()).with_message_id(index)
        })
    }

    /// Iterates every chunk frame in index order.
    pub fn chunk_frames(&self) -> impl Iterator<Item = Frame> + '_ {
        self.chunks.iter().enumerate().map(|(i, chunk)| {
            Frame::new(self.class.chunk_type(), chunk.clone()).with_message_id(i as u16)
        })
    }

    pub fn end_frame(&self, success: bool) -> Frame {
        let end = TransferEnd {
            checksum: self.checksum,
            success,
        };
        Frame::new(self.class.end_type(), end.encode())
    }

    /// End frame telling the peer to discard this transfer.
    pub fn failure_end(&self) -> Frame {
        self.end_frame(false)
    }
}
