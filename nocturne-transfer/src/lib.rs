//! # nocturne-transfer
//!
//! Bulk asset transfer over a small-MTU link.
//!
//! This crate provides:
//! - Optional zlib compression and a 32-byte digest over the transmitted bytes
//! - Chunk sizing derived from the negotiated MTU
//! - A transfer plan with encoded start, chunk and end frames
//! - A receive-side reassembler that validates before accepting an asset

pub mod asset;
pub mod compress;
pub mod encoder;
pub mod error;
pub mod reassembler;

#[cfg(test)]
mod proptest;

pub use asset::{Asset, AssetClass, ChecksumAlgorithm};
pub use encoder::{BulkTransfer, ChunkEncoder};
pub use error::TransferError;
pub use reassembler::{CompletedAsset, Reassembler, ReassemblyState};

use nocturne_protocol::FRAME_HEADER_SIZE;

/// Link-layer bytes consumed by every write (opcode and handle).
pub const LINK_HEADER_OVERHEAD: usize = 3;

/// Headroom left under the MTU.
pub const SAFETY_MARGIN: usize = 4;

/// Smallest chunk ever produced, whatever the MTU.
pub const MIN_CHUNK_SIZE: usize = 16;

/// Chunk indices travel in the 16-bit message id.
pub const MAX_CHUNKS: usize = u16::MAX as usize;

/// MTU assumed before the peer negotiates a larger one.
pub const DEFAULT_MTU: u16 = 23;

/// Default zlib compression level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Returns the chunk payload size for a negotiated MTU.
pub fn chunk_size_for_mtu(mtu: u16) -> usize {
    (mtu as usize)
        .saturating_sub(LINK_HEADER_OVERHEAD)
        .saturating_sub(FRAME_HEADER_SIZE)
        .saturating_sub(SAFETY_MARGIN)
        .max(MIN_CHUNK_SIZE)
}

/// Number of chunks needed for `len` bytes. Never zero.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size).max(1)
}
