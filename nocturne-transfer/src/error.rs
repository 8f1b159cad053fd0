//! Transfer error types.

use crate::asset::AssetClass;
use nocturne_protocol::{ErrorCode, ProtocolError};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while planning, sending or reassembling a bulk transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("checksum mismatch for transfer {checksum}")]
    ChecksumMismatch { checksum: String },

    #[error("chunk count mismatch: expected {expected}, received {received}")]
    ChunkCountMismatch { expected: u32, received: u32 },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("asset too large: {0} bytes")]
    AssetTooLarge(usize),

    #[error("transfer announces no chunks")]
    NoChunks,

    #[error("too many chunks: {chunks} (max {max})")]
    TooManyChunks { chunks: usize, max: usize },

    #[error("chunk {index} out of range (total {total})")]
    UnexpectedChunk { index: u16, total: u32 },

    #[error("no transfer in progress")]
    NoActiveTransfer,

    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("chunk {index} dropped")]
    ChunkDropped { index: u16 },

    #[error("{0} message not delivered")]
    NotDelivered(&'static str),

    #[error("asset not available: {0}")]
    AssetNotAvailable(String),

    #[error("peer not subscribed to bulk channel")]
    NotSubscribed,

    #[error("peer does not accept {0} transfers")]
    ClassNotSupported(AssetClass),

    #[error("peer not connected")]
    PeerNotConnected,

    #[error("binary protocol not negotiated")]
    ProtocolNotNegotiated,

    #[error("link congested")]
    LinkCongested,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransferError {
    /// Returns whether the same asset may be sent again later.
    ///
    /// Validation failures are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Timeout(_)
                | TransferError::ChunkDropped { .. }
                | TransferError::NotDelivered(_)
                | TransferError::LinkCongested
        )
    }

    /// Maps this error to its wire error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TransferError::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            TransferError::AssetNotAvailable(_) => ErrorCode::AssetNotAvailable,
            TransferError::NotSubscribed | TransferError::ClassNotSupported(_) => {
                ErrorCode::NotSubscribed
            }
            TransferError::Protocol(e) => ErrorCode::from(e),
            TransferError::ChunkCountMismatch { .. }
            | TransferError::SizeMismatch { .. }
            | TransferError::UnexpectedChunk { .. }
            | TransferError::NoChunks
            | TransferError::NoActiveTransfer
            | TransferError::Timeout(_)
            | TransferError::Cancelled
            | TransferError::ChunkDropped { .. }
            | TransferError::NotDelivered(_)
            | TransferError::LinkCongested => ErrorCode::TransferFailed,
            _ => ErrorCode::Internal,
        }
    }
}
