//! Peer error types.

use thiserror::Error;

/// Peer-side errors.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] nocturne_protocol::ProtocolError),

    #[error("transfer error: {0}")]
    Transfer(#[from] nocturne_transfer::TransferError),

    #[error("peer {0} not attached")]
    NotAttached(String),
}

impl PeerError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            PeerError::Transfer(e) => e.is_retryable(),
            _ => false,
        }
    }
}
