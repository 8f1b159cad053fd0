//! Link error types.

use crate::config::ConfigError;
use crate::queue::Lane;
use crate::session::PeerId;
use nocturne_protocol::{ErrorCode, ProtocolError};
use nocturne_transfer::TransferError;
use std::time::Duration;
use thiserror::Error;

/// A lane was full when a message was enqueued.
#[derive(Debug, Clone, Error)]
#[error("{lane} lane full for peer {peer} (capacity {capacity})")]
pub struct CapacityError {
    pub peer: PeerId,
    pub lane: Lane,
    pub capacity: usize,
}

/// Failures reported by the radio transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("peer not connected")]
    NotConnected,

    #[error("send rejected: {0}")]
    Rejected(String),

    #[error("send timed out after {0:?}")]
    TimedOut(Duration),
}

/// Link errors.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("peer not connected: {0}")]
    PeerNotConnected(PeerId),
}

impl LinkError {
    /// Converts to protocol error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            LinkError::Protocol(e) => ErrorCode::from(e),
            LinkError::Transfer(e) => e.error_code(),
            LinkError::Capacity(_) => ErrorCode::TransferFailed,
            LinkError::Transport(_) => ErrorCode::TransferFailed,
            LinkError::Config(_) => ErrorCode::Internal,
            LinkError::Metrics(_) => ErrorCode::Internal,
            LinkError::Json(_) => ErrorCode::Internal,
            LinkError::PeerNotConnected(_) => ErrorCode::NotSubscribed,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Capacity(_) | LinkError::Transport(_) => true,
            LinkError::Transfer(e) => e.is_retryable(),
            _ => false,
        }
    }
}
