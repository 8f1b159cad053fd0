//! Protocol error types and error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or payload handling.
///
/// Every variant means the frame is discarded; none of them are retried.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("header too short: {len} bytes (need 16)")]
    HeaderTooShort { len: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message type: {0:#05x}")]
    UnknownMessageType(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("payload for {message} truncated: need {needed} more bytes")]
    Truncated {
        message: &'static str,
        needed: usize,
    },

    #[error("invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: u64 },

    #[error("string too long: {0} bytes")]
    StringTooLong(usize),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("unexpected payload for message type {0:#05x}")]
    UnexpectedMessage(u16),
}

/// Stable error codes carried in error frames.
///
/// These codes are part of the protocol contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum ErrorCode {
    // Framing errors
    InvalidMessage = 0x0001,
    UnsupportedVersion = 0x0002,
    CrcMismatch = 0x0003,

    // Session errors
    NotSubscribed = 0x0010,

    // Transfer errors
    AssetNotAvailable = 0x0020,
    TransferFailed = 0x0021,
    ChecksumMismatch = 0x0022,

    // System errors
    Internal = 0x00FF,
}

impl ErrorCode {
    /// Returns whether the request that produced this error may be repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::TransferFailed | ErrorCode::ChecksumMismatch | ErrorCode::Internal
        )
    }

    /// Wire value of this code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Parses a wire value; unknown codes collapse to `Internal`.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0001 => ErrorCode::InvalidMessage,
            0x0002 => ErrorCode::UnsupportedVersion,
            0x0003 => ErrorCode::CrcMismatch,
            0x0010 => ErrorCode::NotSubscribed,
            0x0020 => ErrorCode::AssetNotAvailable,
            0x0021 => ErrorCode::TransferFailed,
            0x0022 => ErrorCode::ChecksumMismatch,
            _ => ErrorCode::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidMessage => write!(f, "INVALID_MESSAGE"),
            ErrorCode::UnsupportedVersion => write!(f, "UNSUPPORTED_VERSION"),
            ErrorCode::CrcMismatch => write!(f, "CRC_MISMATCH"),
            ErrorCode::NotSubscribed => write!(f, "NOT_SUBSCRIBED"),
            ErrorCode::AssetNotAvailable => write!(f, "ASSET_NOT_AVAILABLE"),
            ErrorCode::TransferFailed => write!(f, "TRANSFER_FAILED"),
            ErrorCode::ChecksumMismatch => write!(f, "CHECKSUM_MISMATCH"),
            ErrorCode::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl From<&ProtocolError> for ErrorCode {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            ProtocolError::CrcMismatch { .. } => ErrorCode::CrcMismatch,
            _ => ErrorCode::InvalidMessage,
        }
    }
}
