//! # nocturne-protocol
//!
//! Wire protocol for the nocturne radio link.
//!
//! This crate provides:
//! - A fixed 16-byte frame header with a 4-bit version and 12-bit message type
//! - CRC-32 validation of every payload
//! - Typed binary payloads for commands, state, capabilities, transfers and errors
//! - A streaming decoder tolerant of partial reads

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod payload;

#[cfg(test)]
mod proptest;

pub use codec::{Decoder, Encoder};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Decoded, Frame, FrameFlags, FrameHeader, FRAME_HEADER_SIZE};
pub use message::{MessageType, Namespace};
pub use payload::{
    AssetQuery, Capabilities, Command, ErrorPayload, Features, FullState, GradientColors,
    PlayState, PositionUpdate, TimeSync, TransferEnd, TransferResult, TransferStart,
    VolumeUpdate,
};

/// Protocol version supported by this implementation.
///
/// Version 1 was the fixed 2-byte-type framing and is not accepted.
pub const PROTOCOL_VERSION: u8 = 2;

/// Maximum frame payload size (1 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;
