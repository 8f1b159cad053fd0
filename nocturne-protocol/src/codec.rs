//! Encoder and streaming decoder for protocol frames.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::MessageType;
use crate::payload::{Capabilities, ErrorPayload, FullState, GradientColors, TimeSync};
use bytes::{Bytes, BytesMut};

/// Encodes typed values into wire bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes an arbitrary frame.
    pub fn encode_frame(frame: &Frame) -> Result<Bytes, ProtocolError> {
        frame.encode().map(BytesMut::freeze)
    }

    pub fn encode_full_state(state: &FullState) -> Result<Bytes, ProtocolError> {
        Self::encode_frame(&state.to_frame()?)
    }

    pub fn encode_capabilities(caps: &Capabilities) -> Result<Bytes, ProtocolError> {
        Self::encode_frame(&caps.to_frame())
    }

    pub fn encode_time_sync(sync: &TimeSync) -> Result<Bytes, ProtocolError> {
        Self::encode_frame(&sync.to_frame()?)
    }

    pub fn encode_gradient(gradient: &GradientColors) -> Result<Bytes, ProtocolError> {
        Self::encode_frame(&gradient.to_frame()?)
    }

    pub fn encode_error(error: &ErrorPayload) -> Result<Bytes, ProtocolError> {
        Self::encode_frame(&error.to_frame()?)
    }

    /// Encodes the empty frame that switches a peer to binary framing.
    pub fn encode_protocol_enable() -> Result<Bytes, ProtocolError> {
        Self::encode_frame(&Frame::empty(MessageType::ProtocolEnable))
    }
}

/// Reassembles frames from link-layer writes.
///
/// A single write may carry several frames or a fraction of one.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode_buf(&mut self.buffer)
    }

    /// Decodes every complete frame currently buffered.
    ///
    /// Frames that fail validation are reported in place and do not stop the
    /// remaining frames from being decoded.
    pub fn drain(&mut self) -> Vec<Result<Frame, ProtocolError>> {
        let mut out = Vec::new();
        loop {
            match self.decode_frame() {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
