//! Video frame codecs
//!
//! The session is codec-agnostic: it encodes through [`FrameCodec`] and ships
//! the resulting bytes as one channel message.

pub mod jpeg;

use bytes::Bytes;

use crate::error::CodecError;
use crate::media::Frame;

pub use jpeg::JpegCodec;

/// Still-image codec used for the video channel
pub trait FrameCodec: Send + Sync {
    /// Encode `frame` at `quality` (1-100, higher is better)
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Bytes, CodecError>;

    /// Decode one message back into a frame
    fn decode(&self, data: &[u8]) -> Result<Frame, CodecError>;
}
