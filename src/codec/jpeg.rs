//! JPEG codec backed by the `image` crate
//!
//! Low quality settings keep frames small enough to ship every poll tick.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use std::sync::atomic::{AtomicU64, Ordering};

use super::FrameCodec;
use crate::error::CodecError;
use crate::media::Frame;

/// Baseline JPEG encoder/decoder for RGB8 frames
#[derive(Default)]
pub struct JpegCodec {
    frames_encoded: AtomicU64,
    bytes_produced: AtomicU64,
    frames_decoded: AtomicU64,
    decode_failures: AtomicU64,
}

impl JpegCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get statistics
    pub fn stats(&self) -> CodecStats {
        let frames_encoded = self.frames_encoded.load(Ordering::Relaxed);
        let bytes_produced = self.bytes_produced.load(Ordering::Relaxed);
        CodecStats {
            frames_encoded,
            bytes_produced,
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            average_frame_size: if frames_encoded > 0 {
                bytes_produced as f32 / frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

impl FrameCodec for JpegCodec {
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Bytes, CodecError> {
        if !(1..=100).contains(&quality) {
            return Err(CodecError::InvalidQuality(quality));
        }

        let mut out = Vec::with_capacity(frame.data().len() / 8);
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
            encoder
                .encode(frame.data(), frame.width(), frame.height(), ExtendedColorType::Rgb8)
                .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;
        }

        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_produced.fetch_add(out.len() as u64, Ordering::Relaxed);
        Ok(Bytes::from(out))
    }

    fn decode(&self, data: &[u8]) -> Result<Frame, CodecError> {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg).map_err(|e| {
            self.decode_failures.fetch_add(1, Ordering::Relaxed);
            CodecError::DecodingFailed(e.to_string())
        })?;

        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        Frame::new(width, height, rgb.into_raw())
    }
}

/// Codec statistics
#[derive(Debug, Clone)]
pub struct CodecStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaSource, TestPatternSource};
    use proptest::prelude::*;

    #[test]
    fn test_encode_decode_keeps_dimensions() {
        let codec = JpegCodec::new();
        let frame = TestPatternSource::new(640, 480).get_frame().unwrap();

        let encoded = codec.encode(&frame, 5).unwrap();
        assert!(encoded.len() < frame.data().len() / 10);

        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));

        let stats = codec.stats();
        assert_eq!(stats.frames_encoded, 1);
        assert_eq!(stats.frames_decoded, 1);
    }

    #[test]
    fn test_rejects_invalid_quality() {
        let codec = JpegCodec::new();
        let frame = Frame::solid(8, 8, [0, 0, 0]);
        assert!(matches!(codec.encode(&frame, 0), Err(CodecError::InvalidQuality(0))));
        assert!(matches!(codec.encode(&frame, 101), Err(CodecError::InvalidQuality(101))));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let codec = JpegCodec::new();
        assert!(codec.decode(b"definitely not a jpeg").is_err());
        assert!(codec.decode(&[]).is_err());
        assert_eq!(codec.stats().decode_failures, 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_dimensions_survive_any_quality(
            width in 1u32..96,
            height in 1u32..96,
            quality in 1u8..=100,
            colour in any::<[u8; 3]>(),
        ) {
            let codec = JpegCodec::new();
            let frame = Frame::solid(width, height, colour);
            let decoded = codec.decode(&codec.encode(&frame, quality).unwrap()).unwrap();
            prop_assert_eq!(decoded.width(), width);
            prop_assert_eq!(decoded.height(), height);
        }
    }
}
