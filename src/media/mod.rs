//! Media types and the capability traits the session consumes
//!
//! Cameras, microphones and speakers are external collaborators. The session
//! only sees them through [`MediaSource`], [`MicrophoneSource`] and
//! [`PlaybackSink`].

pub mod manual;
pub mod pattern;

use bytes::Bytes;

use crate::error::{CodecError, DeviceError};

pub use manual::{
    collecting_sink, manual_microphone, CollectingSink, ManualMicrophone, MicrophoneFeed, SinkTap,
};
pub use pattern::TestPatternSource;

/// Bytes per RGB8 pixel
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// Raw RGB8 video frame
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a packed RGB8 buffer, checking its length against the dimensions
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CodecError> {
        let expected = width as usize * height as usize * RGB_BYTES_PER_PIXEL;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(CodecError::InvalidFrameSize {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Frame of a single solid colour
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let data = rgb.iter().copied().cycle().take(pixels * RGB_BYTES_PER_PIXEL).collect();
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One captured block of interleaved 16-bit little-endian PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Bytes,
}

impl AudioChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn from_samples(samples: &[i16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self { data: data.into() }
    }

    /// Decode the payload back into samples; a trailing odd byte is ignored
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Callback invoked on the microphone's own thread for every captured chunk
pub type ChunkCallback = Box<dyn FnMut(AudioChunk) + Send + 'static>;

/// Camera-like frame source, polled without blocking
pub trait MediaSource: Send {
    /// Next available frame, or `None` if nothing new is ready
    fn get_frame(&mut self) -> Option<Frame>;

    /// Release the underlying device
    fn release(&mut self);
}

/// Push-based microphone
pub trait MicrophoneSource: Send {
    /// Begin capture; `on_chunk` runs on the device's callback thread
    fn start(&mut self, on_chunk: ChunkCallback) -> Result<(), DeviceError>;

    fn stop(&mut self);
}

/// Speaker-like sink for received audio
pub trait PlaybackSink: Send {
    fn write(&mut self, chunk: &AudioChunk) -> Result<(), DeviceError>;

    /// Stop playback and release the device. Default is a no-op.
    fn stop(&mut self) {}
}

/// Hardware a session owns exclusively while it runs
pub struct MediaDevices {
    pub camera: Box<dyn MediaSource>,
    pub microphone: Box<dyn MicrophoneSource>,
    pub speaker: Box<dyn PlaybackSink>,
}

impl MediaDevices {
    pub fn new(
        camera: impl MediaSource + 'static,
        microphone: impl MicrophoneSource + 'static,
        speaker: impl PlaybackSink + 'static,
    ) -> Self {
        Self {
            camera: Box::new(camera),
            microphone: Box::new(microphone),
            speaker: Box::new(speaker),
        }
    }
}

/// Microphone that never produces audio
#[derive(Debug, Default)]
pub struct SilentMicrophone;

impl MicrophoneSource for SilentMicrophone {
    fn start(&mut self, _on_chunk: ChunkCallback) -> Result<(), DeviceError> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Sink that discards everything written to it
#[derive(Debug, Default)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn write(&mut self, _chunk: &AudioChunk) -> Result<(), DeviceError> {
        Ok(())
    }
}
