//! In-process audio endpoints
//!
//! [`ManualMicrophone`] is fed programmatically from any thread through its
//! [`MicrophoneFeed`], the way a hardware callback thread would feed it.
//! [`CollectingSink`] keeps everything written to it. Useful for piping
//! pre-recorded audio and for exercising a session without hardware.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{AudioChunk, ChunkCallback, MicrophoneSource, PlaybackSink};
use crate::error::DeviceError;

type CallbackSlot = Arc<Mutex<Option<ChunkCallback>>>;

/// Microphone whose "capture thread" is whoever holds the feed
pub struct ManualMicrophone {
    slot: CallbackSlot,
}

/// Producer side of a [`ManualMicrophone`]
#[derive(Clone)]
pub struct MicrophoneFeed {
    slot: CallbackSlot,
}

/// Create a microphone and the feed that drives it
pub fn manual_microphone() -> (ManualMicrophone, MicrophoneFeed) {
    let slot: CallbackSlot = Arc::new(Mutex::new(None));
    (
        ManualMicrophone { slot: slot.clone() },
        MicrophoneFeed { slot },
    )
}

impl MicrophoneSource for ManualMicrophone {
    fn start(&mut self, on_chunk: ChunkCallback) -> Result<(), DeviceError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(DeviceError::AlreadyStarted);
        }
        *slot = Some(on_chunk);
        Ok(())
    }

    fn stop(&mut self) {
        self.slot.lock().take();
    }
}

impl MicrophoneFeed {
    /// Deliver one chunk as if captured. Returns false while not capturing.
    pub fn push(&self, chunk: AudioChunk) -> bool {
        match self.slot.lock().as_mut() {
            Some(callback) => {
                callback(chunk);
                true
            }
            None => false,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Sink that records every chunk
pub struct CollectingSink {
    chunks: Arc<Mutex<Vec<AudioChunk>>>,
}

/// Read side of a [`CollectingSink`]
#[derive(Clone)]
pub struct SinkTap {
    chunks: Arc<Mutex<Vec<AudioChunk>>>,
}

pub fn collecting_sink() -> (CollectingSink, SinkTap) {
    let chunks = Arc::new(Mutex::new(Vec::new()));
    (
        CollectingSink {
            chunks: chunks.clone(),
        },
        SinkTap { chunks },
    )
}

impl PlaybackSink for CollectingSink {
    fn write(&mut self, chunk: &AudioChunk) -> Result<(), DeviceError> {
        self.chunks.lock().push(chunk.clone());
        Ok(())
    }
}

impl SinkTap {
    pub fn chunks(&self) -> Vec<AudioChunk> {
        self.chunks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_only_delivers_while_started() {
        let (mut mic, feed) = manual_microphone();
        assert!(!feed.push(AudioChunk::from_samples(&[1])));

        let (mut sink, tap) = collecting_sink();
        mic.start(Box::new(move |chunk| {
            let _ = sink.write(&chunk);
        }))
        .unwrap();
        assert!(feed.is_capturing());
        assert!(matches!(
            mic.start(Box::new(|_| {})),
            Err(DeviceError::AlreadyStarted)
        ));

        assert!(feed.push(AudioChunk::from_samples(&[2])));
        mic.stop();
        assert!(!feed.push(AudioChunk::from_samples(&[3])));

        assert_eq!(tap.len(), 1);
        assert_eq!(tap.chunks()[0].samples(), vec![2]);
    }
}
