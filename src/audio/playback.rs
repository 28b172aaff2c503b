//! Speaker output through cpal
//!
//! Received chunks are queued in a [`SampleRing`] that the output callback
//! drains; gaps are played as silence.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::bounded;

use crate::audio::buffer::{SampleRing, SharedSampleRing};
use crate::audio::device::{output_device, require_f32};
use crate::config::AudioConfig;
use crate::error::DeviceError;
use crate::media::{AudioChunk, PlaybackSink};

/// Speaker backed by a cpal output stream, started on construction
pub struct CpalSpeaker {
    ring: SharedSampleRing,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalSpeaker {
    pub fn open(device_name: Option<&str>, audio: &AudioConfig) -> Result<Self, DeviceError> {
        let device = output_device(device_name)?;
        require_f32(&device, false, audio)?;
        tracing::debug!("Using output device {}", device.name);

        let capacity = audio.chunk_frames as usize
            * audio.channels as usize
            * audio.playback_buffer_chunks;
        let ring: SharedSampleRing = Arc::new(SampleRing::new(capacity));
        let running = Arc::new(AtomicBool::new(true));

        let config = StreamConfig {
            channels: audio.channels,
            sample_rate: cpal::SampleRate(audio.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let ring_for_stream = ring.clone();
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("call-playback".into())
            .spawn(move || {
                let stream = device.into_inner().build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        ring_for_stream.fill(data);
                    },
                    |err| tracing::warn!("Playback stream error: {}", err),
                    None,
                );

                let stream = match stream.map_err(|e| e.to_string()).and_then(|s| {
                    s.play().map_err(|e| e.to_string())?;
                    Ok(s)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(DeviceError::StreamError(e)));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
            })
            .map_err(|e| DeviceError::StreamError(e.to_string()))?;

        ready_rx
            .recv()
            .unwrap_or_else(|_| Err(DeviceError::StreamError("playback thread exited".into())))?;

        tracing::info!(
            "Speaker started: {} Hz, {} channel(s), {} sample buffer",
            audio.sample_rate,
            audio.channels,
            ring.capacity()
        );

        Ok(Self {
            ring,
            running,
            thread_handle: Some(handle),
        })
    }

    pub fn ring(&self) -> &SampleRing {
        &self.ring
    }
}

impl PlaybackSink for CpalSpeaker {
    fn write(&mut self, chunk: &AudioChunk) -> Result<(), DeviceError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(DeviceError::StreamError("speaker stopped".into()));
        }
        let dropped = self.ring.push_chunk(chunk);
        if dropped > 0 {
            tracing::trace!("Playback buffer full, dropped {} samples", dropped);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            self.ring.clear();
            tracing::debug!(
                "Speaker stopped ({} overflowed samples, {} underruns)",
                self.ring.overflow_count(),
                self.ring.underrun_count()
            );
        }
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.stop();
    }
}
