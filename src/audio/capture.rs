//! Microphone capture through cpal
//!
//! The input stream lives on its own thread, since cpal streams are not
//! `Send`. Device blocks are regrouped into fixed-size 16-bit chunks and
//! handed to the session's callback from the device callback thread.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::ChunkAssembler;
use crate::audio::device::{input_device, require_f32};
use crate::config::AudioConfig;
use crate::error::DeviceError;
use crate::media::{ChunkCallback, MicrophoneSource};

/// Microphone backed by a cpal input stream
pub struct CpalMicrophone {
    /// `None` selects the host default
    device_name: Option<String>,
    config: StreamConfig,
    samples_per_chunk: usize,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<DeviceError>>,
    chunks_captured: Arc<AtomicU64>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<&str>, audio: &AudioConfig) -> Result<Self, DeviceError> {
        // Fail early if the device is missing
        let device = input_device(device_name)?;
        require_f32(&device, true, audio)?;
        tracing::debug!("Using input device {}", device.name);

        Ok(Self {
            device_name: device_name.map(str::to_string),
            config: StreamConfig {
                channels: audio.channels,
                sample_rate: cpal::SampleRate(audio.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            },
            samples_per_chunk: audio.chunk_frames as usize * audio.channels as usize,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            chunks_captured: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn chunks_captured(&self) -> u64 {
        self.chunks_captured.load(Ordering::Relaxed)
    }

    /// Next asynchronous stream error, if any
    pub fn check_errors(&self) -> Option<DeviceError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl MicrophoneSource for CpalMicrophone {
    fn start(&mut self, mut on_chunk: ChunkCallback) -> Result<(), DeviceError> {
        if self.is_running() {
            return Err(DeviceError::AlreadyStarted);
        }

        let device = input_device(self.device_name.as_deref())?;
        let (error_tx, error_rx) = bounded::<DeviceError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let chunks_captured = self.chunks_captured.clone();
        let config = self.config.clone();
        let mut assembler = ChunkAssembler::new(self.samples_per_chunk);

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("call-capture".into())
            .spawn(move || {
                let stream = device.into_inner().build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        assembler.push_f32(data, |chunk| {
                            chunks_captured.fetch_add(1, Ordering::Relaxed);
                            on_chunk(chunk);
                        });
                    },
                    move |err| {
                        let _ = error_tx.try_send(DeviceError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream dropped here, which stops capture
            })
            .map_err(|e| DeviceError::StreamError(e.to_string()))?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(DeviceError::StreamError("capture thread exited".into())));
        if let Err(e) = started {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        tracing::info!(
            "Microphone started: {} Hz, {} channel(s)",
            self.config.sample_rate.0,
            self.config.channels
        );
        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Microphone stopped after {} chunks", self.chunks_captured());
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
