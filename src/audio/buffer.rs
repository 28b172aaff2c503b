//! Sample buffers between cpal callbacks and the call session
//!
//! [`ChunkAssembler`] turns whatever block size the device delivers into
//! fixed-size 16-bit chunks. [`SampleRing`] is the lock-free queue the
//! output callback drains, padding with silence on underrun.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::media::AudioChunk;

/// Convert a normalized float sample to 16-bit PCM
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Convert 16-bit PCM to a normalized float sample
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Regroups device blocks into chunks of exactly `samples_per_chunk` samples
pub struct ChunkAssembler {
    samples_per_chunk: usize,
    pending: Vec<i16>,
}

impl ChunkAssembler {
    pub fn new(samples_per_chunk: usize) -> Self {
        let samples_per_chunk = samples_per_chunk.max(1);
        Self {
            samples_per_chunk,
            pending: Vec::with_capacity(samples_per_chunk),
        }
    }

    /// Feed float samples; `emit` runs once per completed chunk
    pub fn push_f32(&mut self, samples: &[f32], mut emit: impl FnMut(AudioChunk)) {
        for &sample in samples {
            self.pending.push(f32_to_i16(sample));
            if self.pending.len() == self.samples_per_chunk {
                emit(AudioChunk::from_samples(&self.pending));
                self.pending.clear();
            }
        }
    }

    /// Samples waiting for the current chunk to fill
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Bounded queue of samples awaiting playback
pub struct SampleRing {
    queue: ArrayQueue<i16>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Queue a received chunk. Samples that don't fit are dropped and counted.
    pub fn push_chunk(&self, chunk: &AudioChunk) -> usize {
        let mut dropped = 0;
        for sample in chunk.samples() {
            if self.queue.push(sample).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.overflow_count.fetch_add(dropped, Ordering::Relaxed);
        }
        dropped
    }

    /// Fill an output block, writing silence where the queue runs dry
    pub fn fill(&self, out: &mut [f32]) {
        let mut starved = false;
        for slot in out.iter_mut() {
            *slot = match self.queue.pop() {
                Some(sample) => i16_to_f32(sample),
                None => {
                    starved = true;
                    0.0
                }
            };
        }
        if starved {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Samples dropped because the ring was full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Output blocks that had to be padded with silence
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

pub type SharedSampleRing = Arc<SampleRing>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(4.0), i16::MAX);
        assert_eq!(f32_to_i16(-4.0), -i16::MAX);
        assert!((i16_to_f32(i16::MAX) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_assembler_emits_fixed_chunks() {
        let mut assembler = ChunkAssembler::new(4);
        let mut chunks = Vec::new();

        assembler.push_f32(&[0.0; 3], |c| chunks.push(c));
        assert!(chunks.is_empty());
        assert_eq!(assembler.pending(), 3);

        assembler.push_f32(&[0.5; 6], |c| chunks.push(c));
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 8));
        assert_eq!(assembler.pending(), 1);
        assert_eq!(chunks[0].samples()[..3], [0, 0, 0]);
    }

    #[test]
    fn test_ring_overflow_and_underrun() {
        let ring = SampleRing::new(4);
        let dropped = ring.push_chunk(&AudioChunk::from_samples(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(dropped, 2);
        assert_eq!(ring.overflow_count(), 2);
        assert_eq!(ring.len(), 4);

        let mut out = [1.0f32; 6];
        ring.fill(&mut out);
        assert!(out[..4].iter().all(|s| *s > 0.0));
        assert_eq!(&out[4..], &[0.0, 0.0]);
        assert_eq!(ring.underrun_count(), 1);
        assert!(ring.is_empty());
    }
}
