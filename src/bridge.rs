//! Capture hand-off between the microphone thread and the loop thread
//!
//! [`CaptureBridge`] is the producer half: it is moved into the microphone
//! callback and performs a lock-free enqueue. [`OutboundAudioQueue`] is the
//! consumer half, owned by the session loop. The mic-muted flag is written
//! by the loop thread only and read here, so muted audio never enters the
//! queue at all.

use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::media::AudioChunk;

struct Shared {
    queue: SegQueue<AudioChunk>,
    mic_muted: AtomicBool,
    enqueued: AtomicU64,
    muted_drops: AtomicU64,
}

/// Producer half, safe to call from any thread
#[derive(Clone)]
pub struct CaptureBridge {
    shared: Arc<Shared>,
}

/// Consumer half, owned by the loop thread
pub struct OutboundAudioQueue {
    shared: Arc<Shared>,
    discarded: u64,
}

/// Create a connected bridge/queue pair
pub fn capture_bridge() -> (CaptureBridge, OutboundAudioQueue) {
    let shared = Arc::new(Shared {
        queue: SegQueue::new(),
        mic_muted: AtomicBool::new(false),
        enqueued: AtomicU64::new(0),
        muted_drops: AtomicU64::new(0),
    });
    (
        CaptureBridge {
            shared: shared.clone(),
        },
        OutboundAudioQueue {
            shared,
            discarded: 0,
        },
    )
}

impl CaptureBridge {
    /// Non-blocking enqueue. Returns false if the chunk was filtered by mute.
    pub fn enqueue(&self, chunk: AudioChunk) -> bool {
        if self.shared.mic_muted.load(Ordering::Acquire) {
            self.shared.muted_drops.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.shared.queue.push(chunk);
        self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl OutboundAudioQueue {
    /// Pop the oldest chunk
    pub fn pop(&mut self) -> Option<AudioChunk> {
        self.shared.queue.pop()
    }

    /// Take every chunk currently queued, oldest first. Chunks pushed while
    /// draining are left for the next call.
    pub fn drain_ready(&mut self) -> Vec<AudioChunk> {
        let ready = self.shared.queue.len();
        let mut chunks = Vec::with_capacity(ready);
        for _ in 0..ready {
            match self.shared.queue.pop() {
                Some(chunk) => chunks.push(chunk),
                None => break,
            }
        }
        chunks
    }

    /// Drop everything queued. Returns how many chunks were discarded.
    pub fn discard_all(&mut self) -> usize {
        let mut count = 0;
        while self.shared.queue.pop().is_some() {
            count += 1;
        }
        self.discarded += count as u64;
        count
    }

    pub fn set_mic_muted(&self, muted: bool) {
        self.shared.mic_muted.store(muted, Ordering::Release);
    }

    pub fn is_mic_muted(&self) -> bool {
        self.shared.mic_muted.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            enqueued: self.shared.enqueued.load(Ordering::Relaxed),
            muted_drops: self.shared.muted_drops.load(Ordering::Relaxed),
            discarded: self.discarded,
            queued: self.len(),
        }
    }
}

/// Bridge statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    pub enqueued: u64,
    pub muted_drops: u64,
    pub discarded: u64,
    pub queued: usize,
}
