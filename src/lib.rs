//! # Call Transport
//!
//! Real-time two-party audio/video call transport. Each media kind travels on
//! its own WebSocket connection so a failing audio or chat channel never takes
//! the video channel down with it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          UI THREAD                                    │
//! │   TransportSession::{start_host, start_client, stop, mute, chat}      │
//! │            │ commands (mpsc)                 ▲ events (crossbeam)     │
//! └────────────┼─────────────────────────────────┼───────────────────────┘
//!              ▼                                 │
//! ┌──────────────────────────────────────────────┼───────────────────────┐
//! │                 LOOP THREAD (current-thread runtime)                  │
//! │                                                                       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐              │
//! │  │ Video        │   │ Audio        │   │ Chat         │              │
//! │  │ Endpoint     │   │ Endpoint     │   │ Endpoint     │              │
//! │  │ recv: decode │   │ recv: speaker│   │ recv: event  │              │
//! │  │  → FrameRecv │   │  (unless     │   │              │              │
//! │  │ send: camera │   │   muted)     │   │ send: UI     │              │
//! │  │  → JPEG      │   │ send: queue  │   │              │              │
//! │  └──────┬───────┘   └──────┬───────┘   └──────┬───────┘              │
//! │         │                  │ ▲                │                       │
//! │         │                  │ │ OutboundAudioQueue                     │
//! └─────────┼──────────────────┼─┼────────────────┼───────────────────────┘
//!           │                  │ │                │
//!           │                  │ └── CaptureBridge ◄── microphone callback thread
//!           ▼                  ▼                  ▼
//!       ws (video)         ws (audio)         ws (chat)        ───► peer
//! ```

pub mod audio;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod media;
pub mod network;
pub mod session;

pub use error::{Error, Result};
pub use session::{SessionEvent, SessionState, TransportSession};

/// Application-wide constants
pub mod constants {
    /// Default capture sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Frames per microphone chunk
    pub const DEFAULT_CHUNK_FRAMES: u32 = 1024;

    /// Default JPEG quality for outgoing video
    pub const DEFAULT_VIDEO_QUALITY: u8 = 5;

    /// Video/audio send loop poll interval in milliseconds
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

    /// Default capture width
    pub const DEFAULT_FRAME_WIDTH: u32 = 640;

    /// Default capture height
    pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

    /// Address host listeners bind to
    pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

    /// Playback ring buffer capacity (in chunks)
    pub const PLAYBACK_BUFFER_CHUNKS: usize = 32;

    /// Largest payload the length-prefixed fallback framing accepts
    pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
}
