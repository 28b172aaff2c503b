//! Application configuration
//!
//! Loaded from a TOML file. The connect timeout has no default and must be
//! present in every configuration; everything else falls back to the
//! constants in [`crate::constants`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Channel transport settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Address the host listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Upper bound on an outbound connect + handshake, in milliseconds
    pub connect_timeout_ms: u64,

    /// Upper bound on waiting for the peer to dial in. Absent means wait
    /// until the session is stopped.
    #[serde(default)]
    pub accept_timeout_ms: Option<u64>,
}

/// Video send settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// JPEG quality (1-100); low on purpose, latency beats fidelity
    pub quality: u8,
    /// Send loop poll cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Capture width requested from the camera
    pub width: u32,
    /// Capture height requested from the camera
    pub height: u32,
}

/// Audio capture/playback settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per captured chunk
    pub chunk_frames: u32,
    /// Playback ring buffer capacity, in chunks
    pub playback_buffer_chunks: usize,
    /// Send loop poll cadence in milliseconds
    pub poll_interval_ms: u64,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_VIDEO_QUALITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            playback_buffer_chunks: PLAYBACK_BUFFER_CHUNKS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl NetworkConfig {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            bind_address: default_bind_address(),
            connect_timeout_ms: connect_timeout.as_millis() as u64,
            accept_timeout_ms: None,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn accept_timeout(&self) -> Option<Duration> {
        self.accept_timeout_ms.map(Duration::from_millis)
    }
}

impl VideoConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AudioConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Size in bytes of one captured chunk of 16-bit samples
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_frames as usize * self.channels as usize * 2
    }
}

impl AppConfig {
    /// Build a config with defaults everywhere except the required connect timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            network: NetworkConfig::new(connect_timeout),
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    /// Load `path` if it exists, otherwise build defaults around `connect_timeout`
    pub fn load_or_default(path: impl AsRef<Path>, connect_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::new(connect_timeout))
        }
    }

    /// Write to a file, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Platform config location, e.g. `~/.config/call-transport/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "call-transport")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.connect_timeout_ms == 0 {
            return Err(Error::Config("network.connect_timeout_ms must be > 0".into()));
        }
        if !(1..=100).contains(&self.video.quality) {
            return Err(Error::Config(format!(
                "video.quality must be 1-100, got {}",
                self.video.quality
            )));
        }
        if self.video.poll_interval_ms == 0 || self.audio.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be > 0".into()));
        }
        if self.audio.channels == 0 || self.audio.chunk_frames == 0 {
            return Err(Error::Config("audio channels and chunk_frames must be > 0".into()));
        }
        if self.audio.playback_buffer_chunks == 0 {
            return Err(Error::Config("audio.playback_buffer_chunks must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [network]
            connect_timeout_ms = 3000
            "#,
        )
        .unwrap();

        assert_eq!(config.network.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.network.accept_timeout(), None);
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.video.quality, DEFAULT_VIDEO_QUALITY);
        assert_eq!(config.video.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.audio.chunk_bytes(), 2048);
    }

    #[test]
    fn test_connect_timeout_is_required() {
        let err = AppConfig::from_toml("[network]\nbind_address = \"127.0.0.1\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("connect_timeout_ms")));
    }

    #[test]
    fn test_rejects_out_of_range_quality() {
        let err = AppConfig::from_toml(
            r#"
            [network]
            connect_timeout_ms = 500

            [video]
            quality = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::new(Duration::from_millis(1500));
        config.network.accept_timeout_ms = Some(60_000);
        config.video.quality = 30;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let config = AppConfig::load_or_default(&path, Duration::from_secs(4)).unwrap();
        assert_eq!(config.network.connect_timeout(), Duration::from_secs(4));
        assert!(config.network.accept_timeout().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_audio_poll_interval_is_independent() {
        let config = AppConfig::from_toml(
            r#"
            [network]
            connect_timeout_ms = 1000

            [video]
            poll_interval_ms = 40

            [audio]
            poll_interval_ms = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.video.poll_interval(), Duration::from_millis(40));
        assert_eq!(config.audio.poll_interval(), Duration::from_millis(5));

        let defaults = AppConfig::new(Duration::from_secs(1));
        assert_eq!(
            defaults.audio.poll_interval(),
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        );
    }
}
