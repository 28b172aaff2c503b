//! Channel transport: one WebSocket connection per media kind

pub mod endpoint;
pub mod framing;

pub use endpoint::{ChannelEndpoint, ChannelReader, EndpointState, EndpointStats, Inbound};
pub use framing::{FrameDecoder, FrameTag};

use std::fmt;

/// Media kind carried by a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Video,
    Audio,
    Chat,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Video => "video",
            ChannelKind::Audio => "audio",
            ChannelKind::Chat => "chat",
        }
    }

    /// Only the video channel decides whether the call is alive
    pub fn is_primary(self) -> bool {
        self == ChannelKind::Video
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the call this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listens and accepts one inbound connection per channel
    Host,
    /// Dials out to the host's channels
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Client => f.write_str("client"),
        }
    }
}
