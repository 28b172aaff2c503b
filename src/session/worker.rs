//! Loop thread of a session
//!
//! Everything here runs on a single thread inside a current-thread runtime,
//! so session state is plain `Cell`/`RefCell`. The only values touched from
//! another thread are the capture queue (through the bridge) and the
//! published [`SharedState`].

use crossbeam_channel::Sender;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::{SessionEvent, SessionState, SharedState};
use crate::bridge::{capture_bridge, CaptureBridge, OutboundAudioQueue};
use crate::codec::FrameCodec;
use crate::config::AppConfig;
use crate::error::NetworkError;
use crate::media::{AudioChunk, MediaDevices};
use crate::network::{ChannelEndpoint, ChannelKind, EndpointState, Inbound, Role};

/// UI → loop thread requests
#[derive(Debug)]
pub(crate) enum Command {
    SetMicMute(bool),
    SetSpeakerMute(bool),
    SendChat(String),
    Stop,
}

/// How a channel gets its connection
pub(crate) enum ChannelTarget {
    /// Bound listener awaiting one peer
    Listen(std::net::TcpListener),
    /// `ws://` URI to dial
    Dial(String),
}

pub(crate) struct WorkerParams {
    pub role: Role,
    pub video: ChannelTarget,
    pub audio: ChannelTarget,
    pub chat: Option<ChannelTarget>,
    pub config: AppConfig,
    pub codec: Arc<dyn FrameCodec>,
    pub devices: MediaDevices,
    pub events: Sender<SessionEvent>,
    pub state: Arc<SharedState>,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub mic_muted: bool,
    pub speaker_muted: bool,
}

/// Spawn the loop thread. It hands the devices back when the call ends.
pub(crate) fn spawn(params: WorkerParams) -> std::io::Result<JoinHandle<MediaDevices>> {
    thread::Builder::new()
        .name(format!("call-session-{}", params.role))
        .spawn(move || run(params))
}

fn run(params: WorkerParams) -> MediaDevices {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build session runtime: {}", e);
            params.state.set(SessionState::Error);
            let _ = params.events.send(SessionEvent::Error(format!("runtime error: {e}")));
            let _ = params.events.send(SessionEvent::Disconnected);
            return params.devices;
        }
    };

    runtime.block_on(drive(params))
}

async fn drive(params: WorkerParams) -> MediaDevices {
    let WorkerParams {
        role,
        video,
        audio,
        chat,
        config,
        codec,
        devices,
        events,
        state,
        commands,
        mic_muted,
        speaker_muted,
    } = params;

    let (bridge, queue) = capture_bridge();
    queue.set_mic_muted(mic_muted);
    let (running, _) = watch::channel(true);

    let core = SessionCore {
        video: ChannelEndpoint::new(ChannelKind::Video, role),
        audio: ChannelEndpoint::new(ChannelKind::Audio, role),
        chat: chat.as_ref().map(|_| ChannelEndpoint::new(ChannelKind::Chat, role)),
        running,
        speaker_muted: Cell::new(speaker_muted),
        mic_started: Cell::new(false),
        queue: RefCell::new(queue),
        bridge,
        devices: RefCell::new(devices),
        config,
        codec,
        events,
        state,
        stats: Cell::new(LoopStats::default()),
    };

    tokio::join!(
        core.control_loop(commands),
        core.channel_loop(&core.video, video),
        core.channel_loop(&core.audio, audio),
        async {
            if let (Some(endpoint), Some(target)) = (core.chat.as_ref(), chat) {
                core.channel_loop(endpoint, target).await;
            }
        },
        core.video_send_loop(),
        core.audio_send_loop(),
    );

    core.teardown().await;
    core.devices.into_inner()
}

#[derive(Debug, Clone, Copy, Default)]
struct LoopStats {
    frames_sent: u64,
    frames_received: u64,
    decode_failures: u64,
    chunks_sent: u64,
    chunks_played: u64,
    chunks_discarded: u64,
}

struct SessionCore {
    video: ChannelEndpoint,
    audio: ChannelEndpoint,
    chat: Option<ChannelEndpoint>,
    /// Cleared exactly once; every loop watches it
    running: watch::Sender<bool>,
    speaker_muted: Cell<bool>,
    mic_started: Cell<bool>,
    queue: RefCell<OutboundAudioQueue>,
    bridge: CaptureBridge,
    devices: RefCell<MediaDevices>,
    config: AppConfig,
    codec: Arc<dyn FrameCodec>,
    events: Sender<SessionEvent>,
    state: Arc<SharedState>,
    stats: Cell<LoopStats>,
}

impl SessionCore {
    fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Flip the running flag. Only the first caller has any effect.
    fn shutdown(&self, reason: &str) {
        if self.running.send_replace(false) {
            info!("Session stopping: {}", reason);
        }
    }

    /// Resolves once the running flag is cleared
    async fn stopped(&self) {
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Run `future` unless the session stops first
    async fn until_stopped<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            output = future => Some(output),
            _ = self.stopped() => None,
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn update_stats(&self, f: impl FnOnce(&mut LoopStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    async fn control_loop(&self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let Some(command) = self.until_stopped(commands.recv()).await else {
                break;
            };

            match command {
                Some(Command::SetMicMute(muted)) => {
                    debug!("Microphone {}", if muted { "muted" } else { "unmuted" });
                    self.queue.borrow().set_mic_muted(muted);
                }
                Some(Command::SetSpeakerMute(muted)) => {
                    debug!("Speaker {}", if muted { "muted" } else { "unmuted" });
                    self.speaker_muted.set(muted);
                }
                Some(Command::SendChat(text)) => self.send_chat(text).await,
                Some(Command::Stop) => {
                    self.shutdown("stop requested");
                    break;
                }
                None => {
                    self.shutdown("session handle dropped");
                    break;
                }
            }
        }
    }

    async fn send_chat(&self, text: String) {
        match self.chat.as_ref().filter(|chat| chat.is_open()) {
            Some(chat) => {
                if let Some(Err(e)) = self.until_stopped(chat.send_text(&text)).await {
                    debug!("Dropping chat message: {}", e);
                }
            }
            None => debug!("Chat channel not open, dropping message"),
        }
    }

    /// Open one channel, then pump its inbound messages until it closes or
    /// the session stops.
    async fn channel_loop(&self, endpoint: &ChannelEndpoint, target: ChannelTarget) {
        let pending = match target {
            ChannelTarget::Listen(_) => EndpointState::Listening,
            ChannelTarget::Dial(_) => EndpointState::Connecting,
        };
        self.state.set_channel(endpoint.kind(), pending);

        let opened = self.until_stopped(self.open(endpoint, target)).await;
        self.publish(endpoint);
        match opened {
            None => return,
            Some(Ok(())) => self.on_open(endpoint),
            Some(Err(e)) => {
                self.on_open_failed(endpoint.kind(), e);
                return;
            }
        }

        let Some(mut reader) = endpoint.take_reader() else {
            return;
        };

        loop {
            let Some(message) = self.until_stopped(reader.next_message()).await else {
                break;
            };

            match message {
                Ok(inbound) => self.dispatch(endpoint.kind(), inbound),
                Err(e) => {
                    endpoint.mark_closed();
                    self.publish(endpoint);
                    self.on_channel_lost(endpoint.kind(), e);
                    break;
                }
            }
        }
    }

    fn publish(&self, endpoint: &ChannelEndpoint) {
        self.state.set_channel(endpoint.kind(), endpoint.state());
    }

    async fn open(&self, endpoint: &ChannelEndpoint, target: ChannelTarget) -> Result<(), NetworkError> {
        let network = &self.config.network;
        match target {
            ChannelTarget::Listen(listener) => {
                let listener = TcpListener::from_std(listener)
                    .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
                endpoint
                    .accept(listener, network.accept_timeout(), network.connect_timeout())
                    .await?;
            }
            ChannelTarget::Dial(uri) => {
                endpoint.connect(&uri, network.connect_timeout()).await?;
            }
        }
        Ok(())
    }

    fn on_open(&self, endpoint: &ChannelEndpoint) {
        match endpoint.kind() {
            ChannelKind::Video => {
                self.state.set(SessionState::Connected);
                self.emit(SessionEvent::Connected);
            }
            ChannelKind::Audio => {
                // Nothing captured before the channel existed goes out on it
                let stale = self.queue.borrow_mut().discard_all();
                if stale > 0 {
                    debug!("Discarded {} stale audio chunks on open", stale);
                    self.update_stats(|s| s.chunks_discarded += stale as u64);
                }
            }
            ChannelKind::Chat => {}
        }
    }

    fn on_open_failed(&self, kind: ChannelKind, err: NetworkError) {
        if kind.is_primary() {
            error!("Video channel failed to open: {}", err);
            self.state.set(SessionState::Error);
            self.emit(SessionEvent::Error(format!("video channel failed: {err}")));
        } else {
            warn!("{} channel unavailable, continuing without it: {}", kind, err);
        }
    }

    fn on_channel_lost(&self, kind: ChannelKind, err: NetworkError) {
        if kind.is_primary() {
            info!("Video channel lost ({}), ending session", err);
            self.shutdown("video channel closed");
        } else {
            warn!("{} channel lost ({}), continuing", kind, err);
        }
    }

    fn dispatch(&self, kind: ChannelKind, inbound: Inbound) {
        match (kind, inbound) {
            (ChannelKind::Video, Inbound::Binary(data)) => match self.codec.decode(&data) {
                Ok(frame) => {
                    self.update_stats(|s| s.frames_received += 1);
                    self.emit(SessionEvent::FrameReceived(frame));
                }
                Err(e) => {
                    self.update_stats(|s| s.decode_failures += 1);
                    debug!("Dropping undecodable video message: {}", e);
                }
            },
            (ChannelKind::Audio, Inbound::Binary(data)) => {
                if self.speaker_muted.get() {
                    return;
                }
                let chunk = AudioChunk::new(data);
                match self.devices.borrow_mut().speaker.write(&chunk) {
                    Ok(()) => self.update_stats(|s| s.chunks_played += 1),
                    Err(e) => warn!("Audio playback failed: {}", e),
                }
            }
            (ChannelKind::Chat, Inbound::Text(text)) => {
                self.emit(SessionEvent::ChatMessageReceived(text));
            }
            (ChannelKind::Chat, Inbound::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => self.emit(SessionEvent::ChatMessageReceived(text)),
                Err(_) => debug!("Dropping non-UTF-8 chat message"),
            },
            (kind, Inbound::Text(_)) => trace!("Ignoring text message on {} channel", kind),
        }
    }

    async fn video_send_loop(&self) {
        let interval = self.config.video.poll_interval();
        let quality = self.config.video.quality;

        while self.is_running() {
            if self.until_stopped(tokio::time::sleep(interval)).await.is_none() {
                break;
            }
            if !self.video.is_open() {
                continue;
            }

            let Some(frame) = self.devices.borrow_mut().camera.get_frame() else {
                continue;
            };
            let payload = match self.codec.encode(&frame, quality) {
                Ok(payload) => payload,
                Err(e) => {
                    debug!("Skipping frame, encode failed: {}", e);
                    continue;
                }
            };

            match self.until_stopped(self.video.send_binary(payload)).await {
                Some(Ok(())) => self.update_stats(|s| s.frames_sent += 1),
                Some(Err(e)) => trace!("Dropping video frame: {}", e),
                None => break,
            }
        }
    }

    async fn audio_send_loop(&self) {
        self.start_microphone();
        let interval = self.config.audio.poll_interval();

        while self.is_running() {
            if self.until_stopped(tokio::time::sleep(interval)).await.is_none() {
                break;
            }

            if !self.audio.is_open() {
                let dropped = self.queue.borrow_mut().discard_all();
                if dropped > 0 {
                    trace!("Audio channel closed, discarded {} chunks", dropped);
                    self.update_stats(|s| s.chunks_discarded += dropped as u64);
                }
                continue;
            }

            let chunks = self.queue.borrow_mut().drain_ready();
            for chunk in chunks {
                match self.until_stopped(self.audio.send_binary(chunk.into_bytes())).await {
                    Some(Ok(())) => self.update_stats(|s| s.chunks_sent += 1),
                    Some(Err(e)) => trace!("Dropping audio chunk: {}", e),
                    None => return,
                }
            }
        }
    }

    fn start_microphone(&self) {
        let bridge = self.bridge.clone();
        let result = self
            .devices
            .borrow_mut()
            .microphone
            .start(Box::new(move |chunk| {
                bridge.enqueue(chunk);
            }));

        match result {
            Ok(()) => {
                self.mic_started.set(true);
                debug!("Microphone capture started");
            }
            Err(e) => warn!("Microphone unavailable, sending no audio: {}", e),
        }
    }

    async fn teardown(&self) {
        self.shutdown("teardown");

        self.video.close().await;
        self.audio.close().await;
        self.publish(&self.video);
        self.publish(&self.audio);
        if let Some(chat) = &self.chat {
            chat.close().await;
            self.publish(chat);
        }

        if self.mic_started.replace(false) {
            self.devices.borrow_mut().microphone.stop();
        }
        let leftover = self.queue.borrow_mut().discard_all();

        let stats = self.stats.get();
        info!(
            "Session ended: {} frames sent, {} received ({} undecodable), {} audio chunks sent, {} played, {} discarded",
            stats.frames_sent,
            stats.frames_received,
            stats.decode_failures,
            stats.chunks_sent,
            stats.chunks_played,
            stats.chunks_discarded + leftover as u64,
        );

        self.state.set(SessionState::Disconnected);
        self.emit(SessionEvent::Disconnected);
    }
}
