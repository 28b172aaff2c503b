//! Call session lifecycle
//!
//! [`TransportSession`] is the handle the UI owns. Starting a session spawns
//! one worker thread running a current-thread tokio runtime; every channel
//! loop of the call runs cooperatively on it. The handle talks to the worker
//! through a command channel and hears back through [`SessionEvent`]s.

mod worker;

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::codec::FrameCodec;
use crate::config::AppConfig;
use crate::context::CallContext;
use crate::error::SessionError;
use crate::media::{Frame, MediaDevices};
use crate::network::{ChannelKind, EndpointState, Role};

use worker::{ChannelTarget, Command, WorkerParams};

/// Notifications for the UI
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The video channel opened
    Connected,
    /// The session ended; emitted once per started session
    Disconnected,
    Error(String),
    FrameReceived(Frame),
    ChatMessageReceived(String),
}

/// Coarse session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Listening = 1,
    Connecting = 2,
    Connected = 3,
    Disconnected = 4,
    Error = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Listening,
            2 => SessionState::Connecting,
            3 => SessionState::Connected,
            4 => SessionState::Disconnected,
            5 => SessionState::Error,
            _ => SessionState::Idle,
        }
    }
}

/// State cells published by the loop thread and read by the UI
#[derive(Debug)]
pub(crate) struct SharedState {
    session: AtomicU8,
    /// Indexed by [`channel_slot`]
    channels: [AtomicU8; 3],
}

fn channel_slot(kind: ChannelKind) -> usize {
    match kind {
        ChannelKind::Video => 0,
        ChannelKind::Audio => 1,
        ChannelKind::Chat => 2,
    }
}

impl SharedState {
    fn new(state: SessionState) -> Self {
        Self {
            session: AtomicU8::new(state as u8),
            channels: [
                AtomicU8::new(EndpointState::Idle as u8),
                AtomicU8::new(EndpointState::Idle as u8),
                AtomicU8::new(EndpointState::Idle as u8),
            ],
        }
    }

    pub(crate) fn get(&self) -> SessionState {
        SessionState::from_u8(self.session.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.session.store(state as u8, Ordering::Release);
    }

    pub(crate) fn channel(&self, kind: ChannelKind) -> EndpointState {
        EndpointState::from_u8(self.channels[channel_slot(kind)].load(Ordering::Acquire))
    }

    pub(crate) fn set_channel(&self, kind: ChannelKind, state: EndpointState) {
        self.channels[channel_slot(kind)].store(state as u8, Ordering::Release);
    }

    fn reset_channels(&self) {
        for channel in &self.channels {
            channel.store(EndpointState::Idle as u8, Ordering::Release);
        }
    }
}

/// Addresses the host listeners actually bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostBindings {
    pub video: SocketAddr,
    pub audio: SocketAddr,
    pub chat: Option<SocketAddr>,
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<MediaDevices>,
}

/// Handle to a two-party call
pub struct TransportSession {
    context: CallContext,
    config: AppConfig,
    codec: Arc<dyn FrameCodec>,
    devices: Option<MediaDevices>,
    events: Sender<SessionEvent>,
    state: Arc<SharedState>,
    role: Option<Role>,
    mic_muted: bool,
    speaker_muted: bool,
    worker: Option<Worker>,
}

impl TransportSession {
    /// Create an idle session. Events arrive on the returned receiver.
    pub fn new(
        context: CallContext,
        config: AppConfig,
        codec: Arc<dyn FrameCodec>,
        devices: MediaDevices,
    ) -> (Self, Receiver<SessionEvent>) {
        let (events, receiver) = unbounded();
        let session = Self {
            context,
            config,
            codec,
            devices: Some(devices),
            events,
            state: Arc::new(SharedState::new(SessionState::Idle)),
            role: None,
            mic_muted: false,
            speaker_muted: false,
            worker: None,
        };
        (session, receiver)
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Connection state of one channel of the current or most recent call.
    /// `Idle` for a channel the call does not use.
    pub fn channel_state(&self, kind: ChannelKind) -> EndpointState {
        self.state.channel(kind)
    }

    /// Role of the current or most recent session
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// True while the worker thread is alive
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Listen for the peer on one port per channel kind
    pub fn start_host(
        &mut self,
        video_port: u16,
        audio_port: u16,
        chat_port: Option<u16>,
    ) -> Result<HostBindings, SessionError> {
        self.reap()?;
        let bind_address = self.config.network.bind_address.clone();

        let bind = |kind: ChannelKind, port: u16| {
            std::net::TcpListener::bind((bind_address.as_str(), port))
                .and_then(|listener| listener.set_nonblocking(true).map(|_| listener))
                .map_err(|e| SessionError::BindFailure {
                    kind: kind.to_string(),
                    reason: format!("{bind_address}:{port}: {e}"),
                })
        };

        let bound = (|| {
            let video = bind(ChannelKind::Video, video_port)?;
            let audio = bind(ChannelKind::Audio, audio_port)?;
            let chat = chat_port.map(|port| bind(ChannelKind::Chat, port)).transpose()?;
            Ok::<_, SessionError>((video, audio, chat))
        })();

        let (video, audio, chat) = match bound {
            Ok(listeners) => listeners,
            Err(e) => {
                error!("{}", e);
                self.role = Some(Role::Host);
                self.state.set(SessionState::Error);
                self.emit(SessionEvent::Error(e.to_string()));
                // Nothing was spawned, so this is the whole of stop()
                self.emit(SessionEvent::Disconnected);
                return Err(e);
            }
        };

        let local = |listener: &std::net::TcpListener| {
            listener.local_addr().map_err(|e| SessionError::BindFailure {
                kind: "listener".into(),
                reason: e.to_string(),
            })
        };
        let bindings = HostBindings {
            video: local(&video)?,
            audio: local(&audio)?,
            chat: chat.as_ref().map(local).transpose()?,
        };

        info!(
            "{} hosting call: video {}, audio {}, chat {:?}",
            self.context.display_name(),
            bindings.video,
            bindings.audio,
            bindings.chat
        );

        self.spawn(
            Role::Host,
            SessionState::Listening,
            ChannelTarget::Listen(video),
            ChannelTarget::Listen(audio),
            chat.map(ChannelTarget::Listen),
        )?;
        Ok(bindings)
    }

    /// Dial the host's channels (`ws://host:port` each)
    pub fn start_client(
        &mut self,
        video_addr: &str,
        audio_addr: &str,
        chat_addr: Option<&str>,
    ) -> Result<(), SessionError> {
        self.reap()?;
        info!(
            "{} joining call: video {}, audio {}, chat {:?}",
            self.context.display_name(),
            video_addr,
            audio_addr,
            chat_addr
        );

        self.spawn(
            Role::Client,
            SessionState::Connecting,
            ChannelTarget::Dial(video_addr.to_string()),
            ChannelTarget::Dial(audio_addr.to_string()),
            chat_addr.map(|addr| ChannelTarget::Dial(addr.to_string())),
        )
    }

    fn spawn(
        &mut self,
        role: Role,
        initial: SessionState,
        video: ChannelTarget,
        audio: ChannelTarget,
        chat: Option<ChannelTarget>,
    ) -> Result<(), SessionError> {
        let devices = self
            .devices
            .take()
            .ok_or_else(|| SessionError::Spawn("media devices unavailable".into()))?;
        let (commands, command_rx) = mpsc::unbounded_channel();

        self.role = Some(role);
        self.state.set(initial);
        self.state.reset_channels();

        let params = WorkerParams {
            role,
            video,
            audio,
            chat,
            config: self.config.clone(),
            codec: self.codec.clone(),
            devices,
            events: self.events.clone(),
            state: self.state.clone(),
            commands: command_rx,
            mic_muted: self.mic_muted,
            speaker_muted: self.speaker_muted,
        };

        match worker::spawn(params) {
            Ok(handle) => {
                self.worker = Some(Worker { commands, handle });
                Ok(())
            }
            Err(e) => {
                self.state.set(SessionState::Error);
                self.emit(SessionEvent::Error(format!("failed to start session: {e}")));
                self.emit(SessionEvent::Disconnected);
                Err(SessionError::Spawn(e.to_string()))
            }
        }
    }

    /// End the call. Blocks until the loop thread has closed every channel
    /// and emitted `Disconnected`. No-op if nothing is running.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Fails only if the worker already wound down on its own
        let _ = worker.commands.send(Command::Stop);
        self.join(worker);
    }

    pub fn set_mic_mute(&mut self, muted: bool) {
        self.mic_muted = muted;
        self.command(Command::SetMicMute(muted));
    }

    pub fn set_speaker_mute(&mut self, muted: bool) {
        self.speaker_muted = muted;
        self.command(Command::SetSpeakerMute(muted));
    }

    pub fn is_mic_muted(&self) -> bool {
        self.mic_muted
    }

    pub fn is_speaker_muted(&self) -> bool {
        self.speaker_muted
    }

    /// Send a chat line if the chat channel is open; otherwise it is dropped
    pub fn send_chat(&self, text: impl Into<String>) {
        let text = text.into();
        if self.worker.is_none() {
            debug!("not connected, dropping chat message");
            return;
        }
        self.command(Command::SendChat(text));
    }

    fn command(&self, command: Command) {
        if let Some(worker) = &self.worker {
            if worker.commands.send(command).is_err() {
                debug!("session loop already finished, command ignored");
            }
        }
    }

    /// Collect a worker that ended on its own so a new call can start
    fn reap(&mut self) -> Result<(), SessionError> {
        match &self.worker {
            Some(worker) if !worker.handle.is_finished() => Err(SessionError::AlreadyRunning),
            Some(_) => {
                if let Some(worker) = self.worker.take() {
                    self.join(worker);
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn join(&mut self, worker: Worker) {
        drop(worker.commands);
        match worker.handle.join() {
            Ok(devices) => self.devices = Some(devices),
            Err(_) => {
                error!("session worker panicked");
                self.state.set(SessionState::Error);
                self.emit(SessionEvent::Error("session worker panicked".into()));
                self.emit(SessionEvent::Disconnected);
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.stop();
        if let Some(devices) = self.devices.as_mut() {
            devices.camera.release();
            devices.speaker.stop();
        } else {
            warn!("media devices were not recovered before drop");
        }
    }
}
