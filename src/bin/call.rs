//! Terminal call client
//!
//! Hosts or joins a call with the system microphone and speaker and a
//! synthetic camera. Lines typed on stdin are sent as chat.

use anyhow::{bail, Context, Result};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use call_transport::{
    audio::{list_devices, CpalMicrophone, CpalSpeaker},
    codec::JpegCodec,
    config::AppConfig,
    context::CallContext,
    media::{MediaDevices, TestPatternSource},
    SessionEvent, TransportSession,
};

/// Used when no config file exists yet
const FALLBACK_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const USAGE: &str = "usage:
  call host <video-port> <audio-port> [chat-port]
  call join <video-uri> <audio-uri> [chat-uri]
  call devices

environment:
  CALL_CONFIG   config file (default: platform config dir)
  CALL_NAME     display name shown to the log";

enum Mode {
    Call(Target),
    Devices,
}

enum Target {
    Host {
        video: u16,
        audio: u16,
        chat: Option<u16>,
    },
    Join {
        video: String,
        audio: String,
        chat: Option<String>,
    },
}

fn parse_args(args: &[String]) -> Result<Mode> {
    let port = |s: &String| -> Result<u16> {
        s.parse().with_context(|| format!("invalid port {s:?}"))
    };

    match args {
        [cmd] if cmd == "devices" => Ok(Mode::Devices),
        [cmd, video, audio, rest @ ..] if cmd == "host" && rest.len() <= 1 => {
            Ok(Mode::Call(Target::Host {
                video: port(video)?,
                audio: port(audio)?,
                chat: rest.first().map(port).transpose()?,
            }))
        }
        [cmd, video, audio, rest @ ..] if cmd == "join" && rest.len() <= 1 => {
            Ok(Mode::Call(Target::Join {
                video: video.clone(),
                audio: audio.clone(),
                chat: rest.first().cloned(),
            }))
        }
        _ => bail!("{USAGE}"),
    }
}

fn load_config() -> Result<AppConfig> {
    let path = match std::env::var_os("CALL_CONFIG") {
        Some(path) => std::path::PathBuf::from(path),
        None => match AppConfig::default_path() {
            Some(path) => path,
            None => return Ok(AppConfig::new(FALLBACK_CONNECT_TIMEOUT)),
        },
    };
    AppConfig::load_or_default(&path, FALLBACK_CONNECT_TIMEOUT)
        .with_context(|| format!("loading {}", path.display()))
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let kind = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, kind, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let target = match parse_args(&args)? {
        Mode::Call(target) => target,
        Mode::Devices => {
            print_devices();
            return Ok(());
        }
    };

    let config = load_config()?;
    let name = std::env::var("CALL_NAME").unwrap_or_else(|_| "Anonymous".into());
    let context = CallContext::new(name);
    tracing::info!("Calling as {} ({})", context.display_name(), context.initials());

    let devices = MediaDevices::new(
        TestPatternSource::new(config.video.width, config.video.height).with_frame_rate(15),
        CpalMicrophone::new(None, &config.audio)?,
        CpalSpeaker::open(None, &config.audio)?,
    );

    let (mut session, events) =
        TransportSession::new(context, config, Arc::new(JpegCodec::new()), devices);

    match target {
        Target::Host { video, audio, chat } => {
            let bindings = session.start_host(video, audio, chat)?;
            println!("Waiting for peer on video {}, audio {}", bindings.video, bindings.audio);
            if let Some(chat) = bindings.chat {
                println!("Chat on {chat}");
            }
        }
        Target::Join { video, audio, chat } => {
            session.start_client(&video, &audio, chat.as_deref())?;
        }
    }

    // Events print on their own thread so stdin can block
    let printer = std::thread::spawn(move || {
        let mut frames = 0u64;
        for event in events.iter() {
            match event {
                SessionEvent::Connected => println!("* connected"),
                SessionEvent::Error(message) => println!("* error: {message}"),
                SessionEvent::ChatMessageReceived(text) => println!("peer> {text}"),
                SessionEvent::FrameReceived(frame) => {
                    frames += 1;
                    if frames % 100 == 1 {
                        tracing::info!(
                            "Receiving video {}x{} ({} frames)",
                            frame.width(),
                            frame.height(),
                            frames
                        );
                    }
                }
                SessionEvent::Disconnected => {
                    println!("* disconnected");
                    break;
                }
            }
        }
    });

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if printer.is_finished() {
            break;
        }
        let line = line?;
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/mute" => session.set_mic_mute(true),
            "/unmute" => session.set_mic_mute(false),
            "/deafen" => session.set_speaker_mute(true),
            "/undeafen" => session.set_speaker_mute(false),
            text => session.send_chat(text),
        }
    }

    session.stop();
    drop(session);
    let _ = printer.join();
    Ok(())
}
