//! Two sessions talking over loopback with synthetic devices

use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use call_transport::codec::JpegCodec;
use call_transport::config::AppConfig;
use call_transport::context::CallContext;
use call_transport::media::{
    collecting_sink, manual_microphone, AudioChunk, MediaDevices, MicrophoneFeed, NullSink,
    SilentMicrophone, SinkTap, TestPatternSource,
};
use call_transport::network::{ChannelKind, EndpointState};
use call_transport::{SessionEvent, SessionState, TransportSession};

fn loopback_config() -> AppConfig {
    let mut config = AppConfig::new(Duration::from_secs(2));
    config.network.bind_address = "127.0.0.1".into();
    config
}

fn next_event(events: &Receiver<SessionEvent>, within: Duration) -> Option<SessionEvent> {
    events.recv_timeout(within).ok()
}

#[test]
fn test_fifty_vga_frames_reach_the_client() {
    let host_devices = MediaDevices::new(
        TestPatternSource::new(640, 480)
            .with_limit(50)
            .with_frame_rate(50),
        SilentMicrophone,
        NullSink,
    );
    let (mut host, host_events) = TransportSession::new(
        CallContext::new("Host"),
        loopback_config(),
        Arc::new(JpegCodec::new()),
        host_devices,
    );

    let client_devices = MediaDevices::new(
        TestPatternSource::new(640, 480).with_limit(0),
        SilentMicrophone,
        NullSink,
    );
    let (mut client, client_events) = TransportSession::new(
        CallContext::new("Client"),
        loopback_config(),
        Arc::new(JpegCodec::new()),
        client_devices,
    );

    let bindings = host.start_host(0, 0, None).unwrap();
    client
        .start_client(
            &format!("ws://{}", bindings.video),
            &format!("ws://{}", bindings.audio),
            None,
        )
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut connected = false;
    let mut frames = 0;
    while frames < 50 && Instant::now() < deadline {
        match next_event(&client_events, Duration::from_millis(500)) {
            Some(SessionEvent::Connected) => connected = true,
            Some(SessionEvent::FrameReceived(frame)) => {
                assert_eq!(frame.width(), 640);
                assert_eq!(frame.height(), 480);
                frames += 1;
            }
            Some(SessionEvent::Error(e)) => panic!("client error: {e}"),
            _ => {}
        }
    }

    assert!(connected);
    assert_eq!(frames, 50);
    assert_eq!(host.state(), SessionState::Connected);
    assert!(host_events
        .try_iter()
        .any(|event| event == SessionEvent::Connected));

    client.stop();
    host.stop();
}

struct Peer {
    session: TransportSession,
    events: Receiver<SessionEvent>,
    feed: MicrophoneFeed,
    tap: SinkTap,
}

fn peer(name: &str) -> Peer {
    let (microphone, feed) = manual_microphone();
    let (speaker, tap) = collecting_sink();
    let devices = MediaDevices::new(
        TestPatternSource::new(32, 32).with_limit(0),
        microphone,
        speaker,
    );
    let (session, events) = TransportSession::new(
        CallContext::new(name),
        loopback_config(),
        Arc::new(JpegCodec::new()),
        devices,
    );
    Peer {
        session,
        events,
        feed,
        tap,
    }
}

#[test]
fn test_client_without_video_still_plays_audio() {
    let mut host = peer("Host");
    let mut client = peer("Client");

    let bindings = host.session.start_host(0, 0, None).unwrap();
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_video = format!("ws://{}", unused.local_addr().unwrap());
    drop(unused);

    client
        .session
        .start_client(&dead_video, &format!("ws://{}", bindings.audio), None)
        .unwrap();

    match next_event(&client.events, Duration::from_secs(5)) {
        Some(SessionEvent::Error(message)) => assert!(message.contains("video")),
        other => panic!("expected a video error, got {other:?}"),
    }
    assert_eq!(client.session.state(), SessionState::Error);

    // The host's audio listener accepted, so audio still reaches the client
    std::thread::sleep(Duration::from_millis(300));
    let chunk = AudioChunk::from_samples(&[1, -1, 2, -2]);
    host.feed.push(chunk.clone());

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.tap.is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(client.tap.chunks(), vec![chunk]);
    assert_eq!(
        host.session.channel_state(ChannelKind::Audio),
        EndpointState::Open
    );

    client.session.stop();
    let remaining: Vec<_> = client.events.try_iter().collect();
    assert!(!remaining.contains(&SessionEvent::Connected));
    assert_eq!(
        remaining
            .iter()
            .filter(|e| **e == SessionEvent::Disconnected)
            .count(),
        1
    );
    assert_eq!(client.session.state(), SessionState::Disconnected);

    // The host never got video, so only its audio channel notices the hang-up
    let deadline = Instant::now() + Duration::from_secs(5);
    while host.session.channel_state(ChannelKind::Audio) != EndpointState::Closed
        && Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(
        host.session.channel_state(ChannelKind::Audio),
        EndpointState::Closed
    );
    assert!(host.session.is_running());

    host.session.stop();
    assert!(host
        .events
        .try_iter()
        .all(|event| event != SessionEvent::Connected));
}
