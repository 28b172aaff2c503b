//! Kind-parameterized channel endpoint
//!
//! An endpoint owns at most one WebSocket connection for a single media
//! kind. It lives on the loop thread only, hence the `Cell`/`RefCell`
//! interior. Send loops, the receive loop and teardown borrow it side by
//! side without locking.
//!
//! ```text
//! Idle ──► Listening ──┐
//!     └──► Connecting ─┴──► Open ──► Closed
//! ```
//!
//! `Closed` is terminal. A new call attempt builds a new endpoint.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

use super::{ChannelKind, Role};
use crate::error::NetworkError;

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;

/// Bound on the best-effort close handshake
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection state of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EndpointState {
    Idle = 0,
    Listening = 1,
    Connecting = 2,
    Open = 3,
    Closed = 4,
}

impl EndpointState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => EndpointState::Listening,
            2 => EndpointState::Connecting,
            3 => EndpointState::Open,
            4 => EndpointState::Closed,
            _ => EndpointState::Idle,
        }
    }
}

/// Payload received on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Binary(Bytes),
    Text(String),
}

/// Per-endpoint counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    /// Inbound connections dropped because their handshake failed
    pub handshakes_rejected: u64,
}

/// One channel of the call
pub struct ChannelEndpoint {
    kind: ChannelKind,
    role: Role,
    state: Cell<EndpointState>,
    peer: Cell<Option<SocketAddr>>,
    writer: RefCell<Option<WsSink>>,
    reader: RefCell<Option<SplitStream<WsStream>>>,
    stats: Cell<EndpointStats>,
}

/// Receive half, owned by the receive loop once the endpoint is open
pub struct ChannelReader {
    kind: ChannelKind,
    stream: SplitStream<WsStream>,
    received: u64,
}

impl ChannelEndpoint {
    pub fn new(kind: ChannelKind, role: Role) -> Self {
        Self {
            kind,
            role,
            state: Cell::new(EndpointState::Idle),
            peer: Cell::new(None),
            writer: RefCell::new(None),
            reader: RefCell::new(None),
            stats: Cell::new(EndpointStats::default()),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> EndpointState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state.get() == EndpointState::Open
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.get()
    }

    pub fn stats(&self) -> EndpointStats {
        self.stats.get()
    }

    /// Wait for one peer on `listener` to complete the WebSocket handshake.
    /// Connections whose handshake fails or exceeds `handshake_timeout` are
    /// dropped and listening continues. The listener is dropped once a peer
    /// is established.
    pub async fn accept(
        &self,
        listener: TcpListener,
        timeout: Option<Duration>,
        handshake_timeout: Duration,
    ) -> Result<SocketAddr, NetworkError> {
        self.begin(EndpointState::Listening)?;
        if let Ok(local) = listener.local_addr() {
            info!("{} channel listening on {}", self.kind, local);
        }

        let establish = async {
            loop {
                let (stream, peer) = listener
                    .accept()
                    .await
                    .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
                let _ = stream.set_nodelay(true);

                let reason = match tokio::time::timeout(
                    handshake_timeout,
                    tokio_tungstenite::accept_async(stream),
                )
                .await
                {
                    Ok(Ok(ws)) => return Ok::<_, NetworkError>((ws, peer)),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("handshake timed out after {handshake_timeout:?}"),
                };

                warn!("{} channel dropped connection from {}: {}", self.kind, peer, reason);
                let mut stats = self.stats.get();
                stats.handshakes_rejected += 1;
                self.stats.set(stats);
            }
        };

        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, establish)
                .await
                .unwrap_or(Err(NetworkError::Timeout(limit))),
            None => establish.await,
        };

        match result {
            Ok((ws, peer)) => {
                self.install(ws, peer);
                Ok(peer)
            }
            Err(e) => {
                self.state.set(EndpointState::Closed);
                Err(e)
            }
        }
    }

    /// Dial `uri` (`ws://host:port[/path]`) and complete the handshake
    /// within `timeout`.
    pub async fn connect(&self, uri: &str, timeout: Duration) -> Result<SocketAddr, NetworkError> {
        self.begin(EndpointState::Connecting)?;
        info!("{} channel connecting to {}", self.kind, uri);

        let handshake = async {
            let target = socket_target(uri)?;
            let stream = TcpStream::connect(&target)
                .await
                .map_err(|e| NetworkError::ConnectionFailed(format!("{target}: {e}")))?;
            let _ = stream.set_nodelay(true);
            let peer = stream
                .peer_addr()
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
            let (ws, _response) = tokio_tungstenite::client_async(uri, stream).await?;
            Ok::<_, NetworkError>((ws, peer))
        };

        let result = tokio::time::timeout(timeout, handshake)
            .await
            .unwrap_or(Err(NetworkError::Timeout(timeout)));

        match result {
            Ok((ws, peer)) => {
                self.install(ws, peer);
                Ok(peer)
            }
            Err(e) => {
                self.state.set(EndpointState::Closed);
                Err(e)
            }
        }
    }

    fn begin(&self, next: EndpointState) -> Result<(), NetworkError> {
        if self.state.get() != EndpointState::Idle {
            return Err(NetworkError::ConnectionFailed(format!(
                "{} endpoint already used ({:?})",
                self.kind,
                self.state.get()
            )));
        }
        self.state.set(next);
        Ok(())
    }

    fn install(&self, ws: WsStream, peer: SocketAddr) {
        let (writer, reader) = ws.split();
        *self.writer.borrow_mut() = Some(writer);
        *self.reader.borrow_mut() = Some(reader);
        self.peer.set(Some(peer));
        self.state.set(EndpointState::Open);
        info!("{} channel open ({}, peer {})", self.kind, self.role, peer);
    }

    /// Hand the receive half to the receive loop. Returns `None` if the
    /// endpoint never opened or the reader was already taken.
    pub fn take_reader(&self) -> Option<ChannelReader> {
        self.reader.borrow_mut().take().map(|stream| ChannelReader {
            kind: self.kind,
            stream,
            received: 0,
        })
    }

    /// Send one binary message
    pub async fn send_binary(&self, payload: Bytes) -> Result<(), NetworkError> {
        self.send(Message::Binary(payload.to_vec())).await
    }

    /// Send one text message
    pub async fn send_text(&self, text: &str) -> Result<(), NetworkError> {
        self.send(Message::Text(text.to_owned())).await
    }

    async fn send(&self, message: Message) -> Result<(), NetworkError> {
        if !self.is_open() {
            return Err(NetworkError::NotOpen);
        }
        // Another send is in flight; the loop thread never overlaps them but
        // treat it like any transient failure.
        let Some(mut lease) = WriterLease::take(&self.writer) else {
            return Err(NetworkError::NotOpen);
        };
        let Some(writer) = lease.writer.as_mut() else {
            return Err(NetworkError::NotOpen);
        };

        let len = message.len() as u64;
        let result = writer.send(message).await;
        drop(lease);

        let mut stats = self.stats.get();
        match result {
            Ok(()) => {
                stats.messages_sent += 1;
                stats.bytes_sent += len;
                self.stats.set(stats);
                Ok(())
            }
            Err(e) => {
                stats.send_failures += 1;
                self.stats.set(stats);
                Err(NetworkError::SendFailed(e.to_string()))
            }
        }
    }

    /// Mark the connection gone without touching the socket; used when the
    /// receive side observed the close.
    pub fn mark_closed(&self) {
        if self.state.get() != EndpointState::Closed {
            debug!("{} channel closed", self.kind);
        }
        self.state.set(EndpointState::Closed);
        self.writer.borrow_mut().take();
        self.reader.borrow_mut().take();
    }

    /// Best-effort close. Errors are swallowed.
    pub async fn close(&self) {
        let was_open = self.is_open();
        self.state.set(EndpointState::Closed);
        self.reader.borrow_mut().take();

        let writer = self.writer.borrow_mut().take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
                Ok(Ok(())) => trace!("{} channel close handshake sent", self.kind),
                Ok(Err(e)) => trace!("{} channel close error ignored: {}", self.kind, e),
                Err(_) => trace!("{} channel close timed out", self.kind),
            }
        }
        if was_open {
            info!("{} channel closed", self.kind);
        }
    }
}

/// Writer borrowed out of its slot for one send. Dropping the lease, even
/// when the send future is cancelled mid-flight, puts the writer back so a
/// later `close` can still send the close frame.
struct WriterLease<'a> {
    slot: &'a RefCell<Option<WsSink>>,
    writer: Option<WsSink>,
}

impl<'a> WriterLease<'a> {
    fn take(slot: &'a RefCell<Option<WsSink>>) -> Option<Self> {
        let writer = slot.borrow_mut().take()?;
        Some(Self {
            slot,
            writer: Some(writer),
        })
    }
}

impl Drop for WriterLease<'_> {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            let mut slot = self.slot.borrow_mut();
            if slot.is_none() {
                *slot = Some(writer);
            }
        }
    }
}

impl ChannelReader {
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn messages_received(&self) -> u64 {
        self.received
    }

    /// Next data message. Control frames are skipped; a close frame or the
    /// end of the stream yields `ConnectionClosed`.
    pub async fn next_message(&mut self) -> Result<Inbound, NetworkError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    self.received += 1;
                    return Ok(Inbound::Binary(Bytes::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    self.received += 1;
                    return Ok(Inbound::Text(text));
                }
                Some(Ok(Message::Close(_))) | None => return Err(NetworkError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(match NetworkError::from(e) {
                        NetworkError::ConnectionClosed => NetworkError::ConnectionClosed,
                        other => NetworkError::ReceiveFailed(other.to_string()),
                    })
                }
            }
        }
    }
}

/// Resolve a `ws://` URI into the `host:port` to dial
pub(crate) fn socket_target(uri: &str) -> Result<String, NetworkError> {
    let parsed: Uri = uri
        .parse()
        .map_err(|_| NetworkError::InvalidAddress(uri.to_string()))?;

    match parsed.scheme_str() {
        Some("ws") => {}
        Some(other) => {
            return Err(NetworkError::InvalidAddress(format!(
                "unsupported scheme '{other}' in {uri}"
            )))
        }
        None => return Err(NetworkError::InvalidAddress(format!("missing scheme in {uri}"))),
    }

    let host = parsed
        .host()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| NetworkError::InvalidAddress(format!("missing host in {uri}")))?;
    let port = parsed.port_u16().unwrap_or(80);
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("ws://{}", listener.local_addr().unwrap());
        (listener, uri)
    }

    #[test]
    fn test_socket_target() {
        assert_eq!(socket_target("ws://127.0.0.1:9000").unwrap(), "127.0.0.1:9000");
        assert_eq!(socket_target("ws://example.com/call").unwrap(), "example.com:80");
        assert!(socket_target("wss://example.com").is_err());
        assert!(socket_target("127.0.0.1:9000").is_err());
        assert!(socket_target("not a uri").is_err());
    }

    #[tokio::test]
    async fn test_host_and_client_exchange_messages() {
        let (listener, uri) = loopback_listener().await;
        let host = ChannelEndpoint::new(ChannelKind::Chat, Role::Host);
        let client = ChannelEndpoint::new(ChannelKind::Chat, Role::Client);
        assert_eq!(host.state(), EndpointState::Idle);

        let (accepted, connected) = tokio::join!(
            host.accept(listener, Some(Duration::from_secs(5)), Duration::from_secs(5)),
            client.connect(&uri, Duration::from_secs(5)),
        );
        accepted.unwrap();
        connected.unwrap();
        assert!(host.is_open() && client.is_open());

        let mut host_reader = host.take_reader().unwrap();
        assert!(host.take_reader().is_none());

        client.send_text("hello").await.unwrap();
        client.send_binary(Bytes::from_static(&[1, 2, 3])).await.unwrap();

        assert_eq!(host_reader.next_message().await.unwrap(), Inbound::Text("hello".into()));
        assert_eq!(
            host_reader.next_message().await.unwrap(),
            Inbound::Binary(Bytes::from_static(&[1, 2, 3]))
        );
        assert_eq!(host_reader.messages_received(), 2);
        assert_eq!(client.stats().messages_sent, 2);

        client.close().await;
        assert_eq!(client.state(), EndpointState::Closed);
        assert!(matches!(
            host_reader.next_message().await,
            Err(NetworkError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let endpoint = ChannelEndpoint::new(ChannelKind::Video, Role::Client);
        assert!(matches!(
            endpoint.send_binary(Bytes::new()).await,
            Err(NetworkError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_closes_endpoint() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = ChannelEndpoint::new(ChannelKind::Audio, Role::Client);
        let err = endpoint
            .connect(&format!("ws://127.0.0.1:{port}"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::ConnectionFailed(_)));
        assert_eq!(endpoint.state(), EndpointState::Closed);

        // Terminal: a closed endpoint cannot be reused
        assert!(endpoint
            .connect(&format!("ws://127.0.0.1:{port}"), Duration::from_secs(2))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_accept_timeout() {
        let (listener, _uri) = loopback_listener().await;
        let endpoint = ChannelEndpoint::new(ChannelKind::Video, Role::Host);
        let err = endpoint
            .accept(listener, Some(Duration::from_millis(50)), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Timeout(_)));
        assert_eq!(endpoint.state(), EndpointState::Closed);
    }

    #[tokio::test]
    async fn test_accept_skips_failed_handshakes() {
        use tokio::io::AsyncWriteExt;

        let (listener, uri) = loopback_listener().await;
        let addr = listener.local_addr().unwrap();
        let host = ChannelEndpoint::new(ChannelKind::Video, Role::Host);
        let client = ChannelEndpoint::new(ChannelKind::Video, Role::Client);

        let (accepted, connected) = tokio::join!(
            host.accept(listener, Some(Duration::from_secs(5)), Duration::from_secs(2)),
            async {
                // Plain HTTP/1.0 request: not a WebSocket upgrade
                let mut stray = TcpStream::connect(addr).await.unwrap();
                stray.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
                client.connect(&uri, Duration::from_secs(5)).await
            },
        );

        accepted.unwrap();
        connected.unwrap();
        assert!(host.is_open());
        assert_eq!(host.stats().handshakes_rejected, 1);
    }

    #[tokio::test]
    async fn test_accept_drops_silent_connection_after_handshake_timeout() {
        let (listener, uri) = loopback_listener().await;
        let addr = listener.local_addr().unwrap();
        let host = ChannelEndpoint::new(ChannelKind::Audio, Role::Host);
        let client = ChannelEndpoint::new(ChannelKind::Audio, Role::Client);

        // Connected first and never says anything; kept alive for the whole test
        let silent = TcpStream::connect(addr).await.unwrap();

        let (accepted, connected) = tokio::join!(
            host.accept(listener, None, Duration::from_millis(100)),
            client.connect(&uri, Duration::from_secs(5)),
        );

        accepted.unwrap();
        connected.unwrap();
        assert_eq!(host.stats().handshakes_rejected, 1);
        drop(silent);
    }

    #[tokio::test]
    async fn test_cancelled_send_keeps_writer_for_close() {
        use futures_util::FutureExt;

        let (listener, uri) = loopback_listener().await;
        let host = ChannelEndpoint::new(ChannelKind::Video, Role::Host);
        let client = ChannelEndpoint::new(ChannelKind::Video, Role::Client);
        let (accepted, connected) = tokio::join!(
            host.accept(listener, None, Duration::from_secs(5)),
            client.connect(&uri, Duration::from_secs(5)),
        );
        accepted.unwrap();
        connected.unwrap();
        let mut host_reader = host.take_reader().unwrap();

        // Poll a large send once and drop it, as a stop would mid-send
        let _ = client
            .send_binary(Bytes::from(vec![7u8; 4 * 1024 * 1024]))
            .now_or_never();
        assert!(client.writer.borrow().is_some());

        let (_, outcome) = tokio::join!(client.close(), async {
            loop {
                match host_reader.next_message().await {
                    Ok(_) => continue,
                    Err(e) => break e,
                }
            }
        });
        assert!(matches!(outcome, NetworkError::ConnectionClosed));
    }
}
