//! # WebSocket Transport
//!
//! WebSocket client with automatic reconnection and an outbound buffer.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Backend Link States                                  │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │ ◄──────────────┐        │
//! │  └────────────┘                 └─────┬──────┘                │        │
//! │                           success     │     failure           │        │
//! │                         ┌─────────────┴──────────┐            │        │
//! │                         ▼                        ▼            │        │
//! │                  ┌────────────┐           ┌────────────┐      │        │
//! │                  │ Connected  │──closed──►│  Backoff   │──────┤        │
//! │                  └────────────┘           └─────┬──────┘      │        │
//! │                                                 │ N failures  │        │
//! │                                                 ▼             │        │
//! │                                           ┌────────────┐      │        │
//! │                                           │  Offline   │──────┘        │
//! │                                           └────────────┘  slow retry   │
//! │                                                                         │
//! │  ON CONNECT                                                            │
//! │  ──────────                                                            │
//! │  1. Hello                                                              │
//! │  2. Buffered messages, oldest first                                    │
//! │  3. Live traffic                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A buffered message leaves the buffer only after it was written to the
//! socket, so a connection that drops mid-flush loses nothing.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::buffer::OutboundBuffer;
use crate::error::{SyncError, SyncResult};
use crate::protocol::ChannelMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the backend socket.
type WsSink = SplitSink<WsStream, WsMessage>;

// =============================================================================
// Transport State
// =============================================================================

/// Where the link to the backend stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Waiting before the next reconnection attempt.
    Backoff,
    /// Reconnect attempts exhausted; retrying on the slow interval.
    Offline,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
            ConnectionState::Offline => write!(f, "offline"),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Backend link settings, derived from `[websocket]` in `station.toml`.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `ws://` or `wss://` endpoint of the backend.
    pub url: String,

    /// Sent first on every new connection.
    pub hello: ChannelMessage,

    pub connect_timeout: Duration,

    /// Delay between reconnection attempts.
    pub reconnect_interval: Duration,

    /// Consecutive failures before the transport counts as offline.
    pub max_reconnect_attempts: u32,

    /// Delay between attempts once offline.
    pub offline_retry_interval: Duration,

    /// WebSocket ping period while connected.
    pub ping_interval: Duration,

    /// Messages held while disconnected.
    pub max_buffered: usize,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>, hello: ChannelMessage) -> Self {
        TransportConfig {
            url: url.into(),
            hello,
            connect_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            offline_retry_interval: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            max_buffered: 1000,
        }
    }
}

// =============================================================================
// Transport Handle
// =============================================================================

/// Cloneable sender side of the transport.
#[derive(Clone)]
pub struct TransportHandle {
    /// Unbounded so event sinks can send without awaiting.
    outgoing_tx: mpsc::UnboundedSender<ChannelMessage>,

    state: Arc<RwLock<ConnectionState>>,

    shutdown_tx: mpsc::Sender<()>,
}

impl TransportHandle {
    /// Queues a message. Delivered now if connected, after reconnecting
    /// otherwise.
    pub fn send(&self, message: ChannelMessage) -> SyncResult<()> {
        self.outgoing_tx
            .send(message)
            .map_err(|_| SyncError::ShuttingDown)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Sends a Close frame and stops reconnecting.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Failed to send shutdown signal".into()))
    }
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// Reconnecting backend link.
///
/// ## Usage
/// ```rust,ignore
/// let config = TransportConfig::new("ws://backend:8080/station", ChannelMessage::hello("s1"));
/// let (handle, mut incoming_rx) = Transport::spawn(config);
///
/// handle.send(ChannelMessage::heartbeat("s1"))?;
///
/// while let Some(msg) = incoming_rx.recv().await {
///     println!("Received: {}", msg.type_name());
/// }
/// ```
pub struct Transport {
    config: TransportConfig,
    state: Arc<RwLock<ConnectionState>>,
    buffer: OutboundBuffer,
    outgoing_rx: mpsc::UnboundedReceiver<ChannelMessage>,
    incoming_tx: mpsc::Sender<ChannelMessage>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Why a connection ended.
enum Ended {
    Lost,
    Shutdown,
}

impl Transport {
    /// Spawns the link task. Inbound messages arrive on the returned receiver.
    pub fn spawn(config: TransportConfig) -> (TransportHandle, mpsc::Receiver<ChannelMessage>) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<ChannelMessage>();
        let (incoming_tx, incoming_rx) = mpsc::channel::<ChannelMessage>(100);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let transport = Transport {
            buffer: OutboundBuffer::new(config.max_buffered),
            config,
            state: state.clone(),
            outgoing_rx,
            incoming_tx,
            shutdown_rx,
        };

        tokio::spawn(transport.run());

        let handle = TransportHandle {
            outgoing_tx,
            state,
            shutdown_tx,
        };

        (handle, incoming_rx)
    }

    /// Main transport loop.
    async fn run(mut self) {
        info!(url = %self.config.url, "Transport starting");

        let mut retry = Constant::new(self.config.reconnect_interval);
        let mut offline_retry = Constant::new(self.config.offline_retry_interval);
        let mut failures = 0u32;

        loop {
            *self.state.write().await = ConnectionState::Connecting;

            match self.connect_with_timeout().await {
                Ok(ws_stream) => {
                    info!("WebSocket connected");
                    *self.state.write().await = ConnectionState::Connected;
                    failures = 0;
                    retry.reset();

                    match self.connection_loop(ws_stream).await {
                        Ok(Ended::Shutdown) => break,
                        Ok(Ended::Lost) => info!("Connection closed by the backend"),
                        Err(e) => warn!(error = %e, "Connection lost"),
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    error!(error = %e, attempt = failures, "Failed to connect");
                }
            }

            let offline = failures >= self.config.max_reconnect_attempts.max(1);
            let delay = if offline {
                if failures == self.config.max_reconnect_attempts.max(1) {
                    warn!(
                        attempts = failures,
                        buffered = self.buffer.len(),
                        "Backend unreachable, station is offline"
                    );
                }
                *self.state.write().await = ConnectionState::Offline;
                offline_retry.next_backoff()
            } else {
                *self.state.write().await = ConnectionState::Backoff;
                retry.next_backoff()
            }
            .unwrap_or(self.config.reconnect_interval);

            debug!(?delay, attempt = failures, "Waiting before reconnect");
            if self.wait(delay).await.is_err() {
                info!("Shutdown during backoff");
                break;
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        info!(dropped = self.buffer.len(), "Transport stopped");
    }

    /// Sleeps for `delay`, buffering whatever is sent meanwhile.
    async fn wait(&mut self, delay: Duration) -> SyncResult<()> {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                Some(msg) = self.outgoing_rx.recv() => {
                    self.buffer.push(msg, false);
                }
                _ = self.shutdown_rx.recv() => return Err(SyncError::ShuttingDown),
            }
        }
    }

    async fn connect_with_timeout(&self) -> SyncResult<WsStream> {
        let connect_future = connect_async(&self.config.url);

        match timeout(self.config.connect_timeout, connect_future).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.config.connect_timeout.as_millis() as u64)),
        }
    }

    /// Writes the front of the buffer until it is empty.
    async fn flush(&mut self, write: &mut WsSink) -> SyncResult<()> {
        while let Some(msg) = self.buffer.front() {
            let json = msg.to_json()?;
            debug!(msg_type = %msg.type_name(), "Sending message");
            write.send(WsMessage::Text(json.into())).await?;
            self.buffer.pop_front();
        }
        Ok(())
    }

    /// One connected session: outbound queue, inbound frames, pings.
    async fn connection_loop(&mut self, ws_stream: WsStream) -> SyncResult<Ended> {
        let (mut write, mut read) = ws_stream.split();

        while let Ok(msg) = self.outgoing_rx.try_recv() {
            self.buffer.push(msg, false);
        }
        self.buffer.discard_ephemeral();

        let hello = self.config.hello.to_json()?;
        write.send(WsMessage::Text(hello.into())).await?;
        if !self.buffer.is_empty() {
            info!(count = self.buffer.len(), "Flushing buffered messages");
        }
        self.flush(&mut write).await?;

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = self.outgoing_rx.recv() => {
                    self.buffer.push(msg, true);
                    self.flush(&mut write).await?;
                }

                result = read.next() => {
                    let Some(result) = result else {
                        return Err(SyncError::Disconnected);
                    };
                    match result {
                        Ok(WsMessage::Text(text)) => {
                            match ChannelMessage::from_json(&text) {
                                Ok(msg) => {
                                    debug!(msg_type = %msg.type_name(), "Received message");
                                    if self.incoming_tx.send(msg).await.is_err() {
                                        warn!("Incoming message receiver dropped");
                                        return Err(SyncError::ChannelError("Receiver dropped".into()));
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "Failed to parse message");
                                    self.buffer.push(
                                        ChannelMessage::error("INVALID_MESSAGE", &e.to_string(), None),
                                        true,
                                    );
                                    self.flush(&mut write).await?;
                                }
                            }
                        }
                        Ok(WsMessage::Ping(data)) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Ok(WsMessage::Pong(_)) => {
                            debug!("Received pong");
                        }
                        Ok(WsMessage::Close(frame)) => {
                            info!(?frame, "Received close frame");
                            return Ok(Ended::Lost);
                        }
                        Ok(WsMessage::Binary(_)) => {
                            warn!("Received unexpected binary message");
                        }
                        Ok(WsMessage::Frame(_)) => {}
                        Err(e) => {
                            error!(error = %e, "WebSocket error");
                            return Err(SyncError::from(e));
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(WsMessage::Ping(Vec::new().into())).await?;
                    debug!("Sent ping");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(Ended::Shutdown);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Offline.to_string(), "offline");
    }

    #[test]
    fn test_transport_config_defaults() {
        let config = TransportConfig::new("ws://localhost:9000", ChannelMessage::hello("s1"));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.max_buffered, 1000);
    }

    #[tokio::test]
    async fn test_unreachable_backend_goes_offline_and_buffers() {
        let mut config = TransportConfig::new("ws://127.0.0.1:1", ChannelMessage::hello("s1"));
        config.connect_timeout = Duration::from_millis(200);
        config.reconnect_interval = Duration::from_millis(10);
        config.max_reconnect_attempts = 2;
        config.offline_retry_interval = Duration::from_secs(30);

        let (handle, _incoming) = Transport::spawn(config);
        handle.send(ChannelMessage::error("TEST", "queued", None)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.state().await != ConnectionState::Offline {
            assert!(Instant::now() < deadline, "transport never went offline");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.shutdown().await.unwrap();
    }
}
