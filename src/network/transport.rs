//! Reconnecting WebSocket transport
//!
//! [`Lifecycle`] holds the pure connect/retry bookkeeping; the driver task
//! owns the socket and forwards everything it sees as [`TransportEvent`]s.
//! Outgoing text goes through a [`TransportHandle`], which refuses to send
//! unless a socket is open.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::constants::MIN_CONNECT_TIMEOUT_MS;
use crate::error::NetworkError;

/// Backoff unit and the jittered delay floor
pub const BACKOFF_BASE_MS: u64 = 800;
pub const BACKOFF_MAX_MS: u64 = 30_000;
const BACKOFF_MAX_EXPONENT: u32 = 8;
const BACKOFF_JITTER: f64 = 0.25;

/// Link state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Un-jittered delay after the `attempt`-th consecutive failure:
/// `800 * 2^min(attempt, 8)` ms, capped at 30 s. The first retry waits 1.6 s.
pub fn backoff_base_ms(attempt: u32) -> u64 {
    let exponent = attempt.min(BACKOFF_MAX_EXPONENT);
    (BACKOFF_BASE_MS << exponent).min(BACKOFF_MAX_MS)
}

/// Jittered reconnect delay, always within 75%..125% of the base
pub fn backoff_delay<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let base = backoff_base_ms(attempt) as f64;
    let jitter = rng.gen_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    let ms = (base * (1.0 + jitter)).round().max(BACKOFF_BASE_MS as f64);
    Duration::from_millis(ms as u64)
}

/// Retry bookkeeping for one connection
#[derive(Debug)]
pub struct Lifecycle {
    attempt: u32,
    ever_connected: bool,
    closed: bool,
    state: LinkState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            ever_connected: false,
            closed: false,
            state: LinkState::Connecting,
        }
    }

    /// A connection attempt is starting
    pub fn begin_connect(&mut self) -> LinkState {
        self.state = if self.ever_connected {
            LinkState::Reconnecting
        } else {
            LinkState::Connecting
        };
        self.state
    }

    pub fn on_open(&mut self) {
        self.attempt = 0;
        self.ever_connected = true;
        self.state = LinkState::Connected;
    }

    /// The socket closed or never opened. Returns the retry delay and status
    /// message, or `None` once closed for good.
    pub fn on_close<R: Rng + ?Sized>(&mut self, reason: &str, rng: &mut R) -> Option<(Duration, String)> {
        if self.closed {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);
        let delay = backoff_delay(self.attempt, rng);
        self.state = LinkState::Reconnecting;
        let message = format!(
            "{}, retrying in {}ms (attempt {})",
            reason,
            delay.as_millis(),
            self.attempt
        );
        Some((delay, message))
    }

    /// Returns false if already closed
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.state = LinkState::Disconnected;
        true
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn ever_connected(&self) -> bool {
        self.ever_connected
    }

    pub fn state(&self) -> LinkState {
        self.state
    }
}

/// Everything the transport reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status {
        state: LinkState,
        message: Option<String>,
    },
    Opened,
    Text(String),
    Binary(Bytes),
    Closed {
        reason: String,
    },
}

/// Sending side of a transport
#[derive(Debug, Clone)]
pub struct TransportHandle {
    open: Arc<AtomicBool>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl TransportHandle {
    /// Queue text on the current socket. Returns false unless it is open.
    pub fn send_text(&self, text: String) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        self.outgoing.send(text).is_ok()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Transport channel settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>, connect_timeout_ms: u64) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_millis(connect_timeout_ms.max(MIN_CONNECT_TIMEOUT_MS)),
        }
    }
}

/// A running reconnecting connection
pub struct TransportChannel {
    handle: TransportHandle,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl TransportChannel {
    /// Validate the URL and start connecting
    pub fn spawn(
        config: TransportConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, NetworkError> {
        if !(config.url.starts_with("ws://") || config.url.starts_with("wss://")) {
            return Err(NetworkError::InvalidUrl(config.url));
        }

        let open = Arc::new(AtomicBool::new(false));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = Driver {
            config,
            lifecycle: Lifecycle::new(),
            open: open.clone(),
            outgoing: outgoing_rx,
            events: events.clone(),
            shutdown: shutdown_rx,
            rng: StdRng::from_entropy(),
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            handle: TransportHandle {
                open,
                outgoing: outgoing_tx,
            },
            events,
            shutdown: shutdown_tx,
            task: Some(task),
            closed: false,
        })
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Stop the connection and all retries. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.handle.open.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        let _ = self.events.send(TransportEvent::Status {
            state: LinkState::Disconnected,
            message: None,
        });
        info!("Transport closed");
    }

    /// Wait for the driver task to finish after [`close`](Self::close)
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(config: &TransportConfig) -> Result<WsStream, NetworkError> {
    match tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Err(_) => Err(NetworkError::Timeout),
        Ok(Err(e)) => Err(NetworkError::ConnectionFailed(e.to_string())),
        Ok(Ok((ws, _))) => Ok(ws),
    }
}

struct Driver {
    config: TransportConfig,
    lifecycle: Lifecycle,
    open: Arc<AtomicBool>,
    outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: watch::Receiver<bool>,
    rng: StdRng,
}

impl Driver {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self, message: Option<String>) {
        self.emit(TransportEvent::Status {
            state: self.lifecycle.state(),
            message,
        });
    }

    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.lifecycle.begin_connect();
            self.emit_status(None);
            debug!("Connecting to {}", self.config.url);

            let connected = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                result = connect(&self.config) => result,
            };

            let reason = match connected {
                Ok(ws) => match self.session(ws).await {
                    Some(reason) => reason,
                    None => break,
                },
                Err(e) => e.to_string(),
            };
            self.open.store(false, Ordering::SeqCst);

            let Some((delay, message)) = self.lifecycle.on_close(&reason, &mut self.rng) else {
                break;
            };
            warn!("Transport: {}", message);
            self.emit_status(Some(message));
            self.emit(TransportEvent::Closed { reason });

            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.lifecycle.close();
        self.open.store(false, Ordering::SeqCst);
        debug!("Transport driver stopped");
    }

    /// Pump one open socket. Returns the close reason, or `None` on shutdown.
    async fn session(&mut self, ws: WsStream) -> Option<String> {
        let (mut write, mut read) = ws.split();

        // Anything queued for the previous socket is stale
        while self.outgoing.try_recv().is_ok() {}

        self.open.store(true, Ordering::SeqCst);
        self.lifecycle.on_open();
        info!("Connected to {}", self.config.url);
        self.emit_status(None);
        self.emit(TransportEvent::Opened);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    self.open.store(false, Ordering::SeqCst);
                    let _ = write.send(Message::Close(None)).await;
                    return None;
                }
                text = self.outgoing.recv() => {
                    let Some(text) = text else {
                        return None;
                    };
                    if let Err(e) = write.send(Message::Text(text)).await {
                        self.open.store(false, Ordering::SeqCst);
                        return Some(NetworkError::SendFailed(e.to_string()).to_string());
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.emit(TransportEvent::Text(text)),
                    Some(Ok(Message::Binary(data))) => self.emit(TransportEvent::Binary(Bytes::from(data))),
                    Some(Ok(Message::Close(frame))) => {
                        self.open.store(false, Ordering::SeqCst);
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return Some(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.open.store(false, Ordering::SeqCst);
                        return Some(e.to_string());
                    }
                    None => {
                        self.open.store(false, Ordering::SeqCst);
                        return Some("connection closed".to_string());
                    }
                },
            }
        }
    }
}
