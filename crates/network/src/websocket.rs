// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! A reconnecting WebSocket client: connect, optional heartbeat, transparent exponential-backoff
//! reconnect, and a bounded pending-send queue while disconnected.
//!
//! This module knows nothing about any particular wire format — authentication frames,
//! subscription replay, and typed frame demultiplexing belong to the layer built on top of it.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
pub use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::backoff::ExponentialBackoff;
use crate::error::WebSocketError;

const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;
const DEFAULT_RECONNECT_FACTOR: f64 = 2.0;
const DEFAULT_RECONNECT_JITTER_MS: u64 = 250;
const DEFAULT_QUEUE_LIMIT: usize = 4_096;

/// Sink for inbound frames. Typically an unbounded channel's sender; see
/// [`channel_message_handler`].
pub type MessageHandler = mpsc::UnboundedSender<Message>;

/// Invoked with the payload of an inbound `Ping` frame instead of the client's default
/// (auto-pong) behavior.
pub type PingHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

type ReconnectFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Vec<Message>> + Send>>;

/// Invoked after every successful (re)connection, before the pending-send queue is drained, to
/// produce the frames a layer built on this client needs replayed (an auth handshake,
/// subscription state). Unlike `initial_message`/`replay_messages`, this is re-evaluated on every
/// call, so it can reflect state that changed after the client was constructed.
pub type ReconnectHook = Arc<dyn Fn() -> ReconnectFuture + Send + Sync>;

/// Configuration for a [`WebSocketClient`].
#[derive(Clone)]
pub struct WebSocketConfig {
    /// Endpoint to connect to, e.g. `wss://stream.example.com/v2/iex`.
    pub url: String,
    /// Extra headers sent on the opening handshake (case preserved).
    pub headers: Vec<(String, String)>,
    /// Where inbound frames are forwarded. `None` discards them.
    pub message_handler: Option<MessageHandler>,
    /// Interval at which an outbound heartbeat frame is sent. `None` disables heartbeating.
    pub heartbeat: Option<Duration>,
    /// The frame sent on each heartbeat tick, when `heartbeat` is set.
    pub heartbeat_msg: Option<Message>,
    /// Overrides the default auto-pong behavior for inbound `Ping` frames.
    pub ping_handler: Option<PingHandler>,
    /// Per-connection-attempt timeout.
    pub reconnect_timeout_ms: Option<u64>,
    /// Initial reconnect backoff delay.
    pub reconnect_delay_initial_ms: Option<u64>,
    /// Maximum reconnect backoff delay.
    pub reconnect_delay_max_ms: Option<u64>,
    /// Reconnect backoff growth factor.
    pub reconnect_backoff_factor: Option<f64>,
    /// Reconnect backoff jitter, in milliseconds.
    pub reconnect_jitter_ms: Option<u64>,
    /// Upper bound on the pending-send queue while disconnected. Defaults to 4096 if `None`.
    pub send_queue_limit: Option<usize>,
}

/// Builds an unbounded channel suited for use as a [`WebSocketConfig::message_handler`], paired
/// with the receiver the caller reads inbound frames from.
#[must_use]
pub fn channel_message_handler() -> (MessageHandler, mpsc::UnboundedReceiver<Message>) {
    mpsc::unbounded_channel()
}

enum WriterCommand {
    Send(Message),
    Stop,
}

/// A connected (or reconnecting) WebSocket client.
///
/// Send-queue and connection flags are shared with the background connection task via atomics
/// and a mutex-guarded queue; the task itself owns the socket and performs reconnects with
/// exponential backoff, never resurrecting a connection after [`disconnect`](Self::disconnect).
pub struct WebSocketClient {
    connected: Arc<AtomicBool>,
    manual_disconnect: Arc<AtomicBool>,
    should_reconnect: Arc<AtomicBool>,
    pending: Arc<Mutex<VecDeque<Message>>>,
    queue_limit: usize,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    task_handle: Option<JoinHandle<()>>,
}

impl WebSocketClient {
    /// Connects to `config.url` and spawns the background connection/reconnect task.
    ///
    /// `initial_message`, if present, is sent immediately after every successful (re)connection,
    /// before `replay_messages`; `replay_messages` is then sent in order. Both are frozen at
    /// construction time. `on_reconnect`, if present, runs after those and is re-evaluated on
    /// every (re)connect, for replay state that can change over the client's lifetime (a live
    /// subscription set, say). Both kinds of replay complete, in order, before the pending-send
    /// queue built up while disconnected is drained — a reconnect never lets a queued send reach
    /// the server ahead of the handshake it depends on. `handler_override`, if present, replaces
    /// `config.message_handler` for this connection's lifetime.
    pub async fn connect(
        mut config: WebSocketConfig,
        initial_message: Option<Message>,
        replay_messages: Vec<Message>,
        handler_override: Option<MessageHandler>,
        on_reconnect: Option<ReconnectHook>,
    ) -> Result<Self, WebSocketError> {
        if let Some(handler) = handler_override {
            config.message_handler = Some(handler);
        }

        let connected = Arc::new(AtomicBool::new(false));
        let manual_disconnect = Arc::new(AtomicBool::new(false));
        let should_reconnect = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let queue_limit = config.send_queue_limit.unwrap_or(DEFAULT_QUEUE_LIMIT);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        // Perform the first connection attempt synchronously so `connect()` fails fast on a bad
        // URL or an unreachable host, matching the construction-time-failure policy used
        // throughout this crate.
        let stream = open_connection(&config).await?;

        let task_handle = tokio::spawn(run_connection_loop(
            config,
            stream,
            writer_rx,
            connected.clone(),
            manual_disconnect.clone(),
            should_reconnect.clone(),
            pending.clone(),
            initial_message,
            replay_messages,
            on_reconnect,
        ));

        Ok(Self {
            connected,
            manual_disconnect,
            should_reconnect,
            pending,
            queue_limit,
            writer_tx,
            task_handle: Some(task_handle),
        })
    }

    /// Whether the client currently has an open connection.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The inverse of [`is_active`](Self::is_active).
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        !self.is_active()
    }

    /// Sends a text frame, or enqueues it if currently disconnected.
    pub async fn send_text(&self, text: String, timeout: Option<Duration>) -> Result<(), WebSocketError> {
        self.send_message(Message::Text(text.into()), timeout).await
    }

    /// Sends an arbitrary frame, or enqueues it if currently disconnected.
    pub async fn send_message(&self, message: Message, timeout: Option<Duration>) -> Result<(), WebSocketError> {
        if self.is_active() {
            let send = self.writer_tx.send(WriterCommand::Send(message));
            return send.map_err(|_| WebSocketError::Disconnected);
        }

        let mut queue = self.pending.lock().await;
        if queue.len() >= self.queue_limit {
            return Err(WebSocketError::QueueLimit { limit: self.queue_limit });
        }
        queue.push_back(message);
        drop(queue);
        let _ = timeout;
        Ok(())
    }

    /// Clears the should-reconnect flag, stops the background task, and drains the pending
    /// queue. Idempotent: safe to call when already disconnected.
    pub async fn disconnect(&self) {
        self.manual_disconnect.store(true, Ordering::SeqCst);
        self.should_reconnect.store(false, Ordering::SeqCst);
        let _ = self.writer_tx.send(WriterCommand::Stop);
        self.pending.lock().await.clear();
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn open_connection(config: &WebSocketConfig) -> Result<WsStream, WebSocketError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| WebSocketError::Connect(e.to_string()))?;

    for (name, value) in &config.headers {
        let header_name: http::HeaderName = name
            .parse()
            .map_err(|e| WebSocketError::Connect(format!("invalid header name {name}: {e}")))?;
        let header_value = http::HeaderValue::from_str(value)
            .map_err(|e| WebSocketError::Connect(format!("invalid header value for {name}: {e}")))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let connect_future = tokio_tungstenite::connect_async(request);
    let timeout = Duration::from_millis(config.reconnect_timeout_ms.unwrap_or(10_000));
    let (stream, _response) = tokio::time::timeout(timeout, connect_future)
        .await
        .map_err(|_| WebSocketError::Connect("connect timed out".to_string()))?
        .map_err(|e| WebSocketError::Connect(e.to_string()))?;

    Ok(stream)
}

#[allow(clippy::too_many_arguments)]
async fn run_connection_loop(
    config: WebSocketConfig,
    mut stream: WsStream,
    mut writer_rx: mpsc::UnboundedReceiver<WriterCommand>,
    connected: Arc<AtomicBool>,
    manual_disconnect: Arc<AtomicBool>,
    should_reconnect: Arc<AtomicBool>,
    pending: Arc<Mutex<VecDeque<Message>>>,
    initial_message: Option<Message>,
    replay_messages: Vec<Message>,
    on_reconnect: Option<ReconnectHook>,
) {
    let mut backoff = ExponentialBackoff::new(
        Duration::from_millis(config.reconnect_delay_initial_ms.unwrap_or(DEFAULT_RECONNECT_INITIAL_MS)),
        Duration::from_millis(config.reconnect_delay_max_ms.unwrap_or(DEFAULT_RECONNECT_MAX_MS)),
        config.reconnect_backoff_factor.unwrap_or(DEFAULT_RECONNECT_FACTOR),
        config.reconnect_jitter_ms.unwrap_or(DEFAULT_RECONNECT_JITTER_MS),
        false,
    )
    .unwrap_or_else(|_| {
        ExponentialBackoff::new(
            Duration::from_millis(DEFAULT_RECONNECT_INITIAL_MS),
            Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            DEFAULT_RECONNECT_FACTOR,
            DEFAULT_RECONNECT_JITTER_MS,
            false,
        )
        .expect("default backoff parameters are always valid")
    });

    loop {
        if on_open(&mut stream, &initial_message, &replay_messages, &on_reconnect, &pending).await.is_ok() {
            debug!(url = %config.url, "WebSocket connection open");
            connected.store(true, Ordering::SeqCst);
            backoff.reset();
        } else {
            warn!(url = %config.url, "failed to replay state after connect");
        }

        run_open_session(&mut stream, &config, &mut writer_rx).await;
        connected.store(false, Ordering::SeqCst);

        if manual_disconnect.load(Ordering::SeqCst) || !should_reconnect.load(Ordering::SeqCst) {
            break;
        }

        let delay = backoff.next_duration();
        warn!(url = %config.url, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::time::sleep(delay).await;

        match open_connection(&config).await {
            Ok(new_stream) => stream = new_stream,
            Err(e) => {
                warn!(url = %config.url, error = %e, "reconnect attempt failed");
                continue;
            }
        }
    }
}

async fn on_open(
    stream: &mut WsStream,
    initial_message: &Option<Message>,
    replay_messages: &[Message],
    on_reconnect: &Option<ReconnectHook>,
    pending: &Arc<Mutex<VecDeque<Message>>>,
) -> Result<(), WebSocketError> {
    if let Some(message) = initial_message {
        stream
            .send(message.clone())
            .await
            .map_err(|e| WebSocketError::Connect(e.to_string()))?;
    }
    for message in replay_messages {
        stream
            .send(message.clone())
            .await
            .map_err(|e| WebSocketError::Connect(e.to_string()))?;
    }
    if let Some(hook) = on_reconnect {
        for message in hook().await {
            stream
                .send(message)
                .await
                .map_err(|e| WebSocketError::Connect(e.to_string()))?;
        }
    }

    let mut queue = pending.lock().await;
    while let Some(message) = queue.pop_front() {
        stream
            .send(message)
            .await
            .map_err(|e| WebSocketError::Connect(e.to_string()))?;
    }
    Ok(())
}

async fn run_open_session(
    stream: &mut WsStream,
    config: &WebSocketConfig,
    writer_rx: &mut mpsc::UnboundedReceiver<WriterCommand>,
) {
    let mut heartbeat_interval = config.heartbeat.map(tokio::time::interval);

    loop {
        let heartbeat_tick = async {
            match heartbeat_interval.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            cmd = writer_rx.recv() => {
                match cmd {
                    Some(WriterCommand::Send(message)) => {
                        if stream.send(message).await.is_err() {
                            break;
                        }
                    }
                    Some(WriterCommand::Stop) | None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Ping(data))) => {
                        if let Some(handler) = &config.ping_handler {
                            handler(data.to_vec());
                        } else if stream.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(message)) => {
                        trace!("inbound frame");
                        if let Some(handler) = &config.message_handler {
                            let _ = handler.send(message);
                        }
                    }
                    Some(Err(_)) | None => break,
                }
            }
            () = heartbeat_tick => {
                if let Some(msg) = &config.heartbeat_msg
                    && stream.send(msg.clone()).await.is_err()
                {
                    break;
                }
            }
        }
    }
}
