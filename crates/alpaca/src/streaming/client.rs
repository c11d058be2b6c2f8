// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! The reconnecting WebSocket streaming engine: per-feed authentication, subscription replay,
//! and typed frame delivery on top of [`apca_net::websocket`].

use std::{
    collections::BTreeSet,
    sync::Arc,
    time::Duration,
};

use apca_net::websocket::{channel_message_handler, Message, WebSocketClient, WebSocketConfig};
use serde_json::{json, Value};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind};

use super::messages::{is_ping_control, parse_frame, StreamMessage};

const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Which upstream feed a [`StreamingClient`] is authenticating against. Each has its own
/// authentication frame shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// Stock/ETF market data (SIP/IEX).
    MarketData,
    /// Crypto market data.
    Crypto,
    /// Options market data.
    Options,
    /// Trading account/order updates.
    Trading,
}

#[derive(Debug, Default)]
struct SubscriptionState {
    trades: BTreeSet<String>,
    quotes: BTreeSet<String>,
    bars: BTreeSet<String>,
    statuses: BTreeSet<String>,
    streams: BTreeSet<String>,
}

/// Invoked for every demultiplexed inbound frame.
pub type FrameHandler = Arc<dyn Fn(StreamMessage) + Send + Sync>;
/// Invoked when the engine encounters a delivery or reconnect error.
pub type StreamErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Configuration for a [`StreamingClient::connect`] call.
pub struct StreamingClientConfig {
    /// The feed endpoint to connect to.
    pub url: String,
    /// Which feed this connects to, selecting the auth frame shape.
    pub feed: Feed,
    /// API key (market-data/crypto/options) or key id (trading).
    pub key: String,
    /// API secret.
    pub secret: String,
    /// Interval between outbound pings. Must be positive; defaults to 30 seconds.
    pub ping_interval: Duration,
    /// Upper bound on the pending-send queue while disconnected.
    pub send_queue_limit: Option<usize>,
}

impl Default for StreamingClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            feed: Feed::MarketData,
            key: String::new(),
            secret: String::new(),
            ping_interval: DEFAULT_PING_INTERVAL,
            send_queue_limit: None,
        }
    }
}

/// A connected, auto-reconnecting streaming client.
///
/// Authentication and subscription replay are driven by the client itself on every (re)connect:
/// the underlying [`WebSocketClient`] handles backoff and reconnection opaquely; this layer only
/// knows to re-authenticate and re-subscribe whenever it observes the connection come back up.
pub struct StreamingClient {
    socket: Arc<WebSocketClient>,
    state: Arc<Mutex<SubscriptionState>>,
    feed: Feed,
    key: String,
    secret: String,
    pump: Option<JoinHandle<()>>,
}

impl StreamingClient {
    /// Connects, authenticates, and starts background frame delivery. `on_message` is invoked
    /// for every demultiplexed frame; `on_error` for classification failures, reconnect-replay
    /// failures, or a panic inside `on_message`.
    pub async fn connect(
        config: StreamingClientConfig,
        on_message: FrameHandler,
        on_error: StreamErrorHandler,
    ) -> Result<Self, Error> {
        if config.ping_interval.is_zero() {
            return Err(Error::new(ErrorKind::InvalidPingInterval, "ping interval must be positive"));
        }

        let (message_handler, mut message_rx) = channel_message_handler();
        let ws_config = WebSocketConfig {
            url: config.url,
            headers: Vec::new(),
            message_handler: Some(message_handler),
            heartbeat: Some(config.ping_interval),
            heartbeat_msg: Some(Message::Ping(Vec::new().into())),
            ping_handler: None,
            reconnect_timeout_ms: None,
            reconnect_delay_initial_ms: None,
            reconnect_delay_max_ms: None,
            reconnect_backoff_factor: None,
            reconnect_jitter_ms: None,
            send_queue_limit: config.send_queue_limit,
        };

        let state = Arc::new(Mutex::new(SubscriptionState::default()));
        let on_reconnect: apca_net::websocket::ReconnectHook = {
            let state = state.clone();
            let feed = config.feed;
            let key = config.key.clone();
            let secret = config.secret.clone();
            Arc::new(move || {
                let state = state.clone();
                let key = key.clone();
                let secret = secret.clone();
                Box::pin(async move {
                    debug!(?feed, "(re)connected, replaying auth and subscriptions");
                    reconnect_frames(feed, &key, &secret, &state).await
                })
            })
        };

        let socket =
            Arc::new(WebSocketClient::connect(ws_config, None, vec![], None, Some(on_reconnect)).await?);

        let pump = tokio::spawn({
            let socket = socket.clone();
            let on_message = on_message.clone();
            let on_error = on_error.clone();
            async move {
                while let Some(message) = message_rx.recv().await {
                    let Message::Text(text) = message else { continue };
                    match parse_frame(&text) {
                        Ok(frames) => {
                            for frame in frames {
                                if is_ping_control(&frame) {
                                    let _ = socket.send_text(r#"{"action":"pong"}"#.to_string(), None).await;
                                }
                                let handler = on_message.clone();
                                let outcome =
                                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(frame)));
                                if outcome.is_err() {
                                    on_error(Error::new(ErrorKind::ApiResponseError, "stream handler panicked"));
                                }
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "failed to parse inbound stream frame");
                            on_error(Error::new(ErrorKind::ApiResponseError, err.to_string()));
                        }
                    }
                }
            }
        });

        Ok(Self {
            socket,
            state,
            feed: config.feed,
            key: config.key,
            secret: config.secret,
            pump: Some(pump),
        })
    }

    /// Subscribes to the given channels, emitting a `subscribe` frame carrying only the
    /// newly-added entries (empty channel arrays are omitted).
    pub async fn subscribe(
        &self,
        trades: &[String],
        quotes: &[String],
        bars: &[String],
        statuses: &[String],
    ) -> Result<(), Error> {
        let (delta_trades, delta_quotes, delta_bars, delta_statuses) = {
            let mut state = self.state.lock().await;
            (
                insert_new(&mut state.trades, trades),
                insert_new(&mut state.quotes, quotes),
                insert_new(&mut state.bars, bars),
                insert_new(&mut state.statuses, statuses),
            )
        };

        if let Some(frame) =
            build_channel_frame("subscribe", &delta_trades, &delta_quotes, &delta_bars, &delta_statuses)
        {
            self.socket.send_text(frame, None).await?;
        }
        Ok(())
    }

    /// Unsubscribes from the given channels, emitting an `unsubscribe` frame carrying only the
    /// entries that were actually present.
    pub async fn unsubscribe(
        &self,
        trades: &[String],
        quotes: &[String],
        bars: &[String],
        statuses: &[String],
    ) -> Result<(), Error> {
        let (delta_trades, delta_quotes, delta_bars, delta_statuses) = {
            let mut state = self.state.lock().await;
            (
                remove_existing(&mut state.trades, trades),
                remove_existing(&mut state.quotes, quotes),
                remove_existing(&mut state.bars, bars),
                remove_existing(&mut state.statuses, statuses),
            )
        };

        if let Some(frame) =
            build_channel_frame("unsubscribe", &delta_trades, &delta_quotes, &delta_bars, &delta_statuses)
        {
            self.socket.send_text(frame, None).await?;
        }
        Ok(())
    }

    /// Appends unseen trading streams (e.g. `trade_updates`, `account_updates`) and emits a
    /// `listen` frame carrying the newly-added ones.
    pub async fn listen(&self, streams: &[String]) -> Result<(), Error> {
        let delta = {
            let mut state = self.state.lock().await;
            insert_new(&mut state.streams, streams)
        };
        if let Some(frame) = build_listen_frame(&delta) {
            self.socket.send_text(frame, None).await?;
        }
        Ok(())
    }

    /// Sends an arbitrary raw frame, immediately if connected, otherwise enqueued.
    pub async fn send_raw(&self, frame: impl Into<String>) -> Result<(), Error> {
        self.socket.send_text(frame.into(), None).await?;
        Ok(())
    }

    /// Whether the underlying transport currently has an open connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.socket.is_active()
    }

    /// Disconnects permanently: stops reconnecting, joins background workers, and clears any
    /// pending sends. Idempotent.
    pub async fn disconnect(&mut self) {
        self.socket.disconnect().await;
        if let Some(handle) = self.pump.take() {
            handle.abort();
        }
    }
}

fn insert_new(set: &mut BTreeSet<String>, items: &[String]) -> Vec<String> {
    items.iter().filter(|item| set.insert((*item).clone())).cloned().collect()
}

fn remove_existing(set: &mut BTreeSet<String>, items: &[String]) -> Vec<String> {
    items.iter().filter(|item| set.remove(*item)).cloned().collect()
}

fn auth_frame(feed: Feed, key: &str, secret: &str) -> String {
    match feed {
        Feed::Trading => json!({"action": "authenticate", "data": {"key_id": key, "secret_key": secret}}).to_string(),
        Feed::MarketData | Feed::Crypto | Feed::Options => json!({"action": "auth", "key": key, "secret": secret}).to_string(),
    }
}

fn build_channel_frame(
    action: &str,
    trades: &[String],
    quotes: &[String],
    bars: &[String],
    statuses: &[String],
) -> Option<String> {
    let mut obj = serde_json::Map::new();
    obj.insert("action".to_string(), json!(action));
    let mut any = false;
    for (key, channel) in [("trades", trades), ("quotes", quotes), ("bars", bars), ("statuses", statuses)] {
        if !channel.is_empty() {
            obj.insert(key.to_string(), json!(channel));
            any = true;
        }
    }
    any.then(|| Value::Object(obj).to_string())
}

fn build_listen_frame(streams: &[String]) -> Option<String> {
    if streams.is_empty() {
        return None;
    }
    Some(json!({"action": "listen", "data": {"streams": streams}}).to_string())
}

/// Builds the frames to replay on every (re)connect: the auth frame, then a `subscribe` frame
/// for the current subscription snapshot (if non-empty), then a `listen` frame (if non-empty).
/// Invoked fresh from the transport's post-open hook on every single (re)connect, so it always
/// reflects live subscription state rather than whatever was current at construction time.
async fn reconnect_frames(feed: Feed, key: &str, secret: &str, state: &Arc<Mutex<SubscriptionState>>) -> Vec<Message> {
    let mut frames = vec![Message::Text(auth_frame(feed, key, secret).into())];

    let state = state.lock().await;
    let trades: Vec<String> = state.trades.iter().cloned().collect();
    let quotes: Vec<String> = state.quotes.iter().cloned().collect();
    let bars: Vec<String> = state.bars.iter().cloned().collect();
    let statuses: Vec<String> = state.statuses.iter().cloned().collect();
    let streams: Vec<String> = state.streams.iter().cloned().collect();
    drop(state);

    if let Some(frame) = build_channel_frame("subscribe", &trades, &quotes, &bars, &statuses) {
        frames.push(Message::Text(frame.into()));
    }
    if let Some(frame) = build_listen_frame(&streams) {
        frames.push(Message::Text(frame.into()));
    }
    frames
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.take() {
            handle.abort();
        }
    }
}
