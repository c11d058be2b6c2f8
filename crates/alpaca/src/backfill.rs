// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! Detects and responds to sequence gaps in market-data streams by replaying the missing
//! window over REST.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{error::Error, streaming::Feed, value::Timestamp};

/// Fetches the replay window for a gap, returning raw JSON records. DTO decoding is left to the
/// caller's handlers.
#[async_trait]
pub trait ReplaySource: Send + Sync {
    /// Fetches trades for `symbol` within `[start, end]`, capped at `limit` records.
    async fn fetch_trades(
        &self,
        feed: Feed,
        symbol: &str,
        start: Timestamp,
        end: Timestamp,
        limit: u32,
    ) -> Result<Vec<Value>, Error>;

    /// Fetches bars for `symbol` within `[start, end]` at `timeframe`, capped at `limit` records.
    async fn fetch_bars(
        &self,
        feed: Feed,
        symbol: &str,
        start: Timestamp,
        end: Timestamp,
        limit: u32,
        timeframe: &str,
    ) -> Result<Vec<Value>, Error>;
}

/// Invoked with replayed trades for `symbol`; an empty list means the symbol had none in the
/// replay window, not that the callback was suppressed.
pub type TradeReplayHandler = Arc<dyn Fn(String, Vec<Value>) + Send + Sync>;
/// Invoked with replayed bars for `symbol`; same empty-list convention as [`TradeReplayHandler`].
pub type BarReplayHandler = Arc<dyn Fn(String, Vec<Value>) + Send + Sync>;

const DEFAULT_BAR_TIMEFRAME: &str = "1Min";

/// Tunables for [`BackfillCoordinator`].
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Timeframe used when querying bar replays.
    pub bar_timeframe: String,
    /// Feed identifier passed to crypto REST endpoints when replaying market data.
    pub crypto_feed: Option<String>,
    /// Enables replaying missing trade data.
    pub request_trades: bool,
    /// Enables replaying missing bar data.
    pub request_bars: bool,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            bar_timeframe: DEFAULT_BAR_TIMEFRAME.to_string(),
            crypto_feed: None,
            request_trades: true,
            request_bars: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Trade,
    Bar,
}

#[derive(Debug, Clone, Default)]
struct StreamState {
    previous_timestamp: Option<Timestamp>,
    last_timestamp: Option<Timestamp>,
    last_requested_range: Option<(u64, u64)>,
}

/// Coordinates REST backfill requests when sequence gaps are detected on a streaming connection.
pub struct BackfillCoordinator {
    source: Arc<dyn ReplaySource>,
    feed: Feed,
    options: BackfillOptions,
    states: Mutex<HashMap<String, StreamState>>,
    trade_handler: Mutex<Option<TradeReplayHandler>>,
    bar_handler: Mutex<Option<BarReplayHandler>>,
}

impl BackfillCoordinator {
    /// Builds a coordinator dispatching replay requests for `feed` through `source`.
    #[must_use]
    pub fn new(source: Arc<dyn ReplaySource>, feed: Feed) -> Self {
        Self::with_options(source, feed, BackfillOptions::default())
    }

    /// Builds a coordinator with explicit [`BackfillOptions`].
    #[must_use]
    pub fn with_options(source: Arc<dyn ReplaySource>, feed: Feed, options: BackfillOptions) -> Self {
        Self {
            source,
            feed,
            options,
            states: Mutex::new(HashMap::new()),
            trade_handler: Mutex::new(None),
            bar_handler: Mutex::new(None),
        }
    }

    /// Installs the handler invoked with replayed trades.
    pub async fn set_trade_replay_handler(&self, handler: TradeReplayHandler) {
        *self.trade_handler.lock().await = Some(handler);
    }

    /// Installs the handler invoked with replayed bars.
    pub async fn set_bar_replay_handler(&self, handler: BarReplayHandler) {
        *self.bar_handler.lock().await = Some(handler);
    }

    /// Records the latest timestamp and sequence observed for `stream_id` so future gaps can
    /// derive a replay window. Payloads with no recognized kind or timestamp are ignored.
    pub async fn record_payload(&self, stream_id: &str, payload: &Value) {
        let Some(timestamp) = extract_timestamp(payload) else { return };
        let Some(kind) = classify_payload(payload) else { return };

        let key = make_state_key(stream_id, kind);
        let mut states = self.states.lock().await;
        let state = states.entry(key).or_default();
        state.previous_timestamp = state.last_timestamp;
        state.last_timestamp = Some(timestamp);

        if let Some(sequence) = extract_sequence(payload) {
            if let Some((_, high)) = state.last_requested_range {
                if sequence >= high {
                    state.last_requested_range = None;
                }
            }
        }
    }

    /// Invoked when a sequence gap is detected: dispatches a REST replay for the missing range
    /// unless it is already covered by a prior in-flight request for the same stream and kind.
    pub async fn request_backfill(
        &self,
        stream_id: &str,
        from_sequence: u64,
        to_sequence: u64,
        payload: &Value,
    ) -> Result<(), Error> {
        if from_sequence > to_sequence {
            return Ok(());
        }
        let Some(kind) = classify_payload(payload) else { return Ok(()) };
        let Some(observed_timestamp) = extract_timestamp(payload) else { return Ok(()) };

        let key = make_state_key(stream_id, kind);
        let symbol = extract_symbol_from_stream_id(stream_id).to_string();

        let (start_timestamp, skip) = {
            let mut states = self.states.lock().await;
            let state = states.entry(key).or_default();

            let skip = match state.last_requested_range {
                Some((low, high)) => from_sequence >= low && to_sequence <= high,
                None => false,
            };

            if !skip {
                let merged = match state.last_requested_range {
                    Some((low, high)) => (from_sequence.min(low), to_sequence.max(high)),
                    None => (from_sequence, to_sequence),
                };
                state.last_requested_range = Some(merged);
            }

            let start = state.previous_timestamp.or(state.last_timestamp);
            (start, skip)
        };

        if skip {
            return Ok(());
        }

        let start = start_timestamp.unwrap_or(observed_timestamp);
        let (start, end) = if start > observed_timestamp { (observed_timestamp, start) } else { (start, observed_timestamp) };

        let span = to_sequence - from_sequence + 1;
        let limit = span.min(i32::MAX as u64) as u32;

        match kind {
            PayloadKind::Trade if self.options.request_trades => self.replay_trades(&symbol, start, end, limit).await,
            PayloadKind::Bar if self.options.request_bars => self.replay_bars(&symbol, start, end, limit).await,
            _ => Ok(()),
        }
    }

    async fn replay_trades(&self, symbol: &str, start: Timestamp, end: Timestamp, limit: u32) -> Result<(), Error> {
        if matches!(self.feed, Feed::Trading) {
            return Ok(());
        }
        let trades = self.source.fetch_trades(self.feed, symbol, start, end, limit).await?;
        if let Some(handler) = self.trade_handler.lock().await.clone() {
            handler(symbol.to_string(), trades);
        }
        Ok(())
    }

    async fn replay_bars(&self, symbol: &str, start: Timestamp, end: Timestamp, limit: u32) -> Result<(), Error> {
        if matches!(self.feed, Feed::Trading) {
            return Ok(());
        }
        let bars = self
            .source
            .fetch_bars(self.feed, symbol, start, end, limit, &self.options.bar_timeframe)
            .await?;
        if let Some(handler) = self.bar_handler.lock().await.clone() {
            handler(symbol.to_string(), bars);
        }
        Ok(())
    }
}

fn extract_symbol_from_stream_id(stream_id: &str) -> &str {
    match stream_id.rfind('|') {
        Some(pos) => &stream_id[pos + 1..],
        None => stream_id,
    }
}

fn make_state_key(stream_id: &str, kind: PayloadKind) -> String {
    let suffix = match kind {
        PayloadKind::Trade => "trade",
        PayloadKind::Bar => "bar",
    };
    format!("{}|{suffix}", extract_symbol_from_stream_id(stream_id))
}

fn classify_payload(payload: &Value) -> Option<PayloadKind> {
    if let Some(discriminator) = payload.get("T").and_then(Value::as_str) {
        return match discriminator.to_ascii_lowercase().as_str() {
            "t" => Some(PayloadKind::Trade),
            "b" | "u" => Some(PayloadKind::Bar),
            _ => None,
        };
    }
    if let Some(event) = payload.get("ev").and_then(Value::as_str) {
        return match event.to_ascii_lowercase().as_str() {
            "trade" => Some(PayloadKind::Trade),
            "bar" => Some(PayloadKind::Bar),
            _ => None,
        };
    }
    None
}

fn extract_timestamp(payload: &Value) -> Option<Timestamp> {
    if let Some(text) = payload.get("t").and_then(Value::as_str) {
        if let Ok(timestamp) = Timestamp::parse(text) {
            return Some(timestamp);
        }
    }
    if let Some(text) = payload.get("timestamp").and_then(Value::as_str) {
        if let Ok(timestamp) = Timestamp::parse(text) {
            return Some(timestamp);
        }
    }
    None
}

fn extract_sequence(payload: &Value) -> Option<u64> {
    for key in ["i", "sequence", "seq"] {
        if let Some(value) = parse_sequence_field(payload.get(key)) {
            return Some(value);
        }
    }
    None
}

fn parse_sequence_field(field: Option<&Value>) -> Option<u64> {
    match field? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if !s.is_empty() => s.parse::<u64>().ok(),
        _ => None,
    }
}
