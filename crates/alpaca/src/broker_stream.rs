// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! The broker server-sent-events stream: long-lived `GET` with the SSE subset described in the
//! wire contract, automatic reconnect, and `Last-Event-ID` resumption.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use apca_net::{backoff::ExponentialBackoff, http::Headers};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use crate::error::Error;

const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_secs(1);
const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_FACTOR: f64 = 2.0;
const DEFAULT_RECONNECT_JITTER_MS: u64 = 250;

/// A chunk-producing byte stream, pluggable so tests can script a scripted body without touching
/// the network.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Opens the long-lived GET request and hands back its response body as a byte stream.
#[async_trait]
pub trait SseSource: Send + Sync {
    /// Opens the stream with `headers` already fully populated (auth, `Last-Event-ID`, etc).
    async fn open(&self, headers: Headers) -> Result<ByteStream, Error>;
}

/// `reqwest`-backed [`SseSource`].
pub struct ReqwestSseSource {
    client: reqwest::Client,
    url: String,
}

impl ReqwestSseSource {
    /// Builds a source for `url` using a default-configured `reqwest` client.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl SseSource for ReqwestSseSource {
    async fn open(&self, headers: Headers) -> Result<ByteStream, Error> {
        let mut builder = self.client.get(&self.url);
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::new(crate::error::ErrorKind::TransportPerform, e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::new(
                crate::error::ErrorKind::TransportPerform,
                format!("broker stream GET failed with status {}", response.status()),
            ));
        }
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::new(crate::error::ErrorKind::TransportPerform, e.to_string())));
        Ok(Box::pin(stream))
    }
}

/// Credentials for the broker stream, selected by the same rule as the REST client.
#[derive(Debug, Clone, Default)]
pub struct StreamCredentials {
    /// API key id.
    pub api_key_id: String,
    /// API secret key.
    pub api_secret_key: String,
    /// OAuth bearer token.
    pub bearer_token: Option<String>,
}

/// Builds the events-stream URL: `{broker_base_url}/v2/events/{resource}?{query}`, unless
/// `resource` is already rooted at `v2/` (or `/v2/`), in which case it is used verbatim.
#[must_use]
pub fn build_events_url(broker_base_url: &str, resource: &str, query: &[(&str, &str)]) -> String {
    let resource = if resource.is_empty() { "accounts" } else { resource };
    let normalized = if resource.starts_with("v2/") || resource.starts_with("/v2/") {
        resource.to_string()
    } else {
        format!("v2/events/{resource}")
    };

    let mut url = broker_base_url.to_string();
    if !normalized.starts_with('/') {
        url.push('/');
    }
    url.push_str(&normalized);

    if !query.is_empty() {
        url = crate::rest::append_query(&url, query);
    }
    url
}

fn auth_headers(credentials: &StreamCredentials, last_event_id: Option<&str>) -> Headers {
    let mut headers = Headers::new();
    if !credentials.api_key_id.is_empty() && !credentials.api_secret_key.is_empty() {
        headers.set("APCA-API-KEY-ID", credentials.api_key_id.clone());
        headers.set("APCA-API-SECRET-KEY", credentials.api_secret_key.clone());
    } else if let Some(token) = credentials.bearer_token.as_deref().filter(|t| !t.is_empty()) {
        headers.set("Authorization", format!("Bearer {token}"));
    }
    headers.set("Accept", "text/event-stream");
    headers.set("Cache-Control", "no-cache");
    headers.set("Connection", "keep-alive");
    headers.set("User-Agent", concat!("apca-rust/", env!("CARGO_PKG_VERSION")));
    if let Some(id) = last_event_id {
        headers.set("Last-Event-ID", id.to_string());
    }
    headers
}

/// Accumulates incoming bytes and splits them into SSE event blocks, dispatching the parsed
/// JSON payload of each `data` field (as an array's elements, or the object itself).
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    last_event_id: Option<String>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);
        let mut dispatched = Vec::new();
        while let Some((start, len)) = find_earliest_delimiter(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..start + len).collect();
            if let Some(values) = self.parse_block(&block[..start]) {
                dispatched.extend(values);
            }
        }
        dispatched
    }

    fn parse_block(&mut self, block: &[u8]) -> Option<Vec<Value>> {
        let text = String::from_utf8_lossy(block);
        let mut data_lines: Vec<String> = Vec::new();

        for raw_line in text.split('\n') {
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, rest) = match line.find(':') {
                Some(idx) => (&line[..idx], &line[idx + 1..]),
                None => (line, ""),
            };
            let value = rest.strip_prefix(' ').unwrap_or(rest);
            match field {
                "id" => self.last_event_id = Some(value.to_string()),
                "data" => data_lines.push(value.to_string()),
                _ => {}
            }
        }

        if data_lines.is_empty() {
            return None;
        }
        let data = data_lines.join("\n");
        let parsed: Value = serde_json::from_str(&data).ok()?;
        Some(match parsed {
            Value::Array(items) => items,
            other => vec![other],
        })
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn find_earliest_delimiter(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find_subslice(buffer, b"\n\n").map(|pos| (pos, 2));
    let crlf = find_subslice(buffer, b"\r\n\r\n").map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Invoked for every dispatched event payload.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;
/// Invoked on a connection or parse failure; a reconnect follows automatically.
pub type StreamErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// A reconnecting broker SSE stream.
pub struct BrokerStream {
    should_reconnect: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl BrokerStream {
    /// Connects and starts background delivery. Reconnects automatically on disconnect or
    /// error, with the same backoff discipline as the WebSocket engine, resuming from the most
    /// recently observed `Last-Event-ID`.
    pub fn connect(
        source: Arc<dyn SseSource>,
        credentials: StreamCredentials,
        on_event: EventHandler,
        on_error: StreamErrorHandler,
    ) -> Self {
        let should_reconnect = Arc::new(AtomicBool::new(true));
        let last_event_id = Arc::new(Mutex::new(None::<String>));

        let task = tokio::spawn({
            let should_reconnect = should_reconnect.clone();
            async move {
                let mut backoff = ExponentialBackoff::new(
                    DEFAULT_RECONNECT_INITIAL,
                    DEFAULT_RECONNECT_MAX,
                    DEFAULT_RECONNECT_FACTOR,
                    DEFAULT_RECONNECT_JITTER_MS,
                    false,
                )
                .expect("default backoff parameters are always valid");

                while should_reconnect.load(Ordering::SeqCst) {
                    let current_last_id = last_event_id.lock().await.clone();
                    let headers = auth_headers(&credentials, current_last_id.as_deref());

                    let dispatched_count =
                        match run_session(&*source, headers, &on_event, &last_event_id, &should_reconnect).await {
                            Ok(count) => count,
                            Err(err) => {
                                warn!(error = %err, "broker stream session ended with an error");
                                on_error(err);
                                0
                            }
                        };

                    if !should_reconnect.load(Ordering::SeqCst) {
                        break;
                    }

                    if dispatched_count > 0 {
                        backoff.reset();
                    }
                    let delay = backoff.next_duration();
                    debug!(delay_ms = delay.as_millis() as u64, "reconnecting broker stream after backoff");
                    tokio::time::sleep(delay).await;
                }
            }
        });

        Self { should_reconnect, task: Some(task) }
    }

    /// Stops reconnecting and joins the background worker. Idempotent.
    pub async fn disconnect(&mut self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for BrokerStream {
    fn drop(&mut self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_session(
    source: &dyn SseSource,
    headers: Headers,
    on_event: &EventHandler,
    last_event_id: &Arc<Mutex<Option<String>>>,
    should_reconnect: &Arc<AtomicBool>,
) -> Result<usize, Error> {
    let mut stream = source.open(headers).await?;
    let mut parser = SseParser::default();
    let mut dispatched_count = 0usize;

    while should_reconnect.load(Ordering::SeqCst) {
        match stream.next().await {
            Some(Ok(chunk)) => {
                for event in parser.feed(&chunk) {
                    on_event(event);
                    dispatched_count += 1;
                }
                if let Some(id) = parser.last_event_id.clone() {
                    *last_event_id.lock().await = Some(id);
                }
            }
            Some(Err(err)) => return Err(err),
            None => break,
        }
    }

    Ok(dispatched_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_object_event_block() {
        let mut parser = SseParser::default();
        let events = parser.feed(b"id: 1\ndata: {\"foo\":\"bar\"}\n\n");
        assert_eq!(events, vec![serde_json::json!({"foo": "bar"})]);
        assert_eq!(parser.last_event_id.as_deref(), Some("1"));
    }

    #[test]
    fn dispatches_each_array_element_separately() {
        let mut parser = SseParser::default();
        let events = parser.feed(b"data: [{\"a\":1},{\"a\":2}]\n\n");
        assert_eq!(events, vec![serde_json::json!({"a": 1}), serde_json::json!({"a": 2})]);
    }

    #[test]
    fn concatenates_multiple_data_lines_with_newline() {
        let mut parser = SseParser::default();
        let events = parser.feed(b"data: [1,\ndata: 2]\n\n");
        assert_eq!(events, vec![serde_json::json!(1), serde_json::json!(2)]);
    }

    #[test]
    fn skips_comment_lines() {
        let mut parser = SseParser::default();
        let events = parser.feed(b": keepalive\ndata: {\"ok\":true}\n\n");
        assert_eq!(events, vec![serde_json::json!({"ok": true})]);
    }

    #[test]
    fn handles_crlf_crlf_terminator() {
        let mut parser = SseParser::default();
        let events = parser.feed(b"data: {\"ok\":true}\r\n\r\n");
        assert_eq!(events, vec![serde_json::json!({"ok": true})]);
    }

    #[test]
    fn buffers_partial_blocks_across_feeds() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: {\"ok\"").is_empty());
        let events = parser.feed(b":true}\n\n");
        assert_eq!(events, vec![serde_json::json!({"ok": true})]);
    }

    #[test]
    fn block_without_data_dispatches_nothing() {
        let mut parser = SseParser::default();
        let events = parser.feed(b"id: 5\n\n");
        assert!(events.is_empty());
        assert_eq!(parser.last_event_id.as_deref(), Some("5"));
    }

    #[test]
    fn auth_headers_prefer_key_secret_over_bearer() {
        let credentials = StreamCredentials {
            api_key_id: "key".to_string(),
            api_secret_key: "secret".to_string(),
            bearer_token: Some("token".to_string()),
        };
        let headers = auth_headers(&credentials, Some("42"));
        assert_eq!(headers.get("APCA-API-KEY-ID"), Some("key"));
        assert_eq!(headers.get("Authorization"), None);
        assert_eq!(headers.get("Last-Event-ID"), Some("42"));
    }

    #[test]
    fn auth_headers_omit_last_event_id_when_absent() {
        let headers = auth_headers(&StreamCredentials::default(), None);
        assert_eq!(headers.get("Last-Event-ID"), None);
    }

    #[test]
    fn build_events_url_defaults_resource_to_accounts() {
        let url = build_events_url("https://broker-api.alpaca.markets", "", &[]);
        assert_eq!(url, "https://broker-api.alpaca.markets/v2/events/accounts");
    }

    #[test]
    fn build_events_url_prefixes_bare_resource_with_events_path() {
        let url = build_events_url("https://broker-api.alpaca.markets", "trades", &[("since", "123")]);
        assert_eq!(url, "https://broker-api.alpaca.markets/v2/events/trades?since=123");
    }

    #[test]
    fn build_events_url_leaves_already_rooted_resource_untouched() {
        let url = build_events_url("https://broker-api.alpaca.markets", "v2/events/journals", &[]);
        assert_eq!(url, "https://broker-api.alpaca.markets/v2/events/journals");
    }
}
