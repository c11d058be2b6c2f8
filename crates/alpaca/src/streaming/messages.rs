// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! Typed demultiplexing of inbound streaming frames.

use serde_json::Value;

/// One demultiplexed inbound frame. DTO field bindings are left to the caller; each variant
/// carries the raw JSON payload it was classified from.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// `T == "t"`.
    Trade(Value),
    /// `T == "q"`.
    Quote(Value),
    /// `T == "b"`, `"d"`, or `"o"`.
    Bar(Value),
    /// `T == "u"` without a `uS` field.
    UpdatedBar(Value),
    /// `T == "u"` with a `uS` field.
    Underlying(Value),
    /// `T == "s"`.
    Status(Value),
    /// `T == "x"`.
    TradeCancel(Value),
    /// `T == "c"`.
    TradeCorrection(Value),
    /// `T == "i"`.
    Imbalance(Value),
    /// `T` one of `success`/`subscription`/`cancel`/`control`/`ping`.
    Control(Value),
    /// `T == "error"` or `event == "error"`.
    Error(String),
    /// `stream == "trade_updates"` or `event == "trade_updates"`.
    OrderUpdate(Value),
    /// `stream == "account_updates"` or `event == "account_updates"`.
    AccountUpdate(Value),
    /// Didn't match any recognized discriminator; carries the raw payload text.
    Unknown(String),
}

/// Parses `text` as either a single JSON object or a top-level array of objects, classifying
/// each into a [`StreamMessage`].
pub fn parse_frame(text: &str) -> Result<Vec<StreamMessage>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    Ok(match value {
        Value::Array(items) => items.iter().map(classify).collect(),
        other => vec![classify(&other)],
    })
}

fn classify(value: &Value) -> StreamMessage {
    if let Some(discriminator) = value.get("T").and_then(Value::as_str) {
        return match discriminator {
            "t" => StreamMessage::Trade(value.clone()),
            "q" => StreamMessage::Quote(value.clone()),
            "b" | "d" | "o" => StreamMessage::Bar(value.clone()),
            "u" if value.get("uS").is_some() => StreamMessage::Underlying(value.clone()),
            "u" => StreamMessage::UpdatedBar(value.clone()),
            "s" => StreamMessage::Status(value.clone()),
            "x" => StreamMessage::TradeCancel(value.clone()),
            "c" => StreamMessage::TradeCorrection(value.clone()),
            "i" => StreamMessage::Imbalance(value.clone()),
            "error" => StreamMessage::Error(extract_message(value)),
            "success" | "subscription" | "cancel" | "control" | "ping" => StreamMessage::Control(value.clone()),
            _ => StreamMessage::Unknown(value.to_string()),
        };
    }

    let stream = value.get("stream").and_then(Value::as_str);
    let event = value.get("event").and_then(Value::as_str);

    if stream == Some("trade_updates") || event == Some("trade_updates") {
        return StreamMessage::OrderUpdate(value.clone());
    }
    if stream == Some("account_updates") || event == Some("account_updates") {
        return StreamMessage::AccountUpdate(value.clone());
    }
    if event == Some("error") {
        return StreamMessage::Error(extract_message(value));
    }

    StreamMessage::Unknown(value.to_string())
}

fn extract_message(value: &Value) -> String {
    value
        .get("message")
        .or_else(|| value.get("msg"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Whether `message` is the JSON-level keepalive (`{"T":"ping"}` / `stream=="ping"` shaped
/// control frame) rather than a data-bearing control event.
#[must_use]
pub fn is_ping_control(message: &StreamMessage) -> bool {
    matches!(message, StreamMessage::Control(value) if value.get("T").and_then(Value::as_str) == Some("ping"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_trade_and_quote() {
        let frames = parse_frame(r#"[{"T":"t","S":"AAPL"},{"T":"q","S":"AAPL"}]"#).unwrap();
        assert!(matches!(frames[0], StreamMessage::Trade(_)));
        assert!(matches!(frames[1], StreamMessage::Quote(_)));
    }

    #[test]
    fn bar_discriminators_cover_daily_and_updated() {
        for t in ["b", "d", "o"] {
            let frames = parse_frame(&format!(r#"{{"T":"{t}"}}"#)).unwrap();
            assert!(matches!(frames[0], StreamMessage::Bar(_)));
        }
    }

    #[test]
    fn updated_bar_with_us_field_becomes_underlying() {
        let frames = parse_frame(r#"{"T":"u","uS":"AAPL"}"#).unwrap();
        assert!(matches!(frames[0], StreamMessage::Underlying(_)));

        let frames = parse_frame(r#"{"T":"u"}"#).unwrap();
        assert!(matches!(frames[0], StreamMessage::UpdatedBar(_)));
    }

    #[test]
    fn recognizes_control_and_ping() {
        let frames = parse_frame(r#"{"T":"ping"}"#).unwrap();
        assert!(is_ping_control(&frames[0]));

        let frames = parse_frame(r#"{"T":"success","msg":"connected"}"#).unwrap();
        assert!(matches!(frames[0], StreamMessage::Control(_)));
        assert!(!is_ping_control(&frames[0]));
    }

    #[test]
    fn trading_updates_route_by_stream_or_event() {
        let frames = parse_frame(r#"{"stream":"trade_updates","data":{}}"#).unwrap();
        assert!(matches!(frames[0], StreamMessage::OrderUpdate(_)));

        let frames = parse_frame(r#"{"event":"account_updates","data":{}}"#).unwrap();
        assert!(matches!(frames[0], StreamMessage::AccountUpdate(_)));
    }

    #[test]
    fn unrecognized_payload_is_unknown() {
        let frames = parse_frame(r#"{"foo":"bar"}"#).unwrap();
        assert!(matches!(frames[0], StreamMessage::Unknown(_)));
    }
}
