// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

use std::time::Duration;

use thiserror::Error;

/// Errors produced while building or executing an HTTP request.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// The transport could not be configured (bad TLS material, bad base settings).
    #[error("failed to build HTTP client: {0}")]
    Build(String),

    /// The underlying transport returned an error (connect failure, TLS failure, I/O error).
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The request exceeded its configured timeout.
    #[error("HTTP request timed out after {0:?}")]
    Timeout(Duration),

    /// The supplied URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors produced by the reconnecting WebSocket client.
#[derive(Debug, Error)]
pub enum WebSocketError {
    /// The initial connection attempt failed.
    #[error("WebSocket connect failed: {0}")]
    Connect(String),

    /// A send was attempted while the client had no open connection and no queue available.
    #[error("cannot send: WebSocket client is disconnected")]
    Disconnected,

    /// The bounded pending-send queue would have exceeded its configured limit.
    #[error("send queue limit of {limit} messages exceeded")]
    QueueLimit {
        /// The configured upper bound that was exceeded.
        limit: usize,
    },

    /// A ping interval of zero or negative duration was configured.
    #[error("ping interval must be positive, got {0:?}")]
    InvalidPingInterval(Duration),
}
