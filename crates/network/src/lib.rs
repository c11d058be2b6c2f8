// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! Transport machinery shared by the `apca` brokerage client: a pluggable HTTP transport, a
//! reconnecting WebSocket client with heartbeat and exponential backoff, and the backoff
//! primitive itself. Nothing in this crate knows about Alpaca's wire formats.

pub mod backoff;
pub mod error;
pub mod http;
pub mod websocket;

pub use error::{HttpClientError, WebSocketError};
