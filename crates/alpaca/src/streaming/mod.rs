// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! The WebSocket streaming engine: per-feed authentication, subscription replay, and typed
//! frame demultiplexing.

mod client;
mod messages;

pub use client::{Feed, FrameHandler, StreamErrorHandler, StreamingClient, StreamingClientConfig};
pub use messages::{parse_frame, StreamMessage};
