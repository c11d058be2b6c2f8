// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! A client library for Alpaca's trading, market-data, and broker APIs: value types, the error
//! taxonomy, REST request/response plumbing with pagination, OAuth token exchange, the WebSocket
//! streaming engine, the broker server-sent-events stream, and the sequence-gap backfill
//! coordinator. DTO modeling of individual endpoints is intentionally out of scope; callers decode
//! the raw JSON this crate hands back into their own types.

pub mod backfill;
pub mod broker_stream;
pub mod config;
pub mod error;
pub mod oauth;
pub mod rest;
pub mod streaming;
pub mod value;

pub use config::{Configuration, Environment};
pub use error::{Error, ErrorKind};
pub use value::{Money, Timestamp};
