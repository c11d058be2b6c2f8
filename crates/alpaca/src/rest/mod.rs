// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! REST client: URL composition, authentication, response decoding, and pagination.

mod client;
mod pagination;
mod query;

pub use client::{Credentials, RestClient};
pub use pagination::{paginate, PageSource};
pub use query::{append_query, build_url};
