// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! Fixed-point money and UTC timestamp value types.

mod money;
mod timestamp;

pub use money::Money;
pub use timestamp::Timestamp;
