// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! Exponential backoff with jitter, shared by the WebSocket and SSE reconnect loops.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

const MIN_FACTOR: f64 = 1.0;
const MAX_FACTOR: f64 = 100.0;

/// Errors raised when constructing an [`ExponentialBackoff`] with invalid parameters.
#[derive(Debug, Error, PartialEq)]
pub enum BackoffError {
    /// The growth factor fell outside `[1.0, 100.0]`.
    #[error("backoff factor must be within [{MIN_FACTOR}, {MAX_FACTOR}], got {0}")]
    InvalidFactor(f64),

    /// `max` was smaller than `initial`.
    #[error("max delay ({max:?}) must be >= initial delay ({initial:?})")]
    InvalidRange {
        /// The configured initial delay.
        initial: Duration,
        /// The configured maximum delay.
        max: Duration,
    },
}

/// Computes successive reconnect delays: `initial * factor^attempt`, clamped to `max`, plus
/// a uniformly random jitter in `[0, jitter_ms]`.
///
/// Mirrors the reconnect policy described by `{ initial_delay, max_delay, multiplier, jitter }`:
/// the base delay grows monotonically and never exceeds `max`, while jitter is layered on top of
/// the returned delay without affecting the internally tracked base.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter_ms: u64,
    immediate_first: bool,
    current: Duration,
    is_first: bool,
}

impl ExponentialBackoff {
    /// Creates a new backoff. `immediate_first`, when set, makes the very first call to
    /// [`next_duration`](Self::next_duration) return zero without advancing internal state —
    /// useful for a reconnect policy that wants to retry once immediately before backing off.
    pub fn new(
        initial: Duration,
        max: Duration,
        factor: f64,
        jitter_ms: u64,
        immediate_first: bool,
    ) -> Result<Self, BackoffError> {
        if !(MIN_FACTOR..=MAX_FACTOR).contains(&factor) {
            return Err(BackoffError::InvalidFactor(factor));
        }
        if max < initial {
            return Err(BackoffError::InvalidRange { initial, max });
        }

        Ok(Self {
            initial,
            max,
            factor,
            jitter_ms,
            immediate_first,
            current: initial,
            is_first: true,
        })
    }

    /// The base delay (no jitter) that the *next* call to [`next_duration`](Self::next_duration)
    /// will draw from, before jitter is added.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Returns the delay to sleep before the next reconnect attempt and advances state.
    pub fn next_duration(&mut self) -> Duration {
        if self.immediate_first && self.is_first {
            self.is_first = false;
            return Duration::ZERO;
        }
        self.is_first = false;

        let base = self.current;
        let jitter = if self.jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        } else {
            Duration::ZERO
        };

        let grown_ms = (base.as_millis() as f64 * self.factor).round();
        let grown = if grown_ms.is_finite() && grown_ms >= 0.0 {
            Duration::from_millis(grown_ms as u64)
        } else {
            self.max
        };
        self.current = grown.min(self.max);

        base + jitter
    }

    /// Restores the backoff to its freshly-constructed state. Called on a successful
    /// (re)connection so the next failure starts counting from attempt one again.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.is_first = true;
    }
}
