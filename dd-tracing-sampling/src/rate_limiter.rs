// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

const ONE_SECOND_NS: u64 = 1_000_000_000;

/// A token bucket rate limiter.
///
/// Tokens are fractional and replenished lazily when a token is requested, so
/// an idle limiter costs nothing. The limiter also tracks how many requests
/// it allowed versus saw per one-second window; the two-window average is the
/// limiter's effective rate, which samplers record on kept spans.
#[derive(Clone)]
pub struct RateLimiter {
    /// * `max_per_second` > 0: max number of requests to allow per second
    /// * `max_per_second` == 0: disallow all requests
    /// * `max_per_second` < 0: allow all requests
    max_per_second: f64,

    inner: Arc<Mutex<RateLimiterState>>,
}

struct RateLimiterState {
    /// Current number of tokens available
    tokens: f64,

    /// Maximum number of tokens that can be stored
    max_tokens: f64,

    /// Last time tokens were replenished
    last_refill: Instant,

    /// Start time of the current window
    current_window_start: Option<Instant>,

    /// Number of requests allowed in the current window
    allowed: u64,

    /// Total number of requests in the current window
    total: u64,

    /// Rate from the previous window for calculating the effective rate
    prev_window_rate: Option<f64>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock().unwrap();
        f.debug_struct("RateLimiter")
            .field("max_per_second", &self.max_per_second)
            .field("tokens", &state.tokens)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(max_per_second: f64) -> Self {
        let max_tokens = max_per_second.max(0.0);

        let state = RateLimiterState {
            tokens: max_tokens,
            max_tokens,
            last_refill: Instant::now(),
            current_window_start: None,
            allowed: 0,
            total: 0,
            prev_window_rate: None,
        };

        RateLimiter {
            max_per_second,
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Checks whether the current request is allowed, consuming a token if it
    /// is.
    pub fn is_allowed(&self) -> bool {
        self.is_allowed_at(Instant::now())
    }

    fn is_allowed_at(&self, now: Instant) -> bool {
        if self.max_per_second < 0.0 {
            return true;
        }

        let mut state = self.inner.lock().unwrap();

        let allowed = if self.max_per_second == 0.0 {
            false
        } else {
            if state.tokens < 1.0 {
                self.refill(&mut state, now);
            }
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                true
            } else {
                false
            }
        };

        self.update_window_counts(&mut state, allowed, now);
        allowed
    }

    fn refill(&self, state: &mut RateLimiterState, now: Instant) {
        let elapsed_ns = now.duration_since(state.last_refill).as_nanos() as f64;
        let new_tokens = elapsed_ns / ONE_SECOND_NS as f64 * self.max_per_second;

        state.tokens = (state.tokens + new_tokens).min(state.max_tokens);
        state.last_refill = now;
    }

    fn update_window_counts(&self, state: &mut RateLimiterState, allowed: bool, now: Instant) {
        match state.current_window_start {
            None => state.current_window_start = Some(now),
            Some(window_start) => {
                if now.duration_since(window_start).as_nanos() as u64 >= ONE_SECOND_NS {
                    state.prev_window_rate = Some(current_window_rate(state));
                    state.allowed = 0;
                    state.total = 0;
                    state.current_window_start = Some(now);
                }
            }
        }

        if allowed {
            state.allowed += 1;
        }
        state.total += 1;
    }

    /// Returns the effective sample rate of this limiter, between 0.0 and 1.0.
    pub fn effective_rate(&self) -> f64 {
        let state = self.inner.lock().unwrap();

        match state.prev_window_rate {
            Some(prev_rate) => (current_window_rate(&state) + prev_rate) / 2.0,
            None => current_window_rate(&state),
        }
    }
}

fn current_window_rate(state: &RateLimiterState) -> f64 {
    // No requests have been seen, effectively a 100% allow rate
    if state.total == 0 {
        return 1.0;
    }

    state.allowed as f64 / state.total as f64
}
