// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::Arc,
    time::{Instant, SystemTime},
};

use rand::Rng;

/// A wall-clock reading paired with the monotonic tick taken at the same
/// moment. Span start times are reported from `wall`; durations are measured
/// between ticks so they cannot go negative when the system clock steps.
#[derive(Debug, Clone, Copy)]
pub struct TimePoint {
    pub wall: SystemTime,
    pub tick: Instant,
}

/// Supplier of the current time, injected at tracer construction so tests
/// can drive it deterministically.
pub type Clock = Arc<dyn Fn() -> TimePoint + Send + Sync>;

pub fn default_clock() -> Clock {
    Arc::new(|| TimePoint {
        wall: SystemTime::now(),
        tick: Instant::now(),
    })
}

/// Supplier of fresh 64-bit span ids.
pub type SpanIdGenerator = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Random nonzero span ids. Zero is reserved for "no parent" on the wire.
pub fn default_span_id_generator() -> SpanIdGenerator {
    Arc::new(|| loop {
        let id: u64 = rand::rng().random();
        if id != 0 {
            return id;
        }
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// A clock that starts at the UNIX epoch plus one hour and advances by a
    /// fixed step on every reading.
    pub fn stepping_clock(step: Duration) -> Clock {
        let origin_wall = SystemTime::UNIX_EPOCH + Duration::from_secs(3600);
        let origin_tick = Instant::now();
        let readings = AtomicU64::new(0);
        Arc::new(move || {
            let n = readings.fetch_add(1, Ordering::Relaxed);
            let elapsed = step * n as u32;
            TimePoint {
                wall: origin_wall + elapsed,
                tick: origin_tick + elapsed,
            }
        })
    }

    /// Span ids 1, 2, 3, ...
    pub fn sequential_ids() -> SpanIdGenerator {
        let next = AtomicU64::new(1);
        Arc::new(move || next.fetch_add(1, Ordering::Relaxed))
    }
}
