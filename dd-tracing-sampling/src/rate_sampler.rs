// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::constants::{numeric, rate};
use numeric::{KNUTH_FACTOR, MAX_UINT_64BITS};

/// Keeps (100 * `sample_rate`)% of the traces, deterministically.
///
/// The verdict is a pure function of the trace id: the id is multiplied by
/// the Knuth factor (mod 2^64) and kept when the product is below
/// `sample_rate * 2^64`. Every tracer implementation that agrees on the
/// factor reaches the same verdict, which keeps cross-service decisions
/// correlated.
#[derive(Clone)]
pub struct RateSampler {
    sample_rate: f64,
    sampling_id_threshold: u64,
}

impl fmt::Debug for RateSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateSampler")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl RateSampler {
    fn calculate_threshold(rate: f64) -> u64 {
        if rate >= rate::MAX_SAMPLE_RATE {
            MAX_UINT_64BITS
        } else {
            (rate * (MAX_UINT_64BITS as f64)) as u64
        }
    }

    /// `sample_rate` is clamped between 0.0 and 1.0 inclusive.
    pub fn new(sample_rate: f64) -> Self {
        let clamped_rate = sample_rate.clamp(rate::MIN_SAMPLE_RATE, rate::MAX_SAMPLE_RATE);

        RateSampler {
            sample_rate: clamped_rate,
            sampling_id_threshold: Self::calculate_threshold(clamped_rate),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Returns the keep/drop verdict for the given trace (or span) id.
    pub fn decide(&self, id: u64) -> bool {
        if self.sample_rate <= rate::MIN_SAMPLE_RATE {
            return false;
        }
        if self.sample_rate >= rate::MAX_SAMPLE_RATE {
            return true;
        }

        id.wrapping_mul(KNUTH_FACTOR) < self.sampling_id_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_sampler_new() {
        let sampler_zero = RateSampler::new(0.0);
        assert_eq!(sampler_zero.sample_rate, 0.0);
        assert_eq!(sampler_zero.sampling_id_threshold, 0);

        let sampler_half = RateSampler::new(0.5);
        assert_eq!(sampler_half.sample_rate, 0.5);
        assert_eq!(
            sampler_half.sampling_id_threshold,
            (0.5 * (MAX_UINT_64BITS as f64)) as u64
        );

        let sampler_one = RateSampler::new(1.0);
        assert_eq!(sampler_one.sampling_id_threshold, MAX_UINT_64BITS);

        // Boundary handling
        assert_eq!(RateSampler::new(-0.1).sample_rate, 0.0);
        assert_eq!(RateSampler::new(1.1).sample_rate, 1.0);
    }

    #[test]
    fn test_rate_sampler_extremes() {
        let sampler_zero = RateSampler::new(0.0);
        let sampler_one = RateSampler::new(1.0);

        for id in [0, 1, 42, u64::MAX] {
            assert!(!sampler_zero.decide(id), "rate 0.0 must drop id {id}");
            assert!(sampler_one.decide(id), "rate 1.0 must keep id {id}");
        }
    }

    #[test]
    fn test_rate_sampler_deterministic_verdicts() {
        let sampler_half = RateSampler::new(0.5);
        let threshold = sampler_half.sampling_id_threshold;

        // 1 hashes to exactly the Knuth factor, which is below the 0.5
        // threshold
        assert!(KNUTH_FACTOR < threshold);
        assert!(sampler_half.decide(1));

        // An id engineered to hash above the threshold
        let dropped_id = 0xFFFF_0000_0000_0000_u64;
        assert!(dropped_id.wrapping_mul(KNUTH_FACTOR) >= threshold);
        assert!(!sampler_half.decide(dropped_id));

        // The verdict never changes for the same id
        for _ in 0..10 {
            assert!(sampler_half.decide(1));
            assert!(!sampler_half.decide(dropped_id));
        }
    }

    #[test]
    fn test_rate_sampler_keep_fraction_tracks_rate() {
        // A pseudo-random walk over trace ids should be kept in proportion
        // to the configured rate.
        for rate in [0.1, 0.25, 0.5, 0.9] {
            let sampler = RateSampler::new(rate);

            let mut kept = 0u64;
            let total = 100_000u64;
            let mut id = 0x9e37_79b9_7f4a_7c15_u64;
            for _ in 0..total {
                id = id.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                if sampler.decide(id) {
                    kept += 1;
                }
            }

            let fraction = kept as f64 / total as f64;
            assert!(
                (fraction - rate).abs() < 0.01,
                "rate {rate}: kept fraction {fraction}"
            );
        }
    }
}
