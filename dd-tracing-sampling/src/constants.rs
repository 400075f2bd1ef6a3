// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared constants for the dd-tracing-sampling crate

/// Sampling rate limits
pub mod rate {
    /// Rate applied when neither rules nor the agent provide one
    pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;
    /// Maximum sampling rate
    pub const MAX_SAMPLE_RATE: f64 = 1.0;
    /// Minimum sampling rate
    pub const MIN_SAMPLE_RATE: f64 = 0.0;
}

/// Numeric constants used in sampling algorithms
pub mod numeric {
    /// Knuth's multiplicative hash factor for deterministic sampling.
    /// The factor is fixed by the wire protocol so that independent
    /// implementations reach the same verdict for the same trace id.
    pub const KNUTH_FACTOR: u64 = 1_111_111_111_111_111_111;
    /// Maximum 64-bit unsigned integer value
    pub const MAX_UINT_64BITS: u64 = u64::MAX;
}
