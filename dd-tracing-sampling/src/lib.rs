// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod agent_rates;
pub(crate) mod constants;
pub(crate) mod glob_matcher;
pub(crate) mod rate_limiter;
pub(crate) mod rate_sampler;
pub(crate) mod span_sampler;
pub(crate) mod trace_sampler;

// Re-export key public types
pub use agent_rates::{AgentRatesResponse, ServiceRates};
pub use glob_matcher::GlobMatcher;
pub use rate_limiter::RateLimiter;
pub use rate_sampler::RateSampler;
pub use span_sampler::{SpanSampler, SpanSamplingRule, SpanSamplingVerdict};
pub use trace_sampler::{TraceSampler, TraceSamplingRule};
