// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use dd_tracing::{dd_error, Config};

use crate::{glob_matcher::GlobMatcher, rate_limiter::RateLimiter, rate_sampler::RateSampler};

fn default_sample_rate() -> f64 {
    1.0
}

#[derive(Debug, serde::Deserialize)]
struct SpanSamplingRuleConfig {
    #[serde(default = "default_sample_rate")]
    sample_rate: f64,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    max_per_second: Option<f64>,
}

/// A keep rule for individual spans of traces that head-based sampling
/// rejected.
#[derive(Debug, Clone)]
pub struct SpanSamplingRule {
    pub sample_rate: f64,
    pub service: Option<String>,
    pub name: Option<String>,
    pub max_per_second: Option<f64>,

    rate_sampler: RateSampler,
    limiter: Option<RateLimiter>,
    service_matcher: Option<GlobMatcher>,
    name_matcher: Option<GlobMatcher>,
}

fn build_matcher(pattern: &Option<String>) -> Option<GlobMatcher> {
    pattern
        .as_deref()
        .filter(|pattern| !pattern.is_empty())
        .map(GlobMatcher::new)
}

impl SpanSamplingRule {
    pub fn new(
        sample_rate: f64,
        service: Option<String>,
        name: Option<String>,
        max_per_second: Option<f64>,
    ) -> Self {
        SpanSamplingRule {
            sample_rate,
            service_matcher: build_matcher(&service),
            name_matcher: build_matcher(&name),
            service,
            name,
            max_per_second,
            rate_sampler: RateSampler::new(sample_rate),
            limiter: max_per_second.map(RateLimiter::new),
        }
    }

    pub fn matches(&self, service: &str, name: &str) -> bool {
        if let Some(ref matcher) = self.service_matcher {
            if !matcher.matches(service) {
                return false;
            }
        }

        if let Some(ref matcher) = self.name_matcher {
            if !matcher.matches(name) {
                return false;
            }
        }

        true
    }
}

/// The tags a kept span carries to tell the agent why it survived a dropped
/// trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanSamplingVerdict {
    pub rule_rate: f64,
    pub max_per_second: Option<f64>,
}

/// Applies single-span keep rules at span finish time.
///
/// Only consulted when the owning trace was rejected; a kept span is
/// submitted to the agent even though its trace is dropped.
#[derive(Debug, Default, Clone)]
pub struct SpanSampler {
    rules: std::sync::Arc<Vec<SpanSamplingRule>>,
}

impl SpanSampler {
    pub fn new(config: &Config) -> Self {
        let mut rules = Vec::new();
        if let Some(rules_json) = config.span_sampling_rules() {
            match serde_json::from_str::<Vec<SpanSamplingRuleConfig>>(rules_json) {
                Ok(configs) => {
                    rules = configs
                        .into_iter()
                        .map(|c| SpanSamplingRule::new(c.sample_rate, c.service, c.name, c.max_per_second))
                        .collect();
                }
                Err(e) => {
                    dd_error!("Failed to parse span sampling rules: {e}");
                }
            }
        }

        Self::from_rules(rules)
    }

    pub fn from_rules(rules: Vec<SpanSamplingRule>) -> Self {
        SpanSampler {
            rules: std::sync::Arc::new(rules),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the keep verdict for one span, or `None` to let the span drop
    /// with its trace. The first rule whose globs match governs the span.
    pub fn sample(&self, span_id: u64, service: &str, name: &str) -> Option<SpanSamplingVerdict> {
        let rule = self.rules.iter().find(|rule| rule.matches(service, name))?;

        if !rule.rate_sampler.decide(span_id) {
            return None;
        }

        if let Some(ref limiter) = rule.limiter {
            if !limiter.is_allowed() {
                return None;
            }
        }

        Some(SpanSamplingVerdict {
            rule_rate: rule.sample_rate,
            max_per_second: rule.max_per_second,
        })
    }
}
