// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use dd_tracing::{
    dd_error,
    sampling::{mechanism, priority, DecisionOrigin, SamplingDecision},
    Config,
};

use crate::{
    agent_rates::ServiceRates, constants::rate, glob_matcher::GlobMatcher,
    rate_limiter::RateLimiter, rate_sampler::RateSampler,
};

#[derive(Debug, serde::Deserialize)]
struct TraceSamplingRuleConfig {
    sample_rate: f64,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    max_per_second: Option<f64>,
}

/// A head-based sampling rule matched against the local root span.
#[derive(Debug, Clone)]
pub struct TraceSamplingRule {
    /// The sample rate to apply when this rule matches (0.0-1.0)
    pub sample_rate: f64,

    /// Optional glob pattern for the service name
    pub service: Option<String>,

    /// Optional glob pattern for the operation name
    pub name: Option<String>,

    /// Optional per-second cap for traces kept by this rule; the
    /// tracer-wide limit applies when unset
    pub max_per_second: Option<f64>,

    rate_sampler: RateSampler,
    limiter: RateLimiter,
    service_matcher: Option<GlobMatcher>,
    name_matcher: Option<GlobMatcher>,
}

fn build_matcher(pattern: &Option<String>) -> Option<GlobMatcher> {
    pattern
        .as_deref()
        .filter(|pattern| !pattern.is_empty())
        .map(GlobMatcher::new)
}

impl TraceSamplingRule {
    pub fn new(
        sample_rate: f64,
        service: Option<String>,
        name: Option<String>,
        max_per_second: Option<f64>,
        fallback_limit: f64,
    ) -> Self {
        TraceSamplingRule {
            sample_rate,
            service_matcher: build_matcher(&service),
            name_matcher: build_matcher(&name),
            service,
            name,
            max_per_second,
            rate_sampler: RateSampler::new(sample_rate),
            limiter: RateLimiter::new(max_per_second.unwrap_or(fallback_limit)),
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

/// The head-based trace sampler.
///
/// Verdict precedence: the first matching configured rule, then the
/// agent-provided per-service rate. Manual user overrides never reach the
/// sampler; the trace segment honors them before asking.
#[derive(Debug, Default, Clone)]
pub struct TraceSampler {
    rules: std::sync::Arc<Vec<TraceSamplingRule>>,
    service_rates: ServiceRates,
}

impl TraceSampler {
    pub fn new(config: &Config) -> Self {
        let mut rules = Vec::new();
        if let Some(rules_json) = config.trace_sampling_rules() {
            match serde_json::from_str::<Vec<TraceSamplingRuleConfig>>(rules_json) {
                Ok(configs) => {
                    rules = configs
                        .into_iter()
                        .map(|c| {
                            TraceSamplingRule::new(
                                c.sample_rate,
                                c.service,
                                c.name,
                                c.max_per_second,
                                config.trace_rate_limit(),
                            )
                        })
                        .collect();
                }
                Err(e) => {
                    dd_error!("Failed to parse trace sampling rules: {e}");
                }
            }
        }

        Self::from_rules(rules)
    }

    pub fn from_rules(rules: Vec<TraceSamplingRule>) -> Self {
        TraceSampler {
            rules: std::sync::Arc::new(rules),
            service_rates: ServiceRates::default(),
        }
    }

    /// Handle to the agent rate table, shared with the collector so agent
    /// responses refresh future verdicts.
    pub fn service_rates(&self) -> ServiceRates {
        self.service_rates.clone()
    }

    pub fn update_agent_rates<I: IntoIterator<Item = (String, f64)>>(&self, rates: I) {
        self.service_rates.update_rates(rates);
    }

    pub fn decide(
        &self,
        trace_id: u64,
        service: &str,
        env: Option<&str>,
        name: &str,
    ) -> SamplingDecision {
        if let Some(rule) = self.rules.iter().find(|rule| rule.matches(service, name)) {
            let mut limiter_rate = None;

            // Only rate-kept traces count against the limiter budget, so its
            // effective rate reflects the keeps it was actually offered.
            let priority = if !rule.rate_sampler.decide(trace_id) {
                priority::AUTO_REJECT
            } else if rule.limiter.is_allowed() {
                limiter_rate = Some(rule.limiter.effective_rate());
                mechanism::LOCAL_TRACE_SAMPLING_RULE.to_priority(true)
            } else {
                priority::AUTO_REJECT
            };

            return SamplingDecision {
                priority,
                mechanism: mechanism::LOCAL_TRACE_SAMPLING_RULE,
                rate: Some(rule.sample_rate),
                limiter_rate,
                origin: DecisionOrigin::Local,
            };
        }

        let (keep, sample_rate) = match self.service_rates.get(service, env) {
            Some(sampler) => (sampler.decide(trace_id), sampler.sample_rate()),
            None => (true, rate::DEFAULT_SAMPLE_RATE),
        };

        SamplingDecision {
            priority: mechanism::AGENT_RATE_BY_SERVICE.to_priority(keep),
            mechanism: mechanism::AGENT_RATE_BY_SERVICE,
            rate: Some(sample_rate),
            limiter_rate: None,
            origin: DecisionOrigin::Local,
        }
    }
}
