// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::rate_sampler::RateSampler;

/// Body of the agent's response to a trace submission.
#[derive(Debug, serde::Deserialize)]
pub struct AgentRatesResponse {
    #[serde(default)]
    pub rate_by_service: Option<HashMap<String, f64>>,
}

/// Builds the lookup key the agent uses in `rate_by_service`.
pub fn service_key(service: &str, env: Option<&str>) -> String {
    format!("service:{},env:{}", service, env.unwrap_or_default())
}

/// Per-service sample rates pushed down by the agent.
///
/// The table is an immutable snapshot behind an `RwLock`; readers clone the
/// `Arc` and keep sampling from their snapshot while an update swaps in a new
/// one.
#[derive(Debug, Default, Clone)]
pub struct ServiceRates {
    inner: Arc<RwLock<Arc<HashMap<String, RateSampler>>>>,
}

impl ServiceRates {
    pub fn get(&self, service: &str, env: Option<&str>) -> Option<RateSampler> {
        self.snapshot().get(&service_key(service, env)).cloned()
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, RateSampler>> {
        self.inner.read().unwrap().clone()
    }

    pub fn update_rates<I: IntoIterator<Item = (String, f64)>>(&self, rates: I) {
        let new_rates: Arc<HashMap<_, _>> = Arc::new(
            rates
                .into_iter()
                .map(|(s, r)| (s, RateSampler::new(r)))
                .collect(),
        );
        *self.inner.write().unwrap() = new_rates;
    }

    // used for testing purposes

    #[allow(dead_code)]
    pub(crate) fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }
}
