// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use dd_tracing::{
    constants::{
        ENV_TAG_KEY, HIGHER_ORDER_TRACE_ID_BITS_TAG, HOSTNAME_TAG_KEY, ORIGIN_TAG_KEY,
        PROPAGATION_ERROR_TAG_KEY, PROPAGATION_TAG_PREFIX, SAMPLING_AGENT_RATE_TAG_KEY,
        SAMPLING_DECISION_MAKER_TAG_KEY, SAMPLING_LIMIT_RATE_TAG_KEY,
        SAMPLING_PRIORITY_METRIC_KEY, SAMPLING_RULE_RATE_TAG_KEY,
        SPAN_SAMPLING_MAX_PER_SECOND_TAG_KEY, SPAN_SAMPLING_MECHANISM_TAG_KEY,
        SPAN_SAMPLING_RULE_RATE_TAG_KEY, VERSION_TAG_KEY,
    },
    dd_debug,
    sampling::{mechanism, DecisionOrigin, SamplingDecision, SamplingPriority},
    Config, Error, Result,
};
use dd_tracing_propagation::{
    carrier::{Extractor, Injector},
    context::{combine_trace_id, Sampling, SpanContext, Tracestate},
    CompositePropagator, Propagator,
};
use dd_tracing_sampling::{SpanSampler, TraceSampler};

use crate::{
    collector::Collector,
    span::{SpanData, SpanDefaults},
};

/// The portion of one trace produced by this process.
///
/// The segment owns every `SpanData`; `Span` handles refer to their data by
/// index. All mutation happens under the segment mutex, and the collector is
/// handed the finished spans outside of it.
pub struct TraceSegment {
    config: Arc<Config>,
    collector: Arc<dyn Collector>,
    trace_sampler: TraceSampler,
    span_sampler: SpanSampler,
    propagator: Arc<CompositePropagator>,
    defaults: Arc<SpanDefaults>,
    origin: Option<String>,
    inner: Mutex<SegmentInner>,
}

struct SegmentInner {
    /// Propagated trace tags; keys all start with `_dd.p.`
    trace_tags: HashMap<String, String>,
    /// Vendor tracestate entries preserved from extraction for re-injection
    extracted_tracestate: Option<Tracestate>,
    spans: Vec<SpanData>,
    num_finished: usize,
    sampling_decision: Option<SamplingDecision>,
}

#[allow(clippy::too_many_arguments)]
impl TraceSegment {
    pub(crate) fn new(
        config: Arc<Config>,
        collector: Arc<dyn Collector>,
        trace_sampler: TraceSampler,
        span_sampler: SpanSampler,
        propagator: Arc<CompositePropagator>,
        defaults: Arc<SpanDefaults>,
        origin: Option<String>,
        trace_tags: HashMap<String, String>,
        extracted_tracestate: Option<Tracestate>,
        sampling_decision: Option<SamplingDecision>,
        local_root: SpanData,
    ) -> Self {
        TraceSegment {
            config,
            collector,
            trace_sampler,
            span_sampler,
            propagator,
            defaults,
            origin,
            inner: Mutex::new(SegmentInner {
                trace_tags,
                extracted_tracestate,
                spans: vec![local_root],
                num_finished: 0,
                sampling_decision,
            }),
        }
    }

    pub fn defaults(&self) -> Arc<SpanDefaults> {
        Arc::clone(&self.defaults)
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.config.hostname()
    }

    pub fn sampling_decision(&self) -> Option<SamplingDecision> {
        self.inner.lock().unwrap().sampling_decision
    }

    /// Read-only access to the registered spans, for tests and diagnostics.
    pub fn visit_spans<T>(&self, visitor: impl FnOnce(&[SpanData]) -> T) -> T {
        let inner = self.inner.lock().unwrap();
        visitor(&inner.spans)
    }

    pub(crate) fn register_span(&self, data: SpanData) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.spans.push(data);
        inner.spans.len() - 1
    }

    pub(crate) fn with_span<T>(&self, index: usize, f: impl FnOnce(&mut SpanData) -> T) -> T {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.spans[index])
    }

    /// Called by a dropping `Span` handle. When the finished count reaches
    /// the registered count the segment completes: a sampling decision is
    /// ensured, rejected traces go through the span sampler, and whatever
    /// survives is handed to the collector.
    pub(crate) fn finish_span(&self, index: usize, end_tick: Instant) {
        let batch = {
            let mut inner = self.inner.lock().unwrap();
            {
                let span = &mut inner.spans[index];
                if span.duration.is_none() {
                    span.duration = Some(end_tick.saturating_duration_since(span.start.tick));
                }
            }
            inner.num_finished += 1;
            if inner.num_finished < inner.spans.len() {
                None
            } else {
                Some(self.finalize(&mut inner))
            }
        };

        // The collector runs outside the segment mutex.
        if let Some(spans) = batch {
            if spans.is_empty() {
                dd_debug!("{}", Error::NoSpansToSubmit);
            } else {
                self.collector.send(spans);
            }
        }
    }

    fn finalize(&self, inner: &mut SegmentInner) -> Vec<SpanData> {
        self.make_sampling_decision_if_none(inner);
        let decision = inner
            .sampling_decision
            .expect("completion always has a sampling decision");

        let mut spans = std::mem::take(&mut inner.spans);
        inner.num_finished = 0;

        let root = &mut spans[0];
        root.numeric_tags.insert(
            SAMPLING_PRIORITY_METRIC_KEY.to_string(),
            decision.priority.into_i8() as f64,
        );
        for (key, value) in inner.trace_tags.iter() {
            root.tags.insert(key.clone(), value.clone());
        }
        if let Some(env) = &self.defaults.env {
            root.tags
                .entry(ENV_TAG_KEY.to_string())
                .or_insert_with(|| env.clone());
        }
        if let Some(version) = &self.defaults.version {
            root.tags
                .entry(VERSION_TAG_KEY.to_string())
                .or_insert_with(|| version.clone());
        }
        if let Some(hostname) = self.config.hostname() {
            root.tags
                .insert(HOSTNAME_TAG_KEY.to_string(), hostname.to_string());
        }

        if let Some(origin) = &self.origin {
            for span in &mut spans {
                span.origin = Some(origin.clone());
                span.tags
                    .insert(ORIGIN_TAG_KEY.to_string(), origin.clone());
            }
        }

        if decision.is_keep() {
            return spans;
        }

        // The trace is dropped; individual spans can still survive through
        // the span sampler.
        let mut kept = Vec::new();
        for mut span in spans {
            let Some(verdict) = self
                .span_sampler
                .sample(span.span_id, &span.service, &span.name)
            else {
                continue;
            };

            span.numeric_tags
                .insert(SPAN_SAMPLING_MECHANISM_TAG_KEY.to_string(), 8.0);
            span.numeric_tags.insert(
                SPAN_SAMPLING_RULE_RATE_TAG_KEY.to_string(),
                verdict.rule_rate,
            );
            if let Some(max_per_second) = verdict.max_per_second {
                span.numeric_tags.insert(
                    SPAN_SAMPLING_MAX_PER_SECOND_TAG_KEY.to_string(),
                    max_per_second,
                );
            }
            kept.push(span);
        }
        kept
    }

    fn make_sampling_decision_if_none(&self, inner: &mut SegmentInner) {
        if inner.sampling_decision.is_some() {
            return;
        }

        let root = &inner.spans[0];
        let decision =
            self.trace_sampler
                .decide(root.trace_id, &root.service, self.config.env(), &root.name);
        self.apply_decision(inner, decision);
    }

    fn apply_decision(&self, inner: &mut SegmentInner, decision: SamplingDecision) {
        let SegmentInner {
            trace_tags,
            spans,
            sampling_decision,
            ..
        } = inner;

        *sampling_decision = Some(decision);

        if decision.priority.is_keep() {
            trace_tags.insert(
                SAMPLING_DECISION_MAKER_TAG_KEY.to_string(),
                decision.mechanism.to_cow().into_owned(),
            );
        } else {
            trace_tags.remove(SAMPLING_DECISION_MAKER_TAG_KEY);
        }

        if decision.origin != DecisionOrigin::Local {
            return;
        }

        let root = &mut spans[0];
        if let Some(rate) = decision.rate {
            let key = match decision.mechanism {
                mechanism::AGENT_RATE_BY_SERVICE => Some(SAMPLING_AGENT_RATE_TAG_KEY),
                mechanism::LOCAL_TRACE_SAMPLING_RULE => Some(SAMPLING_RULE_RATE_TAG_KEY),
                _ => None,
            };
            if let Some(key) = key {
                root.numeric_tags.insert(key.to_string(), rate);
            }
        }
        if let Some(limiter_rate) = decision.limiter_rate {
            root.numeric_tags
                .insert(SAMPLING_LIMIT_RATE_TAG_KEY.to_string(), limiter_rate);
        }
    }

    /// Injects the trace context as seen from `span_index` into the carrier,
    /// in every configured injection style. Forces a sampling decision first
    /// so downstream services inherit a committed verdict.
    pub(crate) fn inject(&self, carrier: &mut dyn Injector, span_index: usize) {
        let mut context = {
            let mut inner = self.inner.lock().unwrap();
            self.make_sampling_decision_if_none(&mut inner);
            let decision = inner
                .sampling_decision
                .expect("injection always has a sampling decision");
            let span = &inner.spans[span_index];

            SpanContext {
                trace_id: combine_trace_id(
                    span.trace_id,
                    inner.trace_tags.get(HIGHER_ORDER_TRACE_ID_BITS_TAG),
                ),
                span_id: span.span_id,
                sampling: Sampling {
                    priority: Some(decision.priority),
                    mechanism: Some(decision.mechanism),
                },
                origin: self.origin.clone(),
                tags: inner.trace_tags.clone(),
                tracestate: inner.extracted_tracestate.clone(),
                style: None,
            }
        };

        self.propagator.inject(&mut context, carrier, &self.config);

        // A style that had to degrade (e.g. an oversized tags header) reports
        // it through the context; keep the explanation on the local root.
        if let Some(error) = context.tags.get(PROPAGATION_ERROR_TAG_KEY) {
            let error = error.clone();
            let mut inner = self.inner.lock().unwrap();
            inner.spans[0]
                .tags
                .insert(PROPAGATION_ERROR_TAG_KEY.to_string(), error);
        }
    }

    /// Absorbs a sampling verdict handed back by a service we delegated the
    /// decision to. Does not re-parent the segment; only the sampling state
    /// and propagated tags are replaced.
    pub fn extract(&self, reader: &dyn Extractor) -> Result<()> {
        let Some(context) = self.propagator.extract(reader, &self.config) else {
            return Err(Error::PropagationMalformed {
                style: "all configured styles".to_string(),
            });
        };

        let mut inner = self.inner.lock().unwrap();

        if inner
            .sampling_decision
            .is_some_and(|decision| decision.is_user())
        {
            // A user's verdict is never displaced by a delegated one
            return Ok(());
        }

        if let Some(priority) = context.sampling.priority {
            inner.sampling_decision = Some(SamplingDecision {
                priority,
                mechanism: context.sampling.mechanism.unwrap_or(mechanism::DEFAULT),
                rate: None,
                limiter_rate: None,
                origin: DecisionOrigin::Delegated,
            });
            for (key, value) in context.tags {
                if key.starts_with(PROPAGATION_TAG_PREFIX) {
                    inner.trace_tags.insert(key, value);
                }
            }
        }

        Ok(())
    }

    /// Pins the sampling verdict to `priority` with the manual mechanism.
    /// The first user-origin decision wins; later overrides with a different
    /// value are no-ops.
    pub fn override_sampling_priority(&self, priority: i8) {
        let priority = SamplingPriority::from_i8(priority);
        let mut inner = self.inner.lock().unwrap();

        match inner.sampling_decision {
            Some(existing) if existing.is_user() && existing.priority != priority => {}
            _ => {
                let decision = SamplingDecision {
                    priority,
                    mechanism: mechanism::MANUAL,
                    rate: None,
                    limiter_rate: None,
                    origin: DecisionOrigin::Local,
                };
                self.apply_decision(&mut inner, decision);
            }
        }
    }
}
