// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, sync::Arc};

use dd_tracing::{
    constants::{HIGHER_ORDER_TRACE_ID_BITS_TAG, PROPAGATION_ERROR_TAG_KEY, PROPAGATION_TAG_PREFIX},
    dd_debug,
    sampling::{mechanism, DecisionOrigin, SamplingDecision},
    Config, Result,
};
use dd_tracing_propagation::{
    carrier::Extractor, context::SpanContext, datadog::DATADOG_LAST_PARENT_ID_KEY,
    CompositePropagator, Propagator,
};
use dd_tracing_sampling::{SpanSampler, TraceSampler};

use crate::{
    agent::HttpClient,
    clock::{default_clock, default_span_id_generator, Clock, SpanIdGenerator},
    collector::{AgentCollector, Collector},
    span::{Span, SpanConfig, SpanData, SpanDefaults},
    trace_segment::TraceSegment,
};

/// Entry point of the library: creates root spans, continues extracted
/// traces, and owns the pieces every segment is wired with.
pub struct Tracer {
    config: Arc<Config>,
    collector: Arc<dyn Collector>,
    agent_collector: Option<Arc<AgentCollector>>,
    trace_sampler: TraceSampler,
    span_sampler: SpanSampler,
    propagator: Arc<CompositePropagator>,
    defaults: Arc<SpanDefaults>,
    generate_span_id: SpanIdGenerator,
    clock: Clock,
}

impl Tracer {
    /// Builds a tracer that ships traces through `http_client` to the agent
    /// named by the configuration.
    pub fn new(config: Config, http_client: Arc<dyn HttpClient>) -> Result<Self> {
        let trace_sampler = TraceSampler::new(&config);
        let config = Arc::new(config);
        let agent_collector = Arc::new(AgentCollector::new(
            Arc::clone(&config),
            http_client,
            trace_sampler.service_rates(),
        )?);

        Ok(Self::assemble(
            config,
            Arc::clone(&agent_collector) as Arc<dyn Collector>,
            Some(agent_collector),
            trace_sampler,
            default_clock(),
            default_span_id_generator(),
        ))
    }

    /// Builds a tracer around a custom collector, clock, and id supplier.
    /// This is the constructor tests use to drive the engine
    /// deterministically.
    pub fn with_collector(
        config: Config,
        collector: Arc<dyn Collector>,
        clock: Clock,
        generate_span_id: SpanIdGenerator,
    ) -> Self {
        let trace_sampler = TraceSampler::new(&config);
        Self::assemble(
            Arc::new(config),
            collector,
            None,
            trace_sampler,
            clock,
            generate_span_id,
        )
    }

    fn assemble(
        config: Arc<Config>,
        collector: Arc<dyn Collector>,
        agent_collector: Option<Arc<AgentCollector>>,
        trace_sampler: TraceSampler,
        clock: Clock,
        generate_span_id: SpanIdGenerator,
    ) -> Self {
        let span_sampler = SpanSampler::new(&config);
        let propagator = Arc::new(CompositePropagator::new(&config));
        let defaults = Arc::new(SpanDefaults {
            service: config.service().to_string(),
            service_type: "web".to_string(),
            env: config.env().map(str::to_string),
            version: config.version().map(str::to_string),
            name: String::new(),
            tags: HashMap::new(),
        });

        Tracer {
            config,
            collector,
            agent_collector,
            trace_sampler,
            span_sampler,
            propagator,
            defaults,
            generate_span_id,
            clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts a new local trace and returns its root span.
    pub fn create_span(&self, span_config: SpanConfig) -> Span {
        let mut root = SpanData::with_config(&self.defaults, span_config, &self.clock);
        let id = (self.generate_span_id)();
        root.trace_id = id;
        root.span_id = id;

        self.start_segment(root, None)
    }

    /// Continues the trace described by the carrier, or starts a fresh one
    /// when no configured style can extract a context.
    pub fn extract_or_create_span(&self, reader: &dyn Extractor, span_config: SpanConfig) -> Span {
        let Some(context) = self.propagator.extract(reader, &self.config) else {
            dd_debug!("Tracer: no context in carrier, starting a new trace");
            return self.create_span(span_config);
        };

        let mut root = SpanData::with_config(&self.defaults, span_config, &self.clock);
        root.trace_id = context.trace_id as u64;
        root.parent_id = context.span_id;
        root.span_id = (self.generate_span_id)();

        self.start_segment(root, Some(context))
    }

    /// Flushes and stops the background collector, when this tracer owns
    /// one.
    pub fn shutdown(&self) -> Result<()> {
        match &self.agent_collector {
            Some(collector) => collector.shutdown(),
            None => Ok(()),
        }
    }

    fn start_segment(&self, mut root: SpanData, extracted: Option<SpanContext>) -> Span {
        let trace_id = root.trace_id;
        let span_id = root.span_id;

        let mut trace_tags = HashMap::new();
        let mut origin = None;
        let mut tracestate = None;
        let mut sampling_decision = None;

        if let Some(context) = extracted {
            origin = context.origin;
            tracestate = context.tracestate;

            for (key, value) in &context.tags {
                if key.starts_with(PROPAGATION_TAG_PREFIX) {
                    trace_tags.insert(key.clone(), value.clone());
                }
            }
            let higher_bits = (context.trace_id >> 64) as u64;
            if higher_bits != 0 {
                trace_tags.insert(
                    HIGHER_ORDER_TRACE_ID_BITS_TAG.to_string(),
                    format!("{higher_bits:016x}"),
                );
            }

            // Extraction bookkeeping stays on the local root
            for key in [PROPAGATION_ERROR_TAG_KEY, DATADOG_LAST_PARENT_ID_KEY] {
                if let Some(value) = context.tags.get(key) {
                    root.tags.insert(key.to_string(), value.clone());
                }
            }

            if let Some(priority) = context.sampling.priority {
                sampling_decision = Some(SamplingDecision {
                    priority,
                    mechanism: context.sampling.mechanism.unwrap_or(mechanism::DEFAULT),
                    rate: None,
                    limiter_rate: None,
                    origin: DecisionOrigin::Extracted,
                });
            }

            root.origin = origin.clone();
        }

        let segment = Arc::new(TraceSegment::new(
            Arc::clone(&self.config),
            Arc::clone(&self.collector),
            self.trace_sampler.clone(),
            self.span_sampler.clone(),
            Arc::clone(&self.propagator),
            Arc::clone(&self.defaults),
            origin,
            trace_tags,
            tracestate,
            sampling_decision,
            root,
        ));

        Span::new(
            segment,
            0,
            trace_id,
            span_id,
            Arc::clone(&self.generate_span_id),
            Arc::clone(&self.clock),
        )
    }
}
