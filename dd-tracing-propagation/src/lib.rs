// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use carrier::{Extractor, Injector};
use context::{adopt_tracestate, SpanContext};
use dd_tracing::{
    configuration::TracePropagationStyle, constants::PROPAGATION_ERROR_TAG_KEY, dd_debug, Config,
};
use tracecontext::TRACESTATE_KEY;

pub mod b3;
pub mod carrier;
pub mod context;
pub mod datadog;
mod error;
pub mod trace_propagation_style;
pub mod tracecontext;

pub use error::Error;

/// Value of `_dd.propagation_error` when two styles disagreed on the trace id
/// and the loser was discarded.
pub const TERMINATED_CONTEXT_ERROR: &str = "terminated_context";

pub trait Propagator {
    fn extract(&self, carrier: &dyn Extractor, config: &Config) -> Option<SpanContext>;
    fn inject(&self, context: &mut SpanContext, carrier: &mut dyn Injector, config: &Config);
    fn keys(&self) -> &[String];
}

/// Applies every configured style: extraction takes the first style that
/// yields a context and reconciles the rest against it; injection writes all
/// of them.
#[derive(Debug)]
pub struct CompositePropagator {
    extractors: Vec<TracePropagationStyle>,
    injectors: Vec<TracePropagationStyle>,
    keys: Vec<String>,
}

impl Propagator for CompositePropagator {
    fn extract(&self, carrier: &dyn Extractor, config: &Config) -> Option<SpanContext> {
        let contexts = self.extract_available_contexts(carrier, config);
        if contexts.is_empty() {
            return None;
        }

        Some(Self::resolve_contexts(contexts))
    }

    fn inject(&self, context: &mut SpanContext, carrier: &mut dyn Injector, config: &Config) {
        self.injectors
            .iter()
            .for_each(|style| style.inject(context, carrier, config));
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl CompositePropagator {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let extractors: Vec<TracePropagationStyle> = config
            .trace_propagation_style_extract()
            .iter()
            .filter(|style| **style != TracePropagationStyle::None)
            .copied()
            .collect();

        let injectors: Vec<TracePropagationStyle> = config
            .trace_propagation_style_inject()
            .iter()
            .filter(|style| **style != TracePropagationStyle::None)
            .copied()
            .collect();

        let keys = extractors.iter().fold(Vec::new(), |mut keys, extractor| {
            extractor
                .keys()
                .iter()
                .for_each(|key| keys.push(key.clone()));
            keys
        });

        Self {
            extractors,
            injectors,
            keys,
        }
    }

    fn extract_available_contexts(
        &self,
        carrier: &dyn Extractor,
        config: &Config,
    ) -> Vec<SpanContext> {
        let mut contexts = vec![];

        for style in self.extractors.iter() {
            if let Some(context) = style.extract(carrier, config) {
                dd_debug!("Propagator ({style}): context extracted");
                contexts.push(context);
            }
        }

        contexts
    }

    /// The first extracted context wins. Later contexts either corroborate it
    /// (matching trace id, possibly contributing tracestate) or terminate
    /// against it, which is recorded as `_dd.propagation_error`.
    fn resolve_contexts(contexts: Vec<SpanContext>) -> SpanContext {
        let mut primary = contexts[0].clone();

        for context in contexts.iter().skip(1) {
            if context.span_id != 0
                && context.trace_id != 0
                && context.trace_id != primary.trace_id
            {
                primary.tags.insert(
                    PROPAGATION_ERROR_TAG_KEY.to_string(),
                    TERMINATED_CONTEXT_ERROR.to_string(),
                );
            } else if context.style == Some(TracePropagationStyle::TraceContext) {
                if let (Some(raw), Some(tracestate)) =
                    (context.tags.get(TRACESTATE_KEY), context.tracestate.as_ref())
                {
                    adopt_tracestate(&mut primary, raw, tracestate);
                    primary.tracestate = context.tracestate.clone();
                }

                // W3C knows the most recent parent for this trace
                if primary.trace_id == context.trace_id && primary.span_id != context.span_id {
                    primary.tags.insert(
                        datadog::DATADOG_LAST_PARENT_ID_KEY.to_string(),
                        format!("{:016x}", primary.span_id),
                    );
                    primary.span_id = context.span_id;
                }
            }
        }

        primary
    }
}
