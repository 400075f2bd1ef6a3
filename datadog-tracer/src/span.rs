// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, sync::Arc, time::Duration, time::Instant};

use dd_tracing::constants::{ERROR_MESSAGE_TAG_KEY, RESERVED_TAG_PREFIX};
use dd_tracing_propagation::carrier::Injector;

use crate::{
    clock::{Clock, SpanIdGenerator, TimePoint},
    trace_segment::TraceSegment,
};

fn is_reserved_tag(name: &str) -> bool {
    name.starts_with(RESERVED_TAG_PREFIX)
}

/// One timed operation. Owned by the trace segment; mutated only through the
/// owning [`Span`] handle.
#[derive(Debug, Clone)]
pub struct SpanData {
    pub trace_id: u64,
    pub span_id: u64,
    /// 0 when this span is the root of the trace
    pub parent_id: u64,
    pub service: String,
    pub service_type: String,
    pub name: String,
    pub resource: String,
    pub origin: Option<String>,
    pub start: TimePoint,
    /// Set exactly once, when the span finishes
    pub duration: Option<Duration>,
    pub error: bool,
    pub tags: HashMap<String, String>,
    pub numeric_tags: HashMap<String, f64>,
}

impl SpanData {
    pub(crate) fn with_config(defaults: &SpanDefaults, config: SpanConfig, clock: &Clock) -> Self {
        let name = config.name.unwrap_or_else(|| defaults.name.clone());
        let resource = config.resource.unwrap_or_else(|| name.clone());
        let mut tags = defaults.tags.clone();
        tags.extend(config.tags);

        SpanData {
            trace_id: 0,
            span_id: 0,
            parent_id: 0,
            service: config.service.unwrap_or_else(|| defaults.service.clone()),
            service_type: config
                .service_type
                .unwrap_or_else(|| defaults.service_type.clone()),
            name,
            resource,
            origin: None,
            start: config.start.unwrap_or_else(|| clock()),
            duration: None,
            error: false,
            tags,
            numeric_tags: HashMap::new(),
        }
    }
}

/// Values merged into every span the tracer creates.
#[derive(Debug, Clone, Default)]
pub struct SpanDefaults {
    pub service: String,
    pub service_type: String,
    pub env: Option<String>,
    pub version: Option<String>,
    pub name: String,
    pub tags: HashMap<String, String>,
}

/// Per-span overrides applied on top of the tracer defaults.
#[derive(Debug, Clone, Default)]
pub struct SpanConfig {
    pub name: Option<String>,
    pub service: Option<String>,
    pub service_type: Option<String>,
    pub resource: Option<String>,
    pub tags: HashMap<String, String>,
    pub start: Option<TimePoint>,
}

impl SpanConfig {
    pub fn with_name(name: impl Into<String>) -> Self {
        SpanConfig {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Handle to one span inside a trace segment.
///
/// The handle is movable but not clonable; dropping it finishes the span,
/// which may complete the whole segment and hand it to the collector. The
/// segment outlives the handle through the shared `Arc`, so a handle can
/// never dangle.
pub struct Span {
    segment: Arc<TraceSegment>,
    index: usize,
    trace_id: u64,
    span_id: u64,
    generate_span_id: SpanIdGenerator,
    clock: Clock,
    end_time: Option<Instant>,
}

impl Span {
    pub(crate) fn new(
        segment: Arc<TraceSegment>,
        index: usize,
        trace_id: u64,
        span_id: u64,
        generate_span_id: SpanIdGenerator,
        clock: Clock,
    ) -> Self {
        Span {
            segment,
            index,
            trace_id,
            span_id,
            generate_span_id,
            clock,
            end_time: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.span_id
    }

    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    pub fn trace_segment(&self) -> &Arc<TraceSegment> {
        &self.segment
    }

    /// Starts a new span whose parent is this one.
    pub fn create_child(&self, config: SpanConfig) -> Span {
        let mut data = SpanData::with_config(&self.segment.defaults(), config, &self.clock);
        data.trace_id = self.trace_id;
        data.parent_id = self.span_id;
        data.span_id = (self.generate_span_id)();

        let span_id = data.span_id;
        let index = self.segment.register_span(data);

        Span::new(
            Arc::clone(&self.segment),
            index,
            self.trace_id,
            span_id,
            Arc::clone(&self.generate_span_id),
            Arc::clone(&self.clock),
        )
    }

    /// Writes this span's trace context into the carrier using every
    /// configured injection style.
    pub fn inject(&self, carrier: &mut dyn Injector) {
        self.segment.inject(carrier, self.index);
    }

    pub fn lookup_tag(&self, name: &str) -> Option<String> {
        if is_reserved_tag(name) {
            return None;
        }
        self.segment
            .with_span(self.index, |data| data.tags.get(name).cloned())
    }

    pub fn set_tag(&self, name: &str, value: impl Into<String>) {
        if is_reserved_tag(name) {
            return;
        }
        let value = value.into();
        self.segment.with_span(self.index, |data| {
            data.tags.insert(name.to_string(), value);
        })
    }

    pub fn remove_tag(&self, name: &str) {
        if is_reserved_tag(name) {
            return;
        }
        self.segment.with_span(self.index, |data| {
            data.tags.remove(name);
        })
    }

    /// Marks or clears the error flag. Clearing also removes the error
    /// message tag.
    pub fn set_error(&self, is_error: bool) {
        self.segment.with_span(self.index, |data| {
            data.error = is_error;
            if !is_error {
                data.tags.remove(ERROR_MESSAGE_TAG_KEY);
            }
        })
    }

    pub fn set_error_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.segment.with_span(self.index, |data| {
            data.error = true;
            data.tags.insert(ERROR_MESSAGE_TAG_KEY.to_string(), message);
        })
    }

    pub fn set_service_name(&self, service: impl Into<String>) {
        let service = service.into();
        self.segment
            .with_span(self.index, |data| data.service = service)
    }

    pub fn set_service_type(&self, service_type: impl Into<String>) {
        let service_type = service_type.into();
        self.segment
            .with_span(self.index, |data| data.service_type = service_type)
    }

    pub fn set_resource_name(&self, resource: impl Into<String>) {
        let resource = resource.into();
        self.segment
            .with_span(self.index, |data| data.resource = resource)
    }

    pub fn set_operation_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.segment.with_span(self.index, |data| data.name = name)
    }

    /// Overrides the finish time that will be used when the handle drops.
    pub fn set_end_time(&mut self, end_time: Instant) {
        self.end_time = Some(end_time);
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        let end_tick = self.end_time.unwrap_or_else(|| (self.clock)().tick);
        self.segment.finish_span(self.index, end_tick);
    }
}
