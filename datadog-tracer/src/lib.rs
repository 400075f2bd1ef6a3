// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process tracing engine compatible with the Datadog Agent.
//!
//! An application builds a [`Tracer`], starts a root [`Span`] per request,
//! tags it, creates children, and lets the handles drop. When the last span
//! of a trace segment finishes, the segment commits a sampling decision and
//! hands the finished spans to a background collector, which serializes them
//! as MessagePack and `PUT`s them to the local agent.

pub mod agent;
pub mod clock;
pub mod collector;
pub mod msgpack;
pub mod span;
pub mod trace_segment;
mod tracer;

pub use agent::{AgentUrl, HttpClient, HttpResponse};
pub use clock::{default_clock, default_span_id_generator, Clock, SpanIdGenerator, TimePoint};
pub use collector::{AgentCollector, Collector};
pub use dd_tracing::{
    configuration::{ConfigBuilder, TracePropagationStyle},
    Config, Error, Result,
};
pub use span::{Span, SpanConfig, SpanData, SpanDefaults};
pub use trace_segment::TraceSegment;
pub use tracer::Tracer;
