// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub const TRACER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const LANGUAGE: &str = "rust";

/// Tag keys with this prefix are reserved for the library; the user-facing
/// span API silently ignores them.
pub const RESERVED_TAG_PREFIX: &str = "_dd.";

/// Trace tags with this prefix cross service boundaries.
pub const PROPAGATION_TAG_PREFIX: &str = "_dd.p.";

pub const HIGHER_ORDER_TRACE_ID_BITS_TAG: &str = "_dd.p.tid";

pub const SAMPLING_DECISION_MAKER_TAG_KEY: &str = "_dd.p.dm";

pub const SAMPLING_AGENT_RATE_TAG_KEY: &str = "_dd.agent_psr";

pub const SAMPLING_RULE_RATE_TAG_KEY: &str = "_dd.rule_psr";

pub const SAMPLING_LIMIT_RATE_TAG_KEY: &str = "_dd.limit_psr";

pub const PROPAGATION_ERROR_TAG_KEY: &str = "_dd.propagation_error";

pub const SPAN_SAMPLING_MECHANISM_TAG_KEY: &str = "_dd.span_sampling.mechanism";

pub const SPAN_SAMPLING_RULE_RATE_TAG_KEY: &str = "_dd.span_sampling.rule_rate";

pub const SPAN_SAMPLING_MAX_PER_SECOND_TAG_KEY: &str = "_dd.span_sampling.max_per_second";

pub const ERROR_MESSAGE_TAG_KEY: &str = "error.msg";

/// Metric carrying the sampling priority to the agent.
pub const SAMPLING_PRIORITY_METRIC_KEY: &str = "_sampling_priority_v1";

pub const HOSTNAME_TAG_KEY: &str = "_dd.hostname";

pub const ORIGIN_TAG_KEY: &str = "_dd.origin";

pub const ENV_TAG_KEY: &str = "env";

pub const VERSION_TAG_KEY: &str = "version";
