// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{borrow::Cow, fmt, str::FromStr, time::Duration};

use crate::log::LevelFilter;

/// A wire style used to carry trace context across service boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TracePropagationStyle {
    Datadog,
    TraceContext,
    B3Multi,
    B3,
    None,
}

impl fmt::Display for TracePropagationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let style = match self {
            TracePropagationStyle::Datadog => "datadog",
            TracePropagationStyle::TraceContext => "tracecontext",
            TracePropagationStyle::B3Multi => "b3multi",
            TracePropagationStyle::B3 => "b3",
            TracePropagationStyle::None => "none",
        };

        write!(f, "{style}")
    }
}

impl FromStr for TracePropagationStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "datadog" => Ok(TracePropagationStyle::Datadog),
            "tracecontext" => Ok(TracePropagationStyle::TraceContext),
            "b3multi" => Ok(TracePropagationStyle::B3Multi),
            "b3" | "b3 single header" => Ok(TracePropagationStyle::B3),
            "none" => Ok(TracePropagationStyle::None),
            _ => Err(format!("Unknown trace propagation style: {s}")),
        }
    }
}

const DEFAULT_SERVICE: &str = "unnamed-rust-service";
const DEFAULT_AGENT_URL: &str = "http://localhost:8126";

/// Size budget for the serialized `x-datadog-tags` header.
const DEFAULT_TAGS_HEADER_MAX_SIZE: usize = 512;

/// Configuration for the tracer.
///
/// Configuration is programmatic; ingesting environment variables or files is
/// the embedding application's concern.
///
/// # Usage
/// ```
/// use dd_tracing::Config;
///
/// let mut builder = Config::builder();
///
/// builder
///     .set_service("my-service".to_string())
///     .set_version("1.0.0".to_string());
///
/// let config = builder.build();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    // # Service tagging
    service: String,
    env: Option<String>,
    version: Option<String>,

    // # Agent
    /// url of the trace agent
    agent_url: Cow<'static, str>,
    /// Hostname reported on every local root span, when set
    hostname: Option<String>,
    /// Container id forwarded to the agent on every payload, when set
    container_id: Option<String>,

    // # Propagation
    trace_propagation_style_extract: Vec<TracePropagationStyle>,
    trace_propagation_style_inject: Vec<TracePropagationStyle>,
    tags_header_max_size: usize,

    // # Sampling
    /// JSON configuration string for trace sampling rules
    trace_sampling_rules: Option<String>,
    /// JSON configuration string for single-span sampling rules
    span_sampling_rules: Option<String>,
    /// Maximum number of rule-sampled traces per second, per process
    trace_rate_limit: f64,

    // # Collector
    flush_interval: Duration,
    /// Serialized payload bytes that force a flush before the interval
    flush_byte_budget: usize,
    /// Queued trace batches beyond this count evict the oldest batch
    max_queued_traces: usize,
    shutdown_timeout: Duration,

    /// The log level for the tracer
    log_level: LevelFilter,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn env(&self) -> Option<&str> {
        self.env.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn agent_url(&self) -> &str {
        &self.agent_url
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn trace_propagation_style_extract(&self) -> &[TracePropagationStyle] {
        &self.trace_propagation_style_extract
    }

    pub fn trace_propagation_style_inject(&self) -> &[TracePropagationStyle] {
        &self.trace_propagation_style_inject
    }

    pub fn tags_header_max_size(&self) -> usize {
        self.tags_header_max_size
    }

    pub fn trace_sampling_rules(&self) -> Option<&str> {
        self.trace_sampling_rules.as_deref()
    }

    pub fn span_sampling_rules(&self) -> Option<&str> {
        self.span_sampling_rules.as_deref()
    }

    pub fn trace_rate_limit(&self) -> f64 {
        self.trace_rate_limit
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn flush_byte_budget(&self) -> usize {
        self.flush_byte_budget
    }

    pub fn max_queued_traces(&self) -> usize {
        self.max_queued_traces
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            env: None,
            version: None,
            agent_url: Cow::Borrowed(DEFAULT_AGENT_URL),
            hostname: None,
            container_id: None,
            trace_propagation_style_extract: vec![
                TracePropagationStyle::Datadog,
                TracePropagationStyle::TraceContext,
            ],
            trace_propagation_style_inject: vec![
                TracePropagationStyle::Datadog,
                TracePropagationStyle::TraceContext,
            ],
            tags_header_max_size: DEFAULT_TAGS_HEADER_MAX_SIZE,
            trace_sampling_rules: None,
            span_sampling_rules: None,
            trace_rate_limit: 100.0,
            flush_interval: Duration::from_secs(2),
            flush_byte_budget: 2 * 1024 * 1024,
            max_queued_traces: 1024,
            shutdown_timeout: Duration::from_secs(1),
            log_level: LevelFilter::Error,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn set_service(&mut self, service: String) -> &mut Self {
        self.config.service = service;
        self
    }

    pub fn set_env(&mut self, env: String) -> &mut Self {
        self.config.env = Some(env);
        self
    }

    pub fn set_version(&mut self, version: String) -> &mut Self {
        self.config.version = Some(version);
        self
    }

    pub fn set_agent_url(&mut self, url: String) -> &mut Self {
        self.config.agent_url = Cow::Owned(url);
        self
    }

    pub fn set_hostname(&mut self, hostname: String) -> &mut Self {
        self.config.hostname = Some(hostname);
        self
    }

    pub fn set_container_id(&mut self, container_id: String) -> &mut Self {
        self.config.container_id = Some(container_id);
        self
    }

    pub fn set_trace_propagation_style_extract(
        &mut self,
        styles: Vec<TracePropagationStyle>,
    ) -> &mut Self {
        self.config.trace_propagation_style_extract = styles;
        self
    }

    pub fn set_trace_propagation_style_inject(
        &mut self,
        styles: Vec<TracePropagationStyle>,
    ) -> &mut Self {
        self.config.trace_propagation_style_inject = styles;
        self
    }

    pub fn set_tags_header_max_size(&mut self, max_size: usize) -> &mut Self {
        self.config.tags_header_max_size = max_size;
        self
    }

    pub fn set_trace_sampling_rules(&mut self, rules_json: String) -> &mut Self {
        self.config.trace_sampling_rules = Some(rules_json);
        self
    }

    pub fn set_span_sampling_rules(&mut self, rules_json: String) -> &mut Self {
        self.config.span_sampling_rules = Some(rules_json);
        self
    }

    pub fn set_trace_rate_limit(&mut self, max_per_second: f64) -> &mut Self {
        self.config.trace_rate_limit = max_per_second;
        self
    }

    pub fn set_flush_interval(&mut self, interval: Duration) -> &mut Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn set_flush_byte_budget(&mut self, bytes: usize) -> &mut Self {
        self.config.flush_byte_budget = bytes;
        self
    }

    pub fn set_max_queued_traces(&mut self, max: usize) -> &mut Self {
        self.config.max_queued_traces = max;
        self
    }

    pub fn set_shutdown_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn set_log_level(&mut self, level: LevelFilter) -> &mut Self {
        self.config.log_level = level;
        self
    }

    pub fn build(&mut self) -> Config {
        crate::log::set_max_level(self.config.log_level);
        self.config.clone()
    }
}
