// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The native Datadog header style: decimal ids in `x-datadog-*` headers,
//! with the propagated `_dd.p.*` tags riding in `x-datadog-tags`.

use std::collections::HashMap;

use lazy_static::lazy_static;

use dd_tracing::{
    configuration::TracePropagationStyle,
    constants::{HIGHER_ORDER_TRACE_ID_BITS_TAG, PROPAGATION_ERROR_TAG_KEY},
    dd_debug, dd_warn,
    sampling::{priority, SamplingPriority},
    Config,
};

use crate::{
    carrier::{Extractor, Injector},
    context::{combine_trace_id, split_trace_id, Sampling, SpanContext, PROPAGATION_TAG_PREFIX},
};

// Datadog Keys
const DATADOG_TRACE_ID_KEY: &str = "x-datadog-trace-id";
const DATADOG_PARENT_ID_KEY: &str = "x-datadog-parent-id";
const DATADOG_SAMPLING_PRIORITY_KEY: &str = "x-datadog-sampling-priority";
const DATADOG_ORIGIN_KEY: &str = "x-datadog-origin";
const DATADOG_TAGS_KEY: &str = "x-datadog-tags";
pub const DATADOG_LAST_PARENT_ID_KEY: &str = "_dd.parent_id";
const DATADOG_SAMPLING_DECISION_KEY: &str = "_dd.p.dm";

/// Value of `_dd.propagation_error` when the serialized tags header would
/// blow the configured size budget.
pub const INJECT_MAX_SIZE_ERROR: &str = "inject_max_size";

lazy_static! {
    static ref DATADOG_HEADER_KEYS: [String; 5] = [
        DATADOG_TRACE_ID_KEY.to_owned(),
        DATADOG_ORIGIN_KEY.to_owned(),
        DATADOG_PARENT_ID_KEY.to_owned(),
        DATADOG_SAMPLING_PRIORITY_KEY.to_owned(),
        DATADOG_TAGS_KEY.to_owned(),
    ];
}

pub fn extract(carrier: &dyn Extractor) -> Option<SpanContext> {
    let lower_trace_id = match carrier.get(DATADOG_TRACE_ID_KEY)?.parse::<u64>() {
        Ok(0) | Err(_) => {
            dd_debug!("Propagator (datadog): invalid x-datadog-trace-id");
            return None;
        }
        Ok(trace_id) => trace_id,
    };

    // A missing or garbled parent id is tolerated; 0 means "no parent"
    let parent_id = carrier
        .get(DATADOG_PARENT_ID_KEY)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);

    // An absent priority means an upstream user forced the trace through
    let sampling_priority = match carrier.get(DATADOG_SAMPLING_PRIORITY_KEY) {
        None => priority::USER_KEEP,
        Some(value) => match value.parse::<i8>() {
            Ok(value) => SamplingPriority::from_i8(value),
            Err(_) => {
                dd_debug!("Propagator (datadog): invalid x-datadog-sampling-priority");
                return None;
            }
        },
    };

    let origin = carrier.get(DATADOG_ORIGIN_KEY).map(str::to_string);
    let tags = propagation_tags(carrier.get(DATADOG_TAGS_KEY).unwrap_or_default());

    let trace_id = combine_trace_id(lower_trace_id, tags.get(HIGHER_ORDER_TRACE_ID_BITS_TAG));

    Some(SpanContext {
        trace_id,
        span_id: parent_id,
        sampling: Sampling {
            priority: Some(sampling_priority),
            mechanism: None,
        },
        origin,
        tags,
        tracestate: None,
        style: Some(TracePropagationStyle::Datadog),
    })
}

/// Picks the `_dd.p.*` pairs out of an `x-datadog-tags` header and repairs
/// the entries the rest of extraction depends on.
fn propagation_tags(header: &str) -> HashMap<String, String> {
    let mut tags: HashMap<String, String> = header
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| key.starts_with(PROPAGATION_TAG_PREFIX))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

    // A tid that does not decode would corrupt the reconstructed 128-bit
    // trace id; drop it and leave the reason behind
    let malformed_tid = tags
        .get(HIGHER_ORDER_TRACE_ID_BITS_TAG)
        .filter(|tid| tid.len() != 16 || u64::from_str_radix(tid, 16).is_err())
        .cloned();
    if let Some(tid) = malformed_tid {
        dd_warn!("Propagator (datadog): malformed _dd.p.tid: {tid}");
        tags.remove(HIGHER_ORDER_TRACE_ID_BITS_TAG);
        tags.insert(
            PROPAGATION_ERROR_TAG_KEY.to_string(),
            format!("malformed_tid {tid}"),
        );
    }

    if tags
        .get(DATADOG_SAMPLING_DECISION_KEY)
        .is_some_and(|value| !valid_decision_maker(value))
    {
        dd_warn!("Propagator (datadog): failed to decode _dd.p.dm");
        tags.remove(DATADOG_SAMPLING_DECISION_KEY);
        tags.insert(
            PROPAGATION_ERROR_TAG_KEY.to_string(),
            "decoding_error".to_string(),
        );
    } else if !tags.contains_key(DATADOG_SAMPLING_DECISION_KEY) {
        // Older peers omit the decision maker; a trace that reached us was
        // kept by a rule somewhere upstream
        tags.insert(DATADOG_SAMPLING_DECISION_KEY.to_string(), "-3".to_string());
    }

    tags
}

/// `_dd.p.dm` is a dash followed by the mechanism number.
fn valid_decision_maker(value: &str) -> bool {
    value
        .strip_prefix('-')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

pub fn inject(context: &mut SpanContext, carrier: &mut dyn Injector, config: &Config) {
    if context.trace_id == 0 || context.span_id == 0 {
        dd_debug!("Propagator (datadog): skipping inject, no context");
        return;
    }

    let (higher, lower) = split_trace_id(context.trace_id);

    carrier.set(DATADOG_TRACE_ID_KEY, lower.to_string());
    carrier.set(DATADOG_PARENT_ID_KEY, context.span_id.to_string());

    let priority = context
        .sampling
        .priority
        .unwrap_or(priority::AUTO_KEEP);
    carrier.set(DATADOG_SAMPLING_PRIORITY_KEY, priority.to_string());

    if let Some(origin) = &context.origin {
        carrier.set(DATADOG_ORIGIN_KEY, origin.clone());
    }

    if let Some(higher) = higher {
        context.tags.insert(
            HIGHER_ORDER_TRACE_ID_BITS_TAG.to_string(),
            format!("{higher:016x}"),
        );
    }

    let header = context
        .tags
        .iter()
        .filter(|(k, _)| k.starts_with(PROPAGATION_TAG_PREFIX))
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");

    if header.is_empty() {
        return;
    }

    if header.len() > config.tags_header_max_size() {
        dd_warn!(
            "Propagator (datadog): serialized x-datadog-tags exceeds the {} byte budget, \
             dropping the header",
            config.tags_header_max_size()
        );
        context.tags.insert(
            PROPAGATION_ERROR_TAG_KEY.to_string(),
            INJECT_MAX_SIZE_ERROR.to_string(),
        );
        return;
    }

    carrier.set(DATADOG_TAGS_KEY, header);
}

pub fn keys() -> &'static [String] {
    DATADOG_HEADER_KEYS.as_slice()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use crate::{context::split_trace_id, Propagator};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_extract_datadog_propagator() {
        let headers = HashMap::from([
            ("x-datadog-trace-id".to_string(), "1234".to_string()),
            ("x-datadog-parent-id".to_string(), "5678".to_string()),
            ("x-datadog-sampling-priority".to_string(), "1".to_string()),
            ("x-datadog-origin".to_string(), "synthetics".to_string()),
            (
                "x-datadog-tags".to_string(),
                "_dd.p.test=value,_dd.p.tid=0000000000004321,any=tag".to_string(),
            ),
        ]);

        let propagator = TracePropagationStyle::Datadog;

        let context = propagator
            .extract(&headers, &Config::builder().build())
            .expect("couldn't extract trace context");

        assert_eq!(context.trace_id, 317_007_296_906_698_644_522_194);
        assert_eq!(context.span_id, 5678);
        assert_eq!(context.sampling.priority.map(|p| p.into_i8()), Some(1));
        assert_eq!(context.origin, Some("synthetics".to_string()));
        assert_eq!(context.tags.get("_dd.p.test").unwrap(), "value");
        assert_eq!(context.tags.get("_dd.p.tid").unwrap(), "0000000000004321");
        assert_eq!(context.tags.get("_dd.p.dm").unwrap(), "-3");
        assert_eq!(context.style, Some(TracePropagationStyle::Datadog));

        let (higher, lower) = split_trace_id(context.trace_id);
        assert_eq!(higher, u64::from_str_radix("0000000000004321", 16).ok());
        assert_eq!(lower, 1234);
    }

    #[test]
    fn test_extract_datadog_propagator_defaults() {
        let headers = HashMap::from([("x-datadog-trace-id".to_string(), "1234".to_string())]);

        let context = TracePropagationStyle::Datadog
            .extract(&headers, &Config::builder().build())
            .expect("couldn't extract trace context");

        assert_eq!(context.trace_id, 1234);
        assert_eq!(context.span_id, 0, "missing parent id means no parent");
        // a trace propagated without a priority was forced through upstream
        assert_eq!(context.sampling.priority, Some(priority::USER_KEEP));
        assert_eq!(context.origin, None);
        assert_eq!(context.tags.get("_dd.p.dm").unwrap(), "-3");
    }

    #[test]
    fn test_extract_datadog_propagator_with_malformed_tid() {
        let headers = HashMap::from([
            ("x-datadog-trace-id".to_string(), "1234".to_string()),
            ("x-datadog-parent-id".to_string(), "5678".to_string()),
            ("x-datadog-sampling-priority".to_string(), "1".to_string()),
            (
                "x-datadog-tags".to_string(),
                "_dd.p.test=value,_dd.p.tid=4321,any=tag".to_string(),
            ),
        ]);

        let context = TracePropagationStyle::Datadog
            .extract(&headers, &Config::builder().build())
            .expect("couldn't extract trace context");

        assert_eq!(context.trace_id, 1234);
        assert_eq!(context.tags.get("_dd.p.tid"), None);
        assert_eq!(
            context.tags.get("_dd.propagation_error").unwrap(),
            "malformed_tid 4321"
        );
    }

    #[test]
    fn test_extract_datadog_propagator_invalid_dm() {
        let headers = HashMap::from([
            ("x-datadog-trace-id".to_string(), "1234".to_string()),
            ("x-datadog-parent-id".to_string(), "5678".to_string()),
            (
                "x-datadog-tags".to_string(),
                "_dd.p.dm=keep".to_string(),
            ),
        ]);

        let context = TracePropagationStyle::Datadog
            .extract(&headers, &Config::builder().build())
            .expect("couldn't extract trace context");

        assert_eq!(context.tags.get("_dd.p.dm"), None);
        assert_eq!(
            context.tags.get("_dd.propagation_error").unwrap(),
            "decoding_error"
        );
    }

    #[test]
    fn test_extract_datadog_propagator_rejects_bad_trace_ids() {
        for trace_id in ["000", "-1", "not a number", "18446744073709551616"] {
            let headers = HashMap::from([
                ("x-datadog-trace-id".to_string(), trace_id.to_string()),
                ("x-datadog-parent-id".to_string(), "5678".to_string()),
            ]);

            assert!(
                TracePropagationStyle::Datadog
                    .extract(&headers, &Config::builder().build())
                    .is_none(),
                "should reject trace id {trace_id:?}"
            );
        }
    }

    #[test]
    fn test_extract_datadog_propagator_malformed_priority() {
        let headers = HashMap::from([
            ("x-datadog-trace-id".to_string(), "1234".to_string()),
            ("x-datadog-parent-id".to_string(), "5678".to_string()),
            ("x-datadog-sampling-priority".to_string(), "sample".to_string()),
        ]);

        assert!(TracePropagationStyle::Datadog
            .extract(&headers, &Config::builder().build())
            .is_none());
    }

    #[test]
    fn test_decision_maker_validation() {
        assert!(valid_decision_maker("-0"));
        assert!(valid_decision_maker("-3"));
        assert!(valid_decision_maker("-11"));
        assert!(!valid_decision_maker("3"));
        assert!(!valid_decision_maker("-"));
        assert!(!valid_decision_maker("-x"));
        assert!(!valid_decision_maker(""));
    }

    #[test]
    fn test_inject_datadog_propagator() {
        let mut context = SpanContext {
            trace_id: 1234,
            span_id: 5678,
            sampling: Sampling {
                priority: Some(priority::AUTO_KEEP),
                mechanism: None,
            },
            origin: Some("synthetics".to_string()),
            tags: HashMap::from([("_dd.p.dm".to_string(), "-3".to_string())]),
            tracestate: None,
            style: None,
        };

        let mut carrier = HashMap::new();
        TracePropagationStyle::Datadog.inject(
            &mut context,
            &mut carrier,
            &Config::builder().build(),
        );

        assert_eq!(carrier["x-datadog-trace-id"], "1234");
        assert_eq!(carrier["x-datadog-parent-id"], "5678");
        assert_eq!(carrier["x-datadog-sampling-priority"], "1");
        assert_eq!(carrier["x-datadog-origin"], "synthetics");
        assert_eq!(carrier["x-datadog-tags"], "_dd.p.dm=-3");
    }

    #[test]
    fn test_inject_datadog_propagator_128bit_adds_tid() {
        let mut context = SpanContext {
            trace_id: (0x80f1_98ee_5634_3ba8_u128 << 64) | 1234,
            span_id: 5678,
            sampling: Sampling {
                priority: Some(priority::AUTO_KEEP),
                mechanism: None,
            },
            origin: None,
            tags: HashMap::new(),
            tracestate: None,
            style: None,
        };

        let mut carrier = HashMap::new();
        TracePropagationStyle::Datadog.inject(
            &mut context,
            &mut carrier,
            &Config::builder().build(),
        );

        assert_eq!(carrier["x-datadog-trace-id"], "1234");
        assert_eq!(carrier["x-datadog-tags"], "_dd.p.tid=80f198ee56343ba8");
    }

    #[test]
    fn test_inject_datadog_propagator_oversized_tags_are_elided() {
        let mut context = SpanContext {
            trace_id: 1234,
            span_id: 5678,
            sampling: Sampling {
                priority: Some(priority::AUTO_KEEP),
                mechanism: None,
            },
            origin: None,
            tags: HashMap::from([
                ("_dd.p.tid".to_string(), "abc".to_string()),
                ("_dd.p.dm".to_string(), "-3".to_string()),
                ("_dd.p.keep".to_string(), "1".to_string()),
            ]),
            tracestate: None,
            style: None,
        };

        let mut config = Config::builder();
        config.set_tags_header_max_size(32);

        let mut carrier = HashMap::new();
        TracePropagationStyle::Datadog.inject(&mut context, &mut carrier, &config.build());

        assert!(!carrier.contains_key("x-datadog-tags"));
        assert_eq!(
            context.tags.get("_dd.propagation_error").unwrap(),
            INJECT_MAX_SIZE_ERROR
        );
        // the rest of the context still goes out
        assert_eq!(carrier["x-datadog-trace-id"], "1234");
    }
}
