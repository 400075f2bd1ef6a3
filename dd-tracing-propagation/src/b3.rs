// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use lazy_static::lazy_static;

use dd_tracing::{
    configuration::TracePropagationStyle,
    dd_debug,
    sampling::{priority, SamplingPriority},
    Config,
};

use crate::{
    carrier::{Extractor, Injector},
    context::{split_trace_id, Sampling, SpanContext},
    error::Error,
};

// B3 multi-header keys
const B3_TRACE_ID_KEY: &str = "x-b3-traceid";
const B3_SPAN_ID_KEY: &str = "x-b3-spanid";
const B3_SAMPLED_KEY: &str = "x-b3-sampled";

// B3 single-header key
const B3_SINGLE_KEY: &str = "b3";

lazy_static! {
    static ref B3_MULTI_HEADER_KEYS: [String; 3] = [
        B3_TRACE_ID_KEY.to_owned(),
        B3_SPAN_ID_KEY.to_owned(),
        B3_SAMPLED_KEY.to_owned(),
    ];
    static ref B3_SINGLE_HEADER_KEYS: [String; 1] = [B3_SINGLE_KEY.to_owned()];
}

fn parse_trace_id(value: &str, style_name: &'static str) -> Result<u128, Error> {
    if value.len() != 16 && value.len() != 32 {
        return Err(Error::extract("Invalid `trace_id` length", style_name));
    }

    match u128::from_str_radix(value, 16) {
        Ok(0) => Err(Error::extract("`0` value for trace_id is invalid", style_name)),
        Ok(trace_id) => Ok(trace_id),
        Err(_) => Err(Error::extract("Failed to decode `trace_id`", style_name)),
    }
}

fn parse_span_id(value: &str, style_name: &'static str) -> Result<u64, Error> {
    if value.len() != 16 {
        return Err(Error::extract("Invalid `span_id` length", style_name));
    }

    match u64::from_str_radix(value, 16) {
        Ok(0) => Err(Error::extract("`0` value for span_id is invalid", style_name)),
        Ok(span_id) => Ok(span_id),
        Err(_) => Err(Error::extract("Failed to decode `span_id`", style_name)),
    }
}

fn parse_sampled(value: &str) -> Option<SamplingPriority> {
    match value {
        "1" | "true" => Some(priority::AUTO_KEEP),
        "0" | "false" => Some(priority::AUTO_REJECT),
        // debug flag implies a forced keep
        "d" => Some(priority::USER_KEEP),
        _ => None,
    }
}

fn sampled_flag(sampling: &Sampling) -> &'static str {
    match sampling.priority {
        Some(priority) if !priority.is_keep() => "0",
        _ => "1",
    }
}

fn trace_id_hex(trace_id: u128) -> String {
    let (higher, lower) = split_trace_id(trace_id);
    match higher {
        Some(_) => format!("{trace_id:032x}"),
        None => format!("{lower:016x}"),
    }
}

pub mod multi {
    use super::*;

    pub fn extract(carrier: &dyn Extractor) -> Option<SpanContext> {
        let trace_id = carrier.get(B3_TRACE_ID_KEY)?;
        let trace_id = match parse_trace_id(trace_id.trim(), "b3multi") {
            Ok(trace_id) => trace_id,
            Err(e) => {
                dd_debug!("{e}");
                return None;
            }
        };

        let span_id = match carrier.get(B3_SPAN_ID_KEY) {
            Some(span_id) => match parse_span_id(span_id.trim(), "b3multi") {
                Ok(span_id) => span_id,
                Err(e) => {
                    dd_debug!("{e}");
                    return None;
                }
            },
            None => return None,
        };

        let priority = carrier.get(B3_SAMPLED_KEY).and_then(parse_sampled);

        Some(SpanContext {
            trace_id,
            span_id,
            sampling: Sampling {
                priority,
                mechanism: None,
            },
            origin: None,
            tags: Default::default(),
            tracestate: None,
            style: Some(TracePropagationStyle::B3Multi),
        })
    }

    pub fn inject(context: &mut SpanContext, carrier: &mut dyn Injector, _config: &Config) {
        if context.trace_id == 0 || context.span_id == 0 {
            dd_debug!("Propagator (b3multi): skipping inject, no context");
            return;
        }

        carrier.set(B3_TRACE_ID_KEY, trace_id_hex(context.trace_id));
        carrier.set(B3_SPAN_ID_KEY, format!("{:016x}", context.span_id));
        carrier.set(B3_SAMPLED_KEY, sampled_flag(&context.sampling).to_string());
    }

    pub fn keys() -> &'static [String] {
        B3_MULTI_HEADER_KEYS.as_slice()
    }
}

pub mod single {
    use super::*;

    pub fn extract(carrier: &dyn Extractor) -> Option<SpanContext> {
        let header = carrier.get(B3_SINGLE_KEY)?.trim();

        let mut parts = header.split('-');

        let trace_id = match parse_trace_id(parts.next().unwrap_or_default(), "b3") {
            Ok(trace_id) => trace_id,
            Err(e) => {
                dd_debug!("{e}");
                return None;
            }
        };

        let span_id = match parts.next() {
            Some(span_id) => match parse_span_id(span_id, "b3") {
                Ok(span_id) => span_id,
                Err(e) => {
                    dd_debug!("{e}");
                    return None;
                }
            },
            None => return None,
        };

        let priority = parts.next().and_then(parse_sampled);

        Some(SpanContext {
            trace_id,
            span_id,
            sampling: Sampling {
                priority,
                mechanism: None,
            },
            origin: None,
            tags: Default::default(),
            tracestate: None,
            style: Some(TracePropagationStyle::B3),
        })
    }

    pub fn inject(context: &mut SpanContext, carrier: &mut dyn Injector, _config: &Config) {
        if context.trace_id == 0 || context.span_id == 0 {
            dd_debug!("Propagator (b3): skipping inject, no context");
            return;
        }

        carrier.set(
            B3_SINGLE_KEY,
            format!(
                "{}-{:016x}-{}",
                trace_id_hex(context.trace_id),
                context.span_id,
                sampled_flag(&context.sampling)
            ),
        );
    }

    pub fn keys() -> &'static [String] {
        B3_SINGLE_HEADER_KEYS.as_slice()
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use crate::Propagator;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_extract_b3_multi() {
        let headers = HashMap::from([
            (
                "x-b3-traceid".to_string(),
                "80f198ee56343ba864fe8b2a57d3eff7".to_string(),
            ),
            ("x-b3-spanid".to_string(), "00f067aa0ba902b7".to_string()),
            ("x-b3-sampled".to_string(), "1".to_string()),
        ]);

        let context = TracePropagationStyle::B3Multi
            .extract(&headers, &Config::builder().build())
            .expect("couldn't extract trace context");

        assert_eq!(
            context.trace_id,
            171_395_628_812_617_415_352_188_477_958_425_669_623
        );
        assert_eq!(context.span_id, 67_667_974_448_284_343);
        assert_eq!(context.sampling.priority, Some(priority::AUTO_KEEP));
        assert_eq!(context.style, Some(TracePropagationStyle::B3Multi));
    }

    #[test]
    fn test_extract_b3_multi_64bit_not_sampled() {
        let headers = HashMap::from([
            ("x-b3-traceid".to_string(), "64fe8b2a57d3eff7".to_string()),
            ("x-b3-spanid".to_string(), "00f067aa0ba902b7".to_string()),
            ("x-b3-sampled".to_string(), "0".to_string()),
        ]);

        let context = TracePropagationStyle::B3Multi
            .extract(&headers, &Config::builder().build())
            .expect("couldn't extract trace context");

        assert_eq!(context.trace_id, 0x64fe_8b2a_57d3_eff7);
        assert_eq!(context.sampling.priority, Some(priority::AUTO_REJECT));
    }

    #[test]
    fn test_extract_b3_multi_rejects_malformed_ids() {
        let zero = HashMap::from([
            (
                "x-b3-traceid".to_string(),
                "00000000000000000000000000000000".to_string(),
            ),
            ("x-b3-spanid".to_string(), "00f067aa0ba902b7".to_string()),
        ]);
        assert!(TracePropagationStyle::B3Multi
            .extract(&zero, &Config::builder().build())
            .is_none());

        let bad_length = HashMap::from([
            ("x-b3-traceid".to_string(), "abc".to_string()),
            ("x-b3-spanid".to_string(), "00f067aa0ba902b7".to_string()),
        ]);
        assert!(TracePropagationStyle::B3Multi
            .extract(&bad_length, &Config::builder().build())
            .is_none());

        let missing_span = HashMap::from([(
            "x-b3-traceid".to_string(),
            "80f198ee56343ba864fe8b2a57d3eff7".to_string(),
        )]);
        assert!(TracePropagationStyle::B3Multi
            .extract(&missing_span, &Config::builder().build())
            .is_none());
    }

    #[test]
    fn test_inject_b3_multi() {
        let mut context = SpanContext {
            trace_id: 1234,
            span_id: 5678,
            sampling: Sampling {
                priority: Some(priority::USER_REJECT),
                mechanism: None,
            },
            ..Default::default()
        };

        let mut carrier = HashMap::new();
        TracePropagationStyle::B3Multi.inject(
            &mut context,
            &mut carrier,
            &Config::builder().build(),
        );

        assert_eq!(carrier["x-b3-traceid"], "00000000000004d2");
        assert_eq!(carrier["x-b3-spanid"], "000000000000162e");
        assert_eq!(carrier["x-b3-sampled"], "0");
    }

    #[test]
    fn test_extract_b3_single() {
        let headers = HashMap::from([(
            "b3".to_string(),
            "80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7-1".to_string(),
        )]);

        let context = TracePropagationStyle::B3
            .extract(&headers, &Config::builder().build())
            .expect("couldn't extract trace context");

        assert_eq!(
            context.trace_id,
            171_395_628_812_617_415_352_188_477_958_425_669_623
        );
        assert_eq!(context.span_id, 67_667_974_448_284_343);
        assert_eq!(context.sampling.priority, Some(priority::AUTO_KEEP));
        assert_eq!(context.style, Some(TracePropagationStyle::B3));
    }

    #[test]
    fn test_extract_b3_single_without_sampling() {
        let headers = HashMap::from([(
            "b3".to_string(),
            "64fe8b2a57d3eff7-00f067aa0ba902b7".to_string(),
        )]);

        let context = TracePropagationStyle::B3
            .extract(&headers, &Config::builder().build())
            .expect("couldn't extract trace context");

        assert_eq!(context.sampling.priority, None);
    }

    #[test]
    fn test_extract_b3_single_debug_flag() {
        let headers = HashMap::from([(
            "b3".to_string(),
            "64fe8b2a57d3eff7-00f067aa0ba902b7-d".to_string(),
        )]);

        let context = TracePropagationStyle::B3
            .extract(&headers, &Config::builder().build())
            .expect("couldn't extract trace context");

        assert_eq!(context.sampling.priority, Some(priority::USER_KEEP));
    }

    #[test]
    fn test_extract_b3_single_malformed() {
        for header in ["garbage", "abc-def", "64fe8b2a57d3eff7", ""] {
            let headers = HashMap::from([("b3".to_string(), header.to_string())]);
            assert!(
                TracePropagationStyle::B3
                    .extract(&headers, &Config::builder().build())
                    .is_none(),
                "should reject {header:?}"
            );
        }
    }

    #[test]
    fn test_inject_b3_single_roundtrip() {
        let mut context = SpanContext {
            trace_id: (0x80f1_98ee_5634_3ba8_u128 << 64) | 0x64fe_8b2a_57d3_eff7,
            span_id: 0x00f0_67aa_0ba9_02b7,
            sampling: Sampling {
                priority: Some(priority::AUTO_KEEP),
                mechanism: None,
            },
            ..Default::default()
        };

        let mut carrier = HashMap::new();
        TracePropagationStyle::B3.inject(&mut context, &mut carrier, &Config::builder().build());

        assert_eq!(
            carrier["b3"],
            "80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7-1"
        );

        let roundtrip = TracePropagationStyle::B3
            .extract(&carrier, &Config::builder().build())
            .expect("couldn't extract injected context");
        assert_eq!(roundtrip.trace_id, context.trace_id);
        assert_eq!(roundtrip.span_id, context.span_id);
        assert_eq!(roundtrip.sampling.priority, Some(priority::AUTO_KEEP));
    }
}
