// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! W3C trace context style: `traceparent` carries the ids and the sampled
//! flag, the `dd` member of `tracestate` carries everything Datadog-specific
//! (priority, origin, last parent, propagated tags).

use lazy_static::lazy_static;
use regex::Regex;
use std::{collections::HashMap, str::FromStr};

use crate::{
    carrier::{Extractor, Injector},
    context::{
        adopt_tracestate, encode_tag_value, Sampling, SpanContext, Traceparent, Tracestate,
        PROPAGATION_TAG_PREFIX,
    },
    error::Error,
};

use dd_tracing::{
    configuration::TracePropagationStyle,
    constants::SAMPLING_DECISION_MAKER_TAG_KEY,
    dd_debug, dd_error, dd_warn,
    sampling::{mechanism, priority, SamplingMechanism, SamplingPriority},
    Config,
};

pub const TRACEPARENT_KEY: &str = "traceparent";
pub const TRACESTATE_KEY: &str = "tracestate";

/// The `dd` list member never grows beyond this many bytes.
const DD_LIST_MEMBER_MAX_LENGTH: usize = 256;

/// A tracestate carries at most this many list members in total.
const MAX_LIST_MEMBERS: usize = 32;

lazy_static! {
    // W3C charsets for origin values, tag keys and tag values inside the
    // `dd` list member; anything outside is replaced with `_`.
    static ref ORIGIN_SANITIZER: Regex =
        Regex::new(r"[^\x20-\x2b\x2d-\x3a\x3c-\x7d]").expect("failed creating regex");
    static ref TAG_KEY_SANITIZER: Regex =
        Regex::new(r"[^\x21-\x2b\x2d-\x3c\x3e-\x7e]").expect("failed creating regex");
    static ref TAG_VALUE_SANITIZER: Regex =
        Regex::new(r"[^\x20-\x2b\x2d-\x3a\x3c-\x7d]").expect("failed creating regex");

    static ref TRACECONTEXT_HEADER_KEYS: [String; 2] =
        [TRACEPARENT_KEY.to_owned(), TRACESTATE_KEY.to_owned()];
}

pub fn extract(carrier: &dyn Extractor) -> Option<SpanContext> {
    let header = carrier.get(TRACEPARENT_KEY)?.trim();

    let traceparent = match parse_traceparent(header) {
        Ok(traceparent) => traceparent,
        Err(e) => {
            dd_error!("Propagator (tracecontext): {e}");
            return None;
        }
    };

    let mut context = SpanContext {
        trace_id: traceparent.trace_id,
        span_id: traceparent.span_id,
        sampling: Sampling {
            priority: Some(traceparent.sampling_priority),
            mechanism: None,
        },
        origin: None,
        tags: HashMap::from([(TRACEPARENT_KEY.to_string(), header.to_string())]),
        tracestate: None,
        style: Some(TracePropagationStyle::TraceContext),
    };

    if let Some(raw) = carrier.get(TRACESTATE_KEY) {
        match Tracestate::from_str(raw) {
            Ok(tracestate) => {
                apply_tracestate(&mut context, raw, tracestate, traceparent.sampling_priority)
            }
            Err(_) => dd_debug!("Propagator (tracecontext): discarding unparsable tracestate"),
        }
    }

    Some(context)
}

/// Parses `VV-<32 hex>-<16 hex>-FF[-tail]` field by field. Version `ff` is
/// forbidden; version `00` must have exactly four fields and flags no higher
/// than 2; any other version is parsed best-effort.
fn parse_traceparent(header: &str) -> Result<Traceparent, Error> {
    let mut fields = header.splitn(5, '-');
    let version_field = fields.next().unwrap_or_default();
    let trace_id_field = fields.next().unwrap_or_default();
    let parent_id_field = fields.next().unwrap_or_default();
    let flags_field = fields.next().unwrap_or_default();
    let tail = fields.next();

    let version = hex_field(version_field, 2, "invalid traceparent version")? as u8;
    if version == 0xFF {
        return Err(Error::extract(
            "`ff` is an invalid traceparent version",
            "tracecontext",
        ));
    }

    let trace_id = hex_field(trace_id_field, 32, "malformed trace_id")?;
    if trace_id == 0 {
        return Err(Error::extract(
            "`0` value for trace_id is invalid",
            "tracecontext",
        ));
    }

    let span_id = hex_field(parent_id_field, 16, "malformed parent_id")? as u64;
    if span_id == 0 {
        return Err(Error::extract(
            "`0` value for parent_id is invalid",
            "tracecontext",
        ));
    }

    let flags = hex_field(flags_field, 2, "malformed trace flags")? as u8;

    if version == 0 {
        if tail.is_some_and(|tail| !tail.is_empty()) {
            return Err(Error::extract(
                "a version 00 traceparent has exactly 4 fields",
                "tracecontext",
            ));
        }
        if flags > 2 {
            return Err(Error::extract(
                "invalid trace flags for version 00",
                "tracecontext",
            ));
        }
    } else {
        dd_warn!(
            "Propagator (tracecontext): unknown traceparent version \
             {version:02x}, still attempting to parse"
        );
    }

    let sampling_priority = if flags & 0x1 == 1 {
        priority::AUTO_KEEP
    } else {
        priority::AUTO_REJECT
    };

    Ok(Traceparent {
        sampling_priority,
        trace_id,
        span_id,
    })
}

/// Decodes a fixed-width lowercase hex field.
fn hex_field(field: &str, width: usize, message: &'static str) -> Result<u128, Error> {
    if field.len() != width
        || !field
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return Err(Error::extract(message, "tracecontext"));
    }

    u128::from_str_radix(field, 16).map_err(|_| Error::extract(message, "tracecontext"))
}

/// Folds a parsed tracestate into the extracted context: origin, propagated
/// tags, the last Datadog parent id, and the final sampling verdict.
fn apply_tracestate(
    context: &mut SpanContext,
    raw: &str,
    tracestate: Tracestate,
    traceparent_priority: SamplingPriority,
) {
    adopt_tracestate(context, raw, &tracestate);

    context.origin = tracestate.origin.clone();

    // The dd entry's priority is finer grained than the traceparent's
    // sampled flag; it wins whenever the two agree on keep versus drop.
    // Otherwise some other vendor overrode the decision upstream and the
    // traceparent is the truth, which also invalidates the decision maker.
    let dd_priority = tracestate.sampling.unwrap_or_default().priority;
    let priority = match dd_priority {
        Some(dd_priority) if dd_priority.is_keep() == traceparent_priority.is_keep() => dd_priority,
        _ => {
            if traceparent_priority.is_keep() {
                context.tags.insert(
                    SAMPLING_DECISION_MAKER_TAG_KEY.to_string(),
                    mechanism::DEFAULT.to_cow().into_owned(),
                );
            } else {
                context.tags.remove(SAMPLING_DECISION_MAKER_TAG_KEY);
            }
            traceparent_priority
        }
    };

    context.sampling = Sampling {
        priority: Some(priority),
        mechanism: context
            .tags
            .get(SAMPLING_DECISION_MAKER_TAG_KEY)
            .and_then(|dm| SamplingMechanism::from_str(dm).ok()),
    };

    context.tracestate = Some(tracestate);
}

pub fn inject(context: &mut SpanContext, carrier: &mut dyn Injector, _config: &Config) {
    if context.trace_id == 0 || context.span_id == 0 {
        dd_debug!("Propagator (tracecontext): skipping inject, no context");
        return;
    }

    let sampled = u8::from(context.sampling.priority.is_some_and(|p| p.is_keep()));
    let traceparent = format!(
        "00-{:032x}-{:016x}-{:02x}",
        context.trace_id, context.span_id, sampled
    );
    dd_debug!("Propagator (tracecontext): injecting traceparent: {traceparent}");
    carrier.set(TRACEPARENT_KEY, traceparent);

    let tracestate = render_tracestate(context);
    dd_debug!("Propagator (tracecontext): injecting tracestate: {tracestate}");
    carrier.set(TRACESTATE_KEY, tracestate);
}

fn render_tracestate(context: &SpanContext) -> String {
    let mut rendered = format!("dd={}", render_dd_list_member(context));

    // Vendor entries that came in with an extracted tracestate go back out
    // behind ours, truncated to the list-member cap.
    if let Some(additional) = context
        .tracestate
        .as_ref()
        .and_then(|tracestate| tracestate.additional_values.as_ref())
    {
        for (key, value) in additional.iter().take(MAX_LIST_MEMBERS - 1) {
            rendered.push(',');
            rendered.push_str(key);
            rendered.push('=');
            rendered.push_str(value);
        }
    }

    rendered
}

fn render_dd_list_member(context: &SpanContext) -> String {
    let mut dd = String::new();

    let priority = context.sampling.priority.unwrap_or(priority::AUTO_KEEP);
    push_dd_entry(&mut dd, "s", &priority.to_string());

    if let Some(origin) = &context.origin {
        let origin = encode_tag_value(ORIGIN_SANITIZER.replace_all(origin, "_"));
        push_dd_entry(&mut dd, "o", &origin);
    }

    push_dd_entry(&mut dd, "p", &format!("{:016x}", context.span_id));

    for (key, value) in context
        .tags
        .iter()
        .filter(|(key, _)| key.starts_with(PROPAGATION_TAG_PREFIX))
    {
        let key = format!(
            "t.{}",
            TAG_KEY_SANITIZER.replace_all(&key[PROPAGATION_TAG_PREFIX.len()..], "_")
        );
        let value = encode_tag_value(TAG_VALUE_SANITIZER.replace_all(value, "_"));
        push_dd_entry(&mut dd, &key, &value);
    }

    dd
}

/// Appends `key:value` to the dd list member, unless the member would
/// overflow its byte cap, in which case the entry is dropped.
fn push_dd_entry(dd: &mut String, key: &str, value: &str) {
    let separator = usize::from(!dd.is_empty());
    if dd.len() + separator + key.len() + 1 + value.len() >= DD_LIST_MEMBER_MAX_LENGTH {
        return;
    }

    if separator == 1 {
        dd.push(';');
    }
    dd.push_str(key);
    dd.push(':');
    dd.push_str(value);
}

pub fn keys() -> &'static [String] {
    TRACECONTEXT_HEADER_KEYS.as_slice()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use crate::Propagator;
    use pretty_assertions::assert_eq;

    use super::*;

    const TRACE_ID_HEX: &str = "80f198ee56343ba864fe8b2a57d3eff7";
    const PARENT_ID_HEX: &str = "00f067aa0ba902b7";

    fn extract_from(traceparent: &str, tracestate: Option<&str>) -> Option<SpanContext> {
        let mut carrier = HashMap::from([(TRACEPARENT_KEY.to_string(), traceparent.to_string())]);
        if let Some(tracestate) = tracestate {
            carrier.insert(TRACESTATE_KEY.to_string(), tracestate.to_string());
        }

        TracePropagationStyle::TraceContext.extract(&carrier, &Config::builder().build())
    }

    fn sampled_traceparent() -> String {
        format!("00-{TRACE_ID_HEX}-{PARENT_ID_HEX}-01")
    }

    #[test]
    fn test_extract_ids_and_tracestate_bookkeeping() {
        let context = extract_from(
            &sampled_traceparent(),
            Some("dd=p:00f067aa0ba902b7;s:2;o:rum"),
        )
        .expect("couldn't extract trace context");

        assert_eq!(
            context.trace_id,
            171_395_628_812_617_415_352_188_477_958_425_669_623
        );
        assert_eq!(context.span_id, 67_667_974_448_284_343);
        assert_eq!(context.sampling.priority, Some(priority::USER_KEEP));
        assert_eq!(context.origin, Some("rum".to_string()));
        assert_eq!(context.style, Some(TracePropagationStyle::TraceContext));

        assert_eq!(context.tags[TRACEPARENT_KEY], sampled_traceparent());
        assert_eq!(
            context.tags[TRACESTATE_KEY],
            "dd=p:00f067aa0ba902b7;s:2;o:rum"
        );
        assert_eq!(context.tags["_dd.parent_id"], "00f067aa0ba902b7");
        assert!(context.tracestate.is_some());
    }

    #[test]
    fn test_extract_sampled_flag_alone_decides() {
        let kept = extract_from(&sampled_traceparent(), None).unwrap();
        assert_eq!(kept.sampling.priority, Some(priority::AUTO_KEEP));
        // no tracestate, no decision maker
        assert_eq!(kept.tags.get("_dd.p.dm"), None);

        let dropped =
            extract_from(&format!("00-{TRACE_ID_HEX}-{PARENT_ID_HEX}-00"), None).unwrap();
        assert_eq!(dropped.sampling.priority, Some(priority::AUTO_REJECT));
    }

    #[test]
    fn test_extract_tracestate_priority_wins_on_agreement() {
        let kept = extract_from(&sampled_traceparent(), Some("dd=s:2;o:rum")).unwrap();
        assert_eq!(kept.sampling.priority, Some(priority::USER_KEEP));

        let dropped = extract_from(
            &format!("00-{TRACE_ID_HEX}-{PARENT_ID_HEX}-00"),
            Some("dd=s:-1"),
        )
        .unwrap();
        assert_eq!(dropped.sampling.priority, Some(priority::USER_REJECT));
    }

    #[test]
    fn test_extract_traceparent_wins_on_disagreement() {
        // sampled flag set, tracestate says drop: keep, with the default
        // decision maker
        let kept = extract_from(&sampled_traceparent(), Some("dd=s:-1;o:rum")).unwrap();
        assert_eq!(kept.sampling.priority, Some(priority::AUTO_KEEP));
        assert_eq!(kept.tags["_dd.p.dm"], "-0");

        // sampled flag clear, tracestate says keep: drop, and the stale
        // decision maker is discarded
        let dropped = extract_from(
            &format!("00-{TRACE_ID_HEX}-{PARENT_ID_HEX}-00"),
            Some("dd=s:2;t.dm:-4"),
        )
        .unwrap();
        assert_eq!(dropped.sampling.priority, Some(priority::AUTO_REJECT));
        assert_eq!(dropped.tags.get("_dd.p.dm"), None);
    }

    #[test]
    fn test_extract_missing_tracestate_priority_defaults_decision_maker() {
        let context = extract_from(&sampled_traceparent(), Some("dd=o:rum")).unwrap();

        assert_eq!(context.sampling.priority, Some(priority::AUTO_KEEP));
        assert_eq!(context.tags["_dd.p.dm"], "-0");
    }

    #[test]
    fn test_extract_mechanism_comes_from_t_dm() {
        let context = extract_from(&sampled_traceparent(), Some("dd=s:2;t.dm:-4")).unwrap();

        assert_eq!(context.tags["_dd.p.dm"], "-4");
        assert_eq!(context.sampling.mechanism, Some(mechanism::MANUAL));
    }

    #[test]
    fn test_extract_propagated_tags_are_renamed() {
        let context =
            extract_from(&sampled_traceparent(), Some("dd=s:1;t.usr.id:baz64")).unwrap();

        assert_eq!(context.tags["_dd.p.usr.id"], "baz64");
    }

    #[test]
    fn test_extract_unparsable_tracestate_is_discarded() {
        let context = extract_from(&sampled_traceparent(), Some("no equals sign")).unwrap();

        assert_eq!(context.sampling.priority, Some(priority::AUTO_KEEP));
        assert_eq!(context.origin, None);
        assert_eq!(context.tracestate, None);
        assert!(!context.tags.contains_key(TRACESTATE_KEY));
    }

    #[test]
    fn test_extract_rejects_malformed_traceparents() {
        let malformed = [
            // wrong field widths
            format!("00-abc-{PARENT_ID_HEX}-01"),
            format!("00-{TRACE_ID_HEX}-abc-01"),
            format!("00-{TRACE_ID_HEX}-{PARENT_ID_HEX}-1"),
            // not lowercase hex
            format!("00-{}-{PARENT_ID_HEX}-01", TRACE_ID_HEX.to_uppercase()),
            format!("00-{TRACE_ID_HEX}-{PARENT_ID_HEX}-1x"),
            // zero ids
            format!("00-{}-{PARENT_ID_HEX}-01", "0".repeat(32)),
            format!("00-{TRACE_ID_HEX}-{}-01", "0".repeat(16)),
            // forbidden version
            format!("ff-{TRACE_ID_HEX}-{PARENT_ID_HEX}-01"),
            // version 00 extras
            format!("00-{TRACE_ID_HEX}-{PARENT_ID_HEX}-01-extra"),
            format!("00-{TRACE_ID_HEX}-{PARENT_ID_HEX}-07"),
            // nothing at all
            String::new(),
        ];

        for header in malformed {
            assert!(
                extract_from(&header, None).is_none(),
                "should reject {header:?}"
            );
        }
    }

    #[test]
    fn test_extract_unknown_version_still_parses() {
        let context = extract_from(
            &format!("01-{TRACE_ID_HEX}-{PARENT_ID_HEX}-01-anything"),
            None,
        )
        .expect("unknown versions are parsed best-effort");

        assert_eq!(context.span_id, 67_667_974_448_284_343);
        assert_eq!(context.sampling.priority, Some(priority::AUTO_KEEP));

        // a version 00 trailer is still rejected
        assert!(extract_from(&format!("00-{TRACE_ID_HEX}-{PARENT_ID_HEX}-01-x"), None).is_none());
    }

    fn inject_into_carrier(context: &mut SpanContext) -> HashMap<String, String> {
        let mut carrier: HashMap<String, String> = HashMap::new();
        TracePropagationStyle::TraceContext.inject(
            context,
            &mut carrier,
            &Config::builder().build(),
        );
        carrier
    }

    #[test]
    fn test_inject_renders_and_sanitizes() {
        let mut context = SpanContext {
            trace_id: u128::from_str_radix("1111aaaa2222bbbb3333cccc4444dddd", 16).unwrap(),
            span_id: u64::from_str_radix("5555eeee6666ffff", 16).unwrap(),
            sampling: Sampling {
                priority: Some(priority::USER_KEEP),
                mechanism: Some(mechanism::MANUAL),
            },
            origin: Some("foo,bar=".to_string()),
            tags: HashMap::from([(
                "_dd.p.foo bar,baz=".to_string(),
                "abc~!@#$%^&*()_+`-=".to_string(),
            )]),
            tracestate: Tracestate::from_str("other=bleh,atel=test,dd=s:2;o:foo_bar_;t.dm:-4").ok(),
            style: None,
        };

        let carrier = inject_into_carrier(&mut context);

        assert_eq!(
            carrier[TRACEPARENT_KEY],
            "00-1111aaaa2222bbbb3333cccc4444dddd-5555eeee6666ffff-01"
        );
        assert_eq!(
            carrier[TRACESTATE_KEY],
            "dd=s:2;o:foo_bar~;p:5555eeee6666ffff;t.foo_bar_baz_:abc_!@#$%^&*()_+`-~,other=bleh,atel=test"
        );
    }

    #[test]
    fn test_inject_unsampled_context() {
        let mut context = SpanContext {
            trace_id: 1234,
            span_id: 5678,
            sampling: Sampling {
                priority: Some(priority::USER_REJECT),
                mechanism: None,
            },
            ..Default::default()
        };

        let carrier = inject_into_carrier(&mut context);

        assert_eq!(
            carrier[TRACEPARENT_KEY],
            "00-000000000000000000000000000004d2-000000000000162e-00"
        );
        assert_eq!(carrier[TRACESTATE_KEY], "dd=s:-1;p:000000000000162e");
    }

    #[test]
    fn test_inject_drops_dd_entries_beyond_the_byte_cap() {
        let mut context = SpanContext {
            trace_id: u128::from_str_radix("1111aaaa2222bbbb3333cccc4444dddd", 16).unwrap(),
            span_id: u64::from_str_radix("5555eeee6666ffff", 16).unwrap(),
            sampling: Sampling {
                priority: Some(priority::USER_KEEP),
                mechanism: Some(mechanism::MANUAL),
            },
            origin: Some("abc".repeat(200)),
            tags: HashMap::from([("_dd.p.foo".to_string(), "abc".to_string())]),
            tracestate: None,
            style: None,
        };

        let carrier = inject_into_carrier(&mut context);

        assert_eq!(
            carrier[TRACESTATE_KEY],
            "dd=s:2;p:5555eeee6666ffff;t.foo:abc"
        );
    }

    #[test]
    fn test_inject_caps_vendor_entries_at_32_members() {
        let mut vendors = vec![];
        for index in 0..35 {
            vendors.push(format!("state{index}=value-{index}"));
        }

        let mut context = SpanContext {
            trace_id: u128::from_str_radix("1111aaaa2222bbbb3333cccc4444dddd", 16).unwrap(),
            span_id: u64::from_str_radix("5555eeee6666ffff", 16).unwrap(),
            sampling: Sampling {
                priority: Some(priority::USER_KEEP),
                mechanism: Some(mechanism::MANUAL),
            },
            origin: Some("rum".to_string()),
            tags: HashMap::from([("_dd.p.foo".to_string(), "abc".to_string())]),
            tracestate: Tracestate::from_str(&vendors.join(",")).ok(),
            style: None,
        };

        let carrier = inject_into_carrier(&mut context);

        assert!(carrier[TRACESTATE_KEY]
            .starts_with("dd=s:2;o:rum;p:5555eeee6666ffff;t.foo:abc,state0=value-0"));
        assert!(carrier[TRACESTATE_KEY].ends_with("state30=value-30"));
    }

    #[test]
    fn test_inject_skips_empty_context() {
        let mut context = SpanContext::default();

        let carrier = inject_into_carrier(&mut context);

        assert!(carrier.is_empty());
    }
}
