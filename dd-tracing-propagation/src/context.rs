// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use lazy_static::lazy_static;
use regex::Regex;
use std::{borrow::Cow, collections::HashMap, str::FromStr};

use dd_tracing::{
    configuration::TracePropagationStyle,
    dd_debug,
    sampling::{SamplingMechanism, SamplingPriority},
};

use crate::tracecontext::TRACESTATE_KEY;

lazy_static! {
    static ref INVALID_ASCII_CHARACTERS_REGEX: Regex =
        Regex::new(r"[^\x20-\x7E]+").expect("failed creating regex");
}

pub use dd_tracing::constants::PROPAGATION_TAG_PREFIX;

#[derive(Copy, Clone, Default, Debug, PartialEq)]
pub struct Sampling {
    pub priority: Option<SamplingPriority>,
    pub mechanism: Option<SamplingMechanism>,
}

/// Trace context carried through one or more wire styles.
///
/// Extraction fills `style` with the style that produced the context;
/// injection reads every field and leaves `style` alone.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct SpanContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub sampling: Sampling,
    pub origin: Option<String>,
    /// Propagated tags (`_dd.p.*`) plus bookkeeping entries such as the raw
    /// `traceparent`/`tracestate` values and `_dd.parent_id`.
    pub tags: HashMap<String, String>,
    pub tracestate: Option<Tracestate>,
    pub style: Option<TracePropagationStyle>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Traceparent {
    pub sampling_priority: SamplingPriority,
    pub trace_id: u128,
    pub span_id: u64,
}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct Tracestate {
    pub sampling: Option<Sampling>,
    pub origin: Option<String>,
    pub last_parent_id: Option<String>,
    pub propagation_tags: Option<HashMap<String, String>>,
    pub additional_values: Option<Vec<(String, String)>>,
}

impl Tracestate {
    fn valid_key(key: &str) -> bool {
        if key.len() > 256 {
            return false;
        }

        let allowed_special = |b: u8| (b == b'_' || b == b'-' || b == b'*' || b == b'/');
        let mut vendor_start = None;
        for (i, &b) in key.as_bytes().iter().enumerate() {
            if !(b.is_ascii_lowercase() || b.is_ascii_digit() || allowed_special(b) || b == b'@') {
                return false;
            }

            if i == 0 && (!b.is_ascii_lowercase() && !b.is_ascii_digit()) {
                return false;
            } else if b == b'@' {
                if vendor_start.is_some() || i + 14 < key.len() {
                    return false;
                }
                vendor_start = Some(i);
            } else if let Some(start) = vendor_start {
                if i == start + 1 && !(b.is_ascii_lowercase() || b.is_ascii_digit()) {
                    return false;
                }
            }
        }

        true
    }

    fn valid_value(value: &str) -> bool {
        if value.len() > 256 {
            return false;
        }

        !(value.contains(',') || value.contains('='))
    }
}

impl FromStr for Tracestate {
    type Err = String;

    fn from_str(tracestate: &str) -> Result<Self, Self::Err> {
        if tracestate.is_empty() {
            return Err(String::from("Empty tracestate"));
        }

        let mut dd: Option<HashMap<String, String>> = None;
        let mut additional_values = vec![];

        for entry in tracestate.split(',') {
            let mut parts = entry.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();

            if !Tracestate::valid_key(key) || value.is_empty() || !Tracestate::valid_value(value) {
                dd_debug!("Received invalid tracestate key or header value: {entry}");
                return Err(String::from("Invalid tracestate"));
            }

            if key == "dd" {
                dd = Some(
                    value
                        .trim()
                        .split(';')
                        .filter_map(|item| {
                            if INVALID_ASCII_CHARACTERS_REGEX.is_match(item) {
                                None
                            } else {
                                let mut parts = item.splitn(2, ':');
                                Some((parts.next()?.to_string(), decode_tag_value(parts.next()?)))
                            }
                        })
                        .collect(),
                );
            } else {
                additional_values.push((key.to_string(), value.to_string()));
            }
        }

        let mut tracestate = Tracestate::default();

        // the original order must be maintained
        if !additional_values.is_empty() {
            tracestate.additional_values = Some(additional_values);
        }

        let Some(dd) = dd else {
            dd_debug!("No `dd` value found in tracestate");
            return Ok(tracestate);
        };

        let mut tags = HashMap::new();
        let mut priority = None;
        let mut mechanism = None;

        for (k, v) in dd {
            match k.as_str() {
                "s" => {
                    if let Ok(p_sp) = SamplingPriority::from_str(&v) {
                        priority = Some(p_sp);
                    }
                }
                "o" => tracestate.origin = Some(v),
                "p" => tracestate.last_parent_id = Some(v),
                "t.dm" => {
                    if let Ok(p_sm) = SamplingMechanism::from_str(&v) {
                        mechanism = Some(p_sm);
                    }
                    tags.insert(k, v);
                }
                _ => {
                    tags.insert(k, v);
                }
            }
        }

        tracestate.sampling = Some(Sampling {
            priority,
            mechanism,
        });
        tracestate.propagation_tags = Some(tags);

        Ok(tracestate)
    }
}

fn decode_tag_value(value: &str) -> String {
    value.replace('~', "=")
}

pub fn encode_tag_value(value: Cow<'_, str>) -> String {
    value.replace('=', "~")
}

pub fn split_trace_id(trace_id: u128) -> (Option<u64>, u64) {
    let lower = trace_id as u64;

    let higher = (trace_id >> 64) as u64;
    let higher = if higher > 0 { Some(higher) } else { None };

    (higher, lower)
}

pub fn combine_trace_id(trace_id: u64, higher_bits_hex: Option<&String>) -> u128 {
    higher_bits_hex
        .and_then(|higher| u64::from_str_radix(higher, 16).ok())
        .map(|higher| ((higher as u128) << 64) + (trace_id as u128))
        .unwrap_or(trace_id as u128)
}

/// Moves the tracestate bookkeeping that was parsed for `context` into its
/// tag map, under the Datadog tag names.
pub fn adopt_tracestate(context: &mut SpanContext, raw: &str, tracestate: &Tracestate) {
    context
        .tags
        .insert(TRACESTATE_KEY.to_string(), raw.to_string());

    if let Some(propagation_tags) = &tracestate.propagation_tags {
        for (k, v) in propagation_tags {
            if let Some(stripped) = k.strip_prefix("t.") {
                context
                    .tags
                    .insert(format!("{PROPAGATION_TAG_PREFIX}{stripped}"), v.clone());
            }
        }
    }

    if let Some(ref lpid) = tracestate.last_parent_id {
        context
            .tags
            .insert(crate::datadog::DATADOG_LAST_PARENT_ID_KEY.to_string(), lpid.clone());
    }
}
