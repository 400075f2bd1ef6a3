// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use dd_tracing::{configuration::TracePropagationStyle, Config};

use crate::{
    b3,
    carrier::{Extractor, Injector},
    context::SpanContext,
    datadog, tracecontext, Propagator,
};

const NONE_KEYS: [String; 0] = [];

impl Propagator for TracePropagationStyle {
    fn extract(&self, carrier: &dyn Extractor, _config: &Config) -> Option<SpanContext> {
        match self {
            Self::Datadog => datadog::extract(carrier),
            Self::TraceContext => tracecontext::extract(carrier),
            Self::B3Multi => b3::multi::extract(carrier),
            Self::B3 => b3::single::extract(carrier),
            _ => None,
        }
    }

    fn inject(&self, context: &mut SpanContext, carrier: &mut dyn Injector, config: &Config) {
        match self {
            Self::Datadog => datadog::inject(context, carrier, config),
            Self::TraceContext => tracecontext::inject(context, carrier, config),
            Self::B3Multi => b3::multi::inject(context, carrier, config),
            Self::B3 => b3::single::inject(context, carrier, config),
            _ => {}
        }
    }

    fn keys(&self) -> &[String] {
        match self {
            Self::Datadog => datadog::keys(),
            Self::TraceContext => tracecontext::keys(),
            Self::B3Multi => b3::multi::keys(),
            Self::B3 => b3::single::keys(),
            _ => &NONE_KEYS,
        }
    }
}
