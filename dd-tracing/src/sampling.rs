// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{borrow::Cow, fmt, str::FromStr};

/// Where a trace segment's sampling decision came from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOrigin {
    /// Decided in this process.
    #[default]
    Local,
    /// Inherited from an upstream service through extraction.
    Extracted,
    /// Handed back by a downstream service that we delegated to.
    Delegated,
}

/// The verdict assigned to a trace segment, set at most once per segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDecision {
    pub priority: SamplingPriority,
    pub mechanism: SamplingMechanism,
    /// The sample rate that produced the verdict, when rate-based.
    pub rate: Option<f64>,
    /// The limiter's effective rate, when a rule's limiter was consulted.
    pub limiter_rate: Option<f64>,
    pub origin: DecisionOrigin,
}

impl SamplingDecision {
    pub fn is_keep(&self) -> bool {
        self.priority.is_keep()
    }

    /// Whether the decision carries user intent and must not revert to an
    /// automatic one.
    pub fn is_user(&self) -> bool {
        self.mechanism == mechanism::MANUAL
            || self.priority == priority::USER_KEEP
            || self.priority == priority::USER_REJECT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplingPriority {
    value: i8,
}

impl SamplingPriority {
    pub const fn from_i8(value: i8) -> Self {
        Self { value }
    }

    pub fn into_i8(self) -> i8 {
        self.value
    }

    pub fn is_keep(&self) -> bool {
        self.value > 0
    }
}

pub mod priority {
    use super::SamplingPriority;

    pub const USER_REJECT: SamplingPriority = SamplingPriority::from_i8(-1);
    pub const AUTO_REJECT: SamplingPriority = SamplingPriority::from_i8(0);
    pub const AUTO_KEEP: SamplingPriority = SamplingPriority::from_i8(1);
    pub const USER_KEEP: SamplingPriority = SamplingPriority::from_i8(2);
}

impl fmt::Display for SamplingPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for SamplingPriority {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<i8>() {
            Ok(value) => Ok(SamplingPriority::from_i8(value)),
            Err(_) => Err(()),
        }
    }
}

/// The reason a sampling decision was made, carried in `_dd.p.dm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplingMechanism {
    value: u8,
}

impl SamplingMechanism {
    pub const fn from_u8(value: u8) -> Self {
        Self { value }
    }

    pub fn into_u8(self) -> u8 {
        self.value
    }

    /// Maps a keep/reject outcome onto the priority pair this mechanism
    /// uses. User-intent mechanisms map to the user priorities.
    pub fn to_priority(&self, is_keep: bool) -> SamplingPriority {
        let user = matches!(
            *self,
            mechanism::MANUAL
                | mechanism::LOCAL_TRACE_SAMPLING_RULE
                | mechanism::REMOTE_USER_TRACE_SAMPLING_RULE
                | mechanism::REMOTE_DYNAMIC_TRACE_SAMPLING_RULE
                | mechanism::SPAN_SAMPLING_RULE
        );
        match (user, is_keep) {
            (true, true) => priority::USER_KEEP,
            (true, false) => priority::USER_REJECT,
            (false, true) => priority::AUTO_KEEP,
            (false, false) => priority::AUTO_REJECT,
        }
    }

    pub fn to_cow(&self) -> Cow<'static, str> {
        match *self {
            mechanism::DEFAULT => Cow::Borrowed("-0"),
            mechanism::AGENT_RATE_BY_SERVICE => Cow::Borrowed("-1"),
            mechanism::REMOTE_RATE => Cow::Borrowed("-2"),
            mechanism::LOCAL_TRACE_SAMPLING_RULE => Cow::Borrowed("-3"),
            mechanism::MANUAL => Cow::Borrowed("-4"),
            mechanism::SPAN_SAMPLING_RULE => Cow::Borrowed("-8"),
            mechanism::REMOTE_USER_TRACE_SAMPLING_RULE => Cow::Borrowed("-11"),
            mechanism::REMOTE_DYNAMIC_TRACE_SAMPLING_RULE => Cow::Borrowed("-12"),
            _ => Cow::Owned(self.to_string()),
        }
    }
}

pub mod mechanism {
    use super::SamplingMechanism;

    pub const DEFAULT: SamplingMechanism = SamplingMechanism::from_u8(0);
    pub const AGENT_RATE_BY_SERVICE: SamplingMechanism = SamplingMechanism::from_u8(1);
    pub const REMOTE_RATE: SamplingMechanism = SamplingMechanism::from_u8(2);
    pub const LOCAL_TRACE_SAMPLING_RULE: SamplingMechanism = SamplingMechanism::from_u8(3);
    pub const MANUAL: SamplingMechanism = SamplingMechanism::from_u8(4);
    pub const SPAN_SAMPLING_RULE: SamplingMechanism = SamplingMechanism::from_u8(8);
    pub const REMOTE_USER_TRACE_SAMPLING_RULE: SamplingMechanism = SamplingMechanism::from_u8(11);
    pub const REMOTE_DYNAMIC_TRACE_SAMPLING_RULE: SamplingMechanism =
        SamplingMechanism::from_u8(12);
}

impl fmt::Display for SamplingMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-{}", self.into_u8())
    }
}

impl FromStr for SamplingMechanism {
    type Err = ();

    /// Parses the `_dd.p.dm` wire representation, e.g. `-3`.
    fn from_str(s: &str) -> Result<Self, ()> {
        let val: i16 = s.parse().map_err(drop)?;
        if val > 0 {
            return Err(());
        }
        let val = -val;
        if val > u8::MAX as i16 {
            return Err(());
        }
        Ok(SamplingMechanism::from_u8(val as u8))
    }
}
