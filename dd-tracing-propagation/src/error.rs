// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use dd_tracing::log::Level;
use thiserror::Error;

/// A malformed or impossible carrier operation for one propagation style.
///
/// These never reach the application; the composite propagator logs them and
/// moves on to the next configured style.
#[derive(Error, Debug, Copy, Clone)]
#[error("Cannot {} from {}, {}", operation, style_name, message)]
pub struct Error {
    pub message: &'static str,
    // which propagation style this error comes from
    style_name: &'static str,
    // what operation was attempted
    operation: &'static str,
    // error log level
    pub log_level: Level,
}

impl Error {
    /// Error when extracting a value from a carrier
    #[must_use]
    pub fn extract(message: &'static str, style_name: &'static str) -> Self {
        Self {
            message,
            style_name,
            operation: "extract",
            log_level: Level::Error,
        }
    }

    pub fn extract_with_level(
        message: &'static str,
        style_name: &'static str,
        log_level: Level,
    ) -> Self {
        Self {
            message,
            style_name,
            operation: "extract",
            log_level,
        }
    }

    /// Error when injecting a value into a carrier
    #[allow(clippy::must_use_candidate)]
    pub fn inject(message: &'static str, style_name: &'static str) -> Self {
        Self {
            message,
            style_name,
            operation: "inject",
            log_level: Level::Error,
        }
    }
}
