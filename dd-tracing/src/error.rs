// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the tracing library.
///
/// Trace failures never surface on the application's business path; they are
/// logged and the affected trace is degraded or dropped. The one exception is
/// [`Error::MsgpackOverflow`], which indicates a programming error and is
/// returned synchronously from the encoder.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Datadog Agent URL is missing the \"://\" separator: {url:?}")]
    UrlMissingSeparator { url: String },

    #[error(
        "Unsupported URI scheme {scheme:?} in Datadog Agent URL {url:?}. \
         Supported schemes are: http, https, unix, http+unix, https+unix"
    )]
    UrlUnsupportedScheme { scheme: String, url: String },

    #[error(
        "Unix domain socket paths for the Datadog Agent must be absolute. \
         The path {path:?} is not absolute. Error occurred for URL: {url:?}"
    )]
    UrlUnixDomainSocketPathNotAbsolute { path: String, url: String },

    #[error("Failed to send traces to the Datadog Agent: {0}")]
    AgentHttpSendFailed(String),

    #[error("Datadog Agent responded with status {status}: {body}")]
    AgentHttpStatus { status: u16, body: String },

    #[error("Could not parse the Datadog Agent response: {0}")]
    AgentResponseMalformed(String),

    #[error("No propagation style could extract a context from the carrier")]
    PropagationMalformed { style: String },

    #[error("Serialized propagation tags exceed the configured header size budget")]
    PropagationInjectionOversize,

    #[error(
        "Cannot msgpack encode {kind} of size {actual}, \
         which exceeds the protocol maximum of {max}"
    )]
    MsgpackOverflow {
        kind: &'static str,
        actual: u64,
        max: u64,
    },

    #[error("The trace segment finished without any spans to submit")]
    NoSpansToSubmit,

    #[error("Tracer shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}
