// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::OnceLock;

use dd_tracing::{constants, Error, Result};

/// Path of the trace intake endpoint on the agent.
pub const TRACES_ENDPOINT: &str = "/v0.4/traces";

/// Location of the Datadog Agent.
///
/// `scheme://authority[/path]` where the scheme is one of http, https, unix,
/// http+unix, https+unix. For the unix family the full remainder after `://`
/// is the socket path and must be absolute; for http/https the authority is
/// `host[:port]` and any path is carried along untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentUrl {
    pub scheme: String,
    pub authority: String,
    pub path: String,
}

const SUPPORTED_SCHEMES: [&str; 5] = ["http", "https", "unix", "http+unix", "https+unix"];

impl AgentUrl {
    pub fn parse(input: &str) -> Result<Self> {
        let Some((scheme, rest)) = input.split_once("://") else {
            return Err(Error::UrlMissingSeparator {
                url: input.to_string(),
            });
        };

        if !SUPPORTED_SCHEMES.contains(&scheme) {
            return Err(Error::UrlUnsupportedScheme {
                scheme: scheme.to_string(),
                url: input.to_string(),
            });
        }

        // For unix domain sockets there is no way to distinguish the
        // path-to-socket from a path-to-resource, and agent URLs have no
        // resource path. The whole remainder is the socket path.
        if scheme.ends_with("unix") {
            if !rest.starts_with('/') {
                return Err(Error::UrlUnixDomainSocketPathNotAbsolute {
                    path: rest.to_string(),
                    url: input.to_string(),
                });
            }
            return Ok(AgentUrl {
                scheme: scheme.to_string(),
                authority: rest.to_string(),
                path: String::new(),
            });
        }

        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash..]),
            None => (rest, ""),
        };

        Ok(AgentUrl {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// The transport the collector delivers payloads through.
///
/// The implementation (TCP, TLS, unix socket) lives outside this crate; the
/// collector only ever issues blocking `PUT`s from its worker thread.
pub trait HttpClient: Send + Sync {
    fn put(
        &self,
        url: &AgentUrl,
        path: &str,
        headers: &[(&'static str, String)],
        body: &[u8],
    ) -> Result<HttpResponse>;
}

/// Headers sent with every trace payload.
pub fn request_headers(
    trace_count: usize,
    container_id: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("Content-Type", "application/msgpack".to_string()),
        ("X-Datadog-Trace-Count", trace_count.to_string()),
        ("Datadog-Meta-Lang", constants::LANGUAGE.to_string()),
        ("Datadog-Meta-Lang-Version", language_version().to_string()),
        (
            "Datadog-Meta-Tracer-Version",
            constants::TRACER_VERSION.to_string(),
        ),
    ];

    if let Some(container_id) = container_id {
        headers.push(("Datadog-Container-ID", container_id.to_string()));
    }

    headers
}

/// The rustc that built the library.
fn language_version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| rustc_version_runtime::version().to_string())
}
