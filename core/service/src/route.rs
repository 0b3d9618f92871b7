// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Route addressing.
//!
//! Handlers are bound as `service.method` while callers may address them
//! as `/service/method`. Both forms normalize to the dot-delimited route
//! used on the transport.

use crate::errors::ServiceError;

/// Canonical dot-delimited form of `path`: every `/` becomes `.` and
/// leading delimiters are dropped, so normalizing twice changes nothing.
/// All of them go, not just the first: `//a` gives `a`, never `.a`.
pub fn normalize(path: &str) -> String {
    path.replace('/', ".").trim_start_matches('.').to_string()
}

/// Transport address for a call to `path`, optionally inside a namespace.
pub fn resolve(path: &str, namespace: Option<&str>) -> Result<String, ServiceError> {
    let route = normalize(path);
    if route.is_empty() {
        return Err(ServiceError::InvalidPath(path.to_string()));
    }

    Ok(match namespace {
        Some(ns) => format!("{}.{}", ns, route),
        None => route,
    })
}

/// Subject a topic subscription of `service` listens on.
pub fn subject(service: &str, topic: &str) -> String {
    format!("{}:{}", service, topic)
}
