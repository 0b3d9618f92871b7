// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ServiceError;

/// Meta key holding the trace id once the request went through a tracer.
pub const TRACE_ID_KEY: &str = "x-trace-id";

/// One RPC invocation as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Target route, either `/service/method` or `service.method`
    #[serde(default)]
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    #[serde(default)]
    pub meta: HashMap<String, String>,

    /// Distributed trace headers in raw wire form
    #[serde(default, rename = "tracerData")]
    pub tracer_data: HashMap<String, Vec<String>>,

    /// Per-call timeout override, milliseconds on the wire
    #[serde(default, skip_serializing_if = "Option::is_none", with = "millis")]
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(path: impl Into<String>) -> Self {
        Request {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_params(self, params: impl Into<Value>) -> Self {
        Request {
            params: Some(params.into()),
            ..self
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Request {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Trace id of the call, set by the tracer.
    pub fn id(&self) -> Option<&str> {
        self.meta.get(TRACE_ID_KEY).map(String::as_str)
    }

    pub fn params(&self) -> &Value {
        self.params.as_ref().unwrap_or(&Value::Null)
    }

    /// Rebuild a request from a decoded envelope. Undecodable input gives an
    /// empty request so the handler still runs.
    pub fn from_envelope(envelope: Option<Value>) -> Self {
        envelope
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn to_envelope(&self) -> Result<Value, ServiceError> {
        serde_json::to_value(self).map_err(|e| ServiceError::CodecError(e.into()))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        // peers send integers or floats, and zero means no override
        let ms = Option::<f64>::deserialize(d)?;
        Ok(ms
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| Duration::from_millis(ms as u64)))
    }
}
