// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::transport::TransportError;

/// Error code of responses synthesized for timeouts and transport failures.
pub const TRANSPORT_ERROR_CODE: &str = "ORION_TRANSPORT";

/// Structured error carried by a [`Response`].
///
/// Every instance gets its own UUID, so one failure occurrence can be
/// followed across logs and traces even when code and message repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrionError {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub uuid: String,
}

impl OrionError {
    pub fn new(code: impl Into<String>, message: Option<&str>) -> Self {
        let code = code.into();
        let message = match message {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => code.clone(),
        };

        OrionError {
            code,
            message,
            uuid: Uuid::new_v4().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.code.is_empty() {
            return Err(ServiceError::ProtocolViolation(
                "error code must not be empty".to_string(),
            ));
        }
        Uuid::parse_str(&self.uuid).map_err(|e| {
            ServiceError::ProtocolViolation(format!("invalid error uuid {:?}: {}", self.uuid, e))
        })?;
        Ok(())
    }
}

impl std::fmt::Display for OrionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.code, self.message, self.uuid)
    }
}

impl std::error::Error for OrionError {}

/// Outcome of one invocation. The presence of `error` marks a failure no
/// matter what `payload` holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OrionError>,
}

impl Response {
    pub fn new(payload: impl Into<Value>) -> Self {
        Response {
            payload: payload.into(),
            error: None,
        }
    }

    pub fn error(error: OrionError) -> Self {
        Response {
            payload: Value::Null,
            error: Some(error),
        }
    }

    pub fn with_error(self, error: OrionError) -> Self {
        Response {
            error: Some(error),
            ..self
        }
    }

    /// Response handed to the caller when the transport gave up on a call.
    pub fn transport_failure(err: &TransportError) -> Self {
        Response::error(OrionError::new(
            TRANSPORT_ERROR_CODE,
            Some(&err.to_string()),
        ))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        match &self.error {
            Some(err) => err.validate(),
            None => Ok(()),
        }
    }

    /// Rebuild a response from a decoded envelope. Anything that is not a
    /// response envelope yields `None`.
    pub fn from_envelope(envelope: Value) -> Option<Self> {
        let mut response: Response = match envelope {
            Value::Object(_) => serde_json::from_value(envelope).ok()?,
            _ => return None,
        };
        if let Some(err) = response.error.as_mut().filter(|e| e.message.is_empty()) {
            err.message = err.code.clone();
        }
        Some(response)
    }

    pub fn to_envelope(&self) -> Result<Value, ServiceError> {
        serde_json::to_value(self).map_err(|e| ServiceError::CodecError(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_defaults_message_to_code() {
        let err = OrionError::new("404", None);
        assert_eq!(err.message, "404");

        let err = OrionError::new("404", Some(""));
        assert_eq!(err.message, "404");

        let err = OrionError::new("404", Some("Not Found"));
        assert_eq!(err.code, "404");
        assert_eq!(err.message, "Not Found");
        assert!(err.validate().is_ok());
    }

    #[test]
    fn test_error_uuid_unique_per_instance() {
        let a = OrionError::new("E", Some("same"));
        let b = OrionError::new("E", Some("same"));
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn test_malformed_errors_are_rejected() {
        let mut err = OrionError::new("E", None);
        err.uuid = "not-a-uuid".to_string();
        assert!(matches!(
            err.validate(),
            Err(ServiceError::ProtocolViolation(_))
        ));

        let mut err = OrionError::new("E", None);
        err.code.clear();
        let res = Response::new(1).with_error(err);
        assert!(matches!(
            res.validate(),
            Err(ServiceError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_transport_failure() {
        let res = Response::transport_failure(&TransportError::Timeout("calc.sum".to_string()));
        assert_eq!(res.payload, Value::Null);
        let err = res.error.unwrap();
        assert_eq!(err.code, TRANSPORT_ERROR_CODE);
        assert_eq!(err.message, "Transport timeout: calc.sum");
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = Response::new(3).to_envelope().unwrap();
        assert_eq!(envelope, json!({"payload": 3}));

        let err = OrionError::new("404", Some("Not Found"));
        let envelope = Response::new(json!({"x": 1}))
            .with_error(err.clone())
            .to_envelope()
            .unwrap();
        assert_eq!(
            envelope,
            json!({
                "payload": {"x": 1},
                "error": {"code": "404", "message": "Not Found", "uuid": err.uuid},
            })
        );
    }

    #[test]
    fn test_from_envelope() {
        let res = Response::from_envelope(json!({"payload": 3})).unwrap();
        assert_eq!(res, Response::new(3));

        // peers may omit the message
        let res = Response::from_envelope(json!({"payload": null, "error": {"code": "E"}}))
            .unwrap();
        let err = res.error.unwrap();
        assert_eq!(err.code, "E");
        assert_eq!(err.message, "E");

        assert!(Response::from_envelope(Value::Null).is_none());
        assert!(Response::from_envelope(json!("payload")).is_none());
        assert!(Response::from_envelope(json!({"error": "boom"})).is_none());
    }
}
