// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Pluggable byte <-> structured value transforms.
//!
//! Envelopes travel as [`serde_json::Value`] between the facade and the
//! codec, so a codec only has to know how to turn a self-describing value
//! into bytes and back. Decoding never fails loudly: malformed input yields
//! `None` and the caller carries on with a null value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("msgpack encode error: {0}")]
    MsgPack(#[from] rmp_serde::encode::Error),
    #[error("json encode error: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait Codec: Send + Sync {
    /// MIME type of the encoded bytes
    fn content_type(&self) -> &'static str;

    /// Text encoding of the bytes, `None` for binary formats
    fn encoding(&self) -> Option<&'static str>;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Option<Value>;
}

/// MessagePack, the default binary codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn content_type(&self) -> &'static str {
        "application/msgpack"
    }

    fn encoding(&self) -> Option<&'static str> {
        None
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        trace!("msgpack encode");
        // named encoding keeps maps as maps for non-Rust peers
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Option<Value> {
        trace!("msgpack decode");
        rmp_serde::from_slice(bytes).ok()
    }
}

/// JSON text codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encoding(&self) -> Option<&'static str> {
        Some("utf8")
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        trace!("json encode");
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Option<Value> {
        trace!("json decode");
        serde_json::from_slice(bytes).ok()
    }
}

/// Codec selection as it appears in configuration files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    MsgPack,
    Json,
}

impl CodecKind {
    pub fn build(&self) -> Box<dyn Codec> {
        match self {
            CodecKind::MsgPack => Box::new(MsgPackCodec),
            CodecKind::Json => Box::new(JsonCodec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn samples() -> Vec<Value> {
        vec![
            json!(3),
            json!(-17.5),
            Value::Null,
            json!("some string"),
            json!({"a": 1, "b": 2}),
            json!({"nested": {"time": "Tue Oct 18", "n": 2, "list": [1, "two", null]}}),
        ]
    }

    #[test]
    #[traced_test]
    fn test_codecs_stay_below_debug() {
        for codec in [CodecKind::MsgPack.build(), CodecKind::Json.build()] {
            let bytes = codec.encode(&json!({"a": 1})).unwrap();
            codec.decode(&bytes).unwrap();
        }

        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .find(|l| l.contains("DEBUG") && (l.contains(" encode") || l.contains(" decode")))
            {
                Some(line) => Err(format!("per-message debug event: {}", line)),
                None => Ok(()),
            }
        });
    }

    #[test]
    fn test_msgpack_round_trip() {
        let codec = MsgPackCodec;
        for value in samples() {
            let bytes = codec.encode(&value).unwrap();
            assert_eq!(codec.decode(&bytes), Some(value));
        }
    }

    #[test]
    fn test_json_round_trip() {
        let codec = JsonCodec;
        for value in samples() {
            let bytes = codec.encode(&value).unwrap();
            assert_eq!(codec.decode(&bytes), Some(value));
        }
    }

    #[test]
    fn test_decode_garbage_is_none() {
        assert_eq!(JsonCodec.decode(b"{not json"), None);
        // 0xc1 is never used in msgpack
        assert_eq!(MsgPackCodec.decode(&[0xc1]), None);
        assert_eq!(MsgPackCodec.decode(&[]), None);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(MsgPackCodec.content_type(), "application/msgpack");
        assert_eq!(MsgPackCodec.encoding(), None);
        assert_eq!(JsonCodec.content_type(), "application/json");
        assert_eq!(JsonCodec.encoding(), Some("utf8"));
    }

    #[test]
    fn test_codec_kind() {
        let kind: CodecKind = serde_json::from_value(json!("json")).unwrap();
        assert_eq!(kind, CodecKind::Json);
        assert_eq!(kind.build().content_type(), "application/json");
        assert_eq!(CodecKind::default().build().content_type(), "application/msgpack");
    }
}
