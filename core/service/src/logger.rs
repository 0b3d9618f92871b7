// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Structured log side channel.
//!
//! Handlers report inbound requests and failed responses as [`LogRecord`]s
//! to a [`Logger`] sink. Records are built with [`LogMessage`], which also
//! applies the size cap on params and degrades gracefully when params
//! cannot be encoded.

pub mod gelf;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, error, info, warn};

pub use gelf::GelfLogger;

/// Largest encoded params sent with a record, in bytes.
pub const MAX_PARAMS_SIZE: usize = 30 * 1024;

/// Marker appended to truncated params.
pub const TRUNCATION_MARKER: &str = "...";

/// Syslog severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Emergency => "Emergency",
            Level::Alert => "Alert",
            Level::Critical => "Critical",
            Level::Error => "Error",
            Level::Warning => "Warning",
            Level::Notice => "Notice",
            Level::Info => "Info",
            Level::Debug => "Debug",
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.as_u8())
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry sent to the logging sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub host: String,
    /// seconds since the epoch
    pub timestamp: u64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "x-trace-id", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl LogRecord {
    fn new(host: &str, message: impl Into<String>) -> Self {
        LogRecord {
            host: host.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            message: message.into(),
            level: None,
            params: None,
            trace_id: None,
        }
    }
}

pub trait Logger: Send + Sync {
    /// Host (service) name stamped on every record.
    fn host(&self) -> &str;

    fn send(&self, record: LogRecord);
}

impl<'a> dyn Logger + 'a {
    pub fn create_message(&self, message: &str) -> LogMessage<'_> {
        LogMessage::new(self, message)
    }
}

/// Builder of one log record.
pub struct LogMessage<'a> {
    logger: &'a dyn Logger,
    message: String,
    level: Option<Level>,
    id: Option<String>,
    params: Option<Result<Value, String>>,
}

impl<'a> LogMessage<'a> {
    pub fn new(logger: &'a dyn Logger, message: &str) -> Self {
        LogMessage {
            logger,
            message: message.to_string(),
            level: None,
            id: None,
            params: None,
        }
    }

    pub fn set_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn set_id(mut self, id: Option<&str>) -> Self {
        self.id = id.map(str::to_string);
        self
    }

    pub fn set_params<T: Serialize + ?Sized>(mut self, params: &T) -> Self {
        self.params = Some(serde_json::to_value(params).map_err(|e| e.to_string()));
        self
    }

    /// Hand the record to the sink. Never fails: oversized params are
    /// truncated and params that cannot be encoded are dropped.
    pub fn send(self) {
        let host = self.logger.host();
        let mut record = LogRecord::new(host, self.message.as_str());
        record.level = self.level;
        record.trace_id = self.id.clone();

        let encoded = match self.params {
            None => None,
            Some(Ok(value)) => Some(
                serde_json::to_string(&value)
                    .map(|json| (value, json))
                    .map_err(|e| e.to_string()),
            ),
            Some(Err(e)) => Some(Err(e)),
        };

        match encoded {
            None => self.logger.send(record),
            Some(Ok((value, json))) if json.len() <= MAX_PARAMS_SIZE => {
                record.params = Some(value);
                self.logger.send(record);
            }
            Some(Ok((_, json))) => {
                record.params = Some(Value::String(truncate(&json)));
                self.logger.send(record);

                let mut note = LogRecord::new(
                    host,
                    format!(
                        "{}: params truncated, original size {} bytes",
                        self.message,
                        json.len()
                    ),
                );
                note.level = Some(Level::Info);
                note.trace_id = self.id;
                self.logger.send(note);
            }
            Some(Err(e)) => {
                let mut note = LogRecord::new(
                    host,
                    format!("{}: failed to encode params: {}", self.message, e),
                );
                note.level = Some(Level::Info);
                note.trace_id = self.id;
                self.logger.send(note);

                record.level = Some(Level::Error);
                self.logger.send(record);
            }
        }
    }
}

/// First `MAX_PARAMS_SIZE` bytes of `json`, cut on a char boundary, with
/// the truncation marker appended.
fn truncate(json: &str) -> String {
    let mut end = MAX_PARAMS_SIZE.min(json.len());
    while !json.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &json[..end], TRUNCATION_MARKER)
}

/// Sink writing records to the process diagnostics.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    host: String,
}

impl TracingLogger {
    pub fn new(host: impl Into<String>) -> Self {
        TracingLogger { host: host.into() }
    }
}

impl Logger for TracingLogger {
    fn host(&self) -> &str {
        &self.host
    }

    fn send(&self, record: LogRecord) {
        let params = record
            .params
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default();
        let trace_id = record.trace_id.as_deref().unwrap_or_default();

        match record.level.unwrap_or(Level::Info) {
            Level::Emergency | Level::Alert | Level::Critical | Level::Error => {
                error!(host = %record.host, %trace_id, %params, "{}", record.message)
            }
            Level::Warning => warn!(host = %record.host, %trace_id, %params, "{}", record.message),
            Level::Notice | Level::Info => {
                info!(host = %record.host, %trace_id, %params, "{}", record.message)
            }
            Level::Debug => debug!(host = %record.host, %trace_id, %params, "{}", record.message),
        }
    }
}
