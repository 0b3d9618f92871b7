// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! GELF 1.1 over UDP.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{LogRecord, Logger};
use crate::errors::ServiceError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 12201;

const GELF_VERSION: &str = "1.1";
const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
const CHUNK_HEADER_SIZE: usize = 12;
const MAX_CHUNK_SIZE: usize = 1420;
const MAX_CHUNKS: usize = 128;

/// Sends records to a Graylog (GELF) input.
pub struct GelfLogger {
    host: String,
    socket: UdpSocket,
    target: SocketAddr,
}

impl GelfLogger {
    pub fn new(host: impl Into<String>, address: &str, port: u16) -> Result<Self, ServiceError> {
        let target = (address, port)
            .to_socket_addrs()
            .map_err(|e| ServiceError::ConfigError(format!("invalid logger address: {}", e)))?
            .next()
            .ok_or_else(|| {
                ServiceError::ConfigError(format!("logger address {} not resolved", address))
            })?;

        let bind: SocketAddr = if target.is_ipv4() {
            ([0u8, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)
            .map_err(|e| ServiceError::ConfigError(format!("cannot bind logger socket: {}", e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ServiceError::ConfigError(format!("cannot configure logger socket: {}", e)))?;

        debug!(%target, "gelf logger ready");
        Ok(GelfLogger {
            host: host.into(),
            socket,
            target,
        })
    }
}

/// GELF document for `record`. Fields outside the GELF core become
/// additional `_` fields.
fn to_gelf(record: &LogRecord) -> Value {
    let mut doc = Map::new();
    doc.insert("version".to_string(), json!(GELF_VERSION));
    doc.insert("host".to_string(), json!(record.host));
    doc.insert("short_message".to_string(), json!(record.message));
    doc.insert("timestamp".to_string(), json!(record.timestamp));
    if let Some(level) = record.level {
        doc.insert("level".to_string(), json!(level.as_u8()));
    }
    if let Some(params) = &record.params {
        // a string keeps the field type stable across records
        let params = match params {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        doc.insert("_params".to_string(), json!(params));
    }
    if let Some(id) = &record.trace_id {
        doc.insert("_x-trace-id".to_string(), json!(id));
    }
    Value::Object(doc)
}

/// Split `payload` into GELF chunks sharing `message_id`. `None` when the
/// payload needs more chunks than the format allows.
fn chunks(payload: &[u8], message_id: [u8; 8]) -> Option<Vec<Vec<u8>>> {
    let body = MAX_CHUNK_SIZE - CHUNK_HEADER_SIZE;
    let count = payload.len().div_ceil(body);
    if count > MAX_CHUNKS {
        return None;
    }

    Some(
        payload
            .chunks(body)
            .enumerate()
            .map(|(seq, part)| {
                let mut chunk = Vec::with_capacity(CHUNK_HEADER_SIZE + part.len());
                chunk.extend_from_slice(&CHUNK_MAGIC);
                chunk.extend_from_slice(&message_id);
                chunk.push(seq as u8);
                chunk.push(count as u8);
                chunk.extend_from_slice(part);
                chunk
            })
            .collect(),
    )
}

impl Logger for GelfLogger {
    fn host(&self) -> &str {
        &self.host
    }

    fn send(&self, record: LogRecord) {
        let payload = match serde_json::to_vec(&to_gelf(&record)) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "cannot encode gelf record");
                return;
            }
        };

        let datagrams = if payload.len() <= MAX_CHUNK_SIZE {
            vec![payload]
        } else {
            match chunks(&payload, rand::random::<[u8; 8]>()) {
                Some(c) => c,
                None => {
                    warn!(size = payload.len(), "gelf record too large, dropped");
                    return;
                }
            }
        };

        for datagram in datagrams {
            if let Err(e) = self.socket.send_to(&datagram, self.target) {
                warn!(error = %e, target = %self.target, "failed to send gelf record");
                return;
            }
        }
    }
}
