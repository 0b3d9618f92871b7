// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::codec::CodecError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request path: {0:?}")]
    InvalidPath(String),
    #[error("transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("codec error: {0}")]
    CodecError(#[from] CodecError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("reply already sent for route {0}")]
    DuplicateReply(String),
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl ServiceError {
    /// Errors that indicate a broken handler contract rather than a remote
    /// failure. These terminate the handling of the call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServiceError::ProtocolViolation(_) | ServiceError::DuplicateReply(_)
        )
    }
}
