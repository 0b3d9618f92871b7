// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! RPC correlation and trace propagation over a shared pub/sub transport.

pub mod codec;
pub mod config;
pub mod errors;
pub mod handler;
pub mod logger;
pub mod producer;
pub mod reply;
pub mod request;
pub mod response;
pub mod route;
pub mod service;
pub mod tracer;
pub mod transport;

mod utils;

pub use codec::{Codec, CodecKind, JsonCodec, MsgPackCodec};
pub use config::{LoggerConfiguration, ServiceConfiguration};
pub use errors::ServiceError;
pub use handler::{Handler, HandlerOptions};
pub use logger::{Level, LogMessage, LogRecord, Logger};
pub use producer::Producer;
pub use reply::Reply;
pub use request::Request;
pub use response::{OrionError, Response, TRANSPORT_ERROR_CODE};
pub use service::{Service, ServiceBuilder};
pub use tracer::{B3Tracer, TraceContext, TraceSpan, Tracer};
pub use transport::{LocalTransport, SubscriptionId, Transport, TransportError};
pub use utils::generate_id;
